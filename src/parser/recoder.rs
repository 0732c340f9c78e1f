//! Offset-to-dense-id rewrite pass
//!
//! After a CU's DIE tree is fully parsed, every reference a node captured
//! (type, abstract origin, containing type, specification) is a raw DWARF
//! offset in its scratch record. This pass walks the three tables in order
//! and rewrites each reference to the dense id of the target node, chasing
//! the per-CU hash indices. Bitfield members trigger type synthesis here.
//!
//! Synthetic nodes appended during the walk carry no scratch record, which
//! is also what makes running the pass twice a no-op.

use crate::core::cu::{Cu, DwarfCu, DwarfTag, Table};
use crate::core::model::{NodeId, TagData, TagKind};
use crate::core::strings::StringId;
use crate::parser::bitfield::recode_member_bitfield;
use tracing::warn;

pub(crate) fn recode_cu(cu: &mut Cu) -> crate::Result<()> {
    // nothing to chase once the scratch is gone
    let Some(dcu) = cu.take_scratch() else {
        return Ok(());
    };
    let result = recode_tables(cu, &dcu);
    cu.put_scratch(dcu);
    result
}

fn recode_tables(cu: &mut Cu, dcu: &DwarfCu) -> crate::Result<()> {
    recode_table(cu, dcu, Table::Types, 1)?;
    recode_table(cu, dcu, Table::Tags, 0)?;
    recode_table(cu, dcu, Table::Functions, 0)
}

fn recode_table(cu: &mut Cu, dcu: &DwarfCu, table: Table, start: usize) -> crate::Result<()> {
    // bitfield synthesis appends to types_table mid-walk, so the length is
    // re-read every iteration; the new entries are skipped as synthetic
    let mut i = start;
    loop {
        let entry = match table {
            Table::Types => cu.types_table.get(i).copied(),
            Table::Tags => cu.tags_table.get(i).copied(),
            Table::Functions => cu.functions_table.get(i).copied(),
        };
        let Some(entry) = entry else { break };
        if let Some(nid) = entry {
            recode_tag(cu, dcu, nid)?;
        }
        i += 1;
    }
    Ok(())
}

fn warn_type_not_found(kind: TagKind, rec: &DwarfTag) {
    warn!(
        "couldn't find {:#x} type for {:#x} ({:?})!",
        rec.type_ref, rec.id, kind
    );
}

fn warn_origin_not_found(kind: TagKind, rec: &DwarfTag) {
    warn!(
        "couldn't find {:#x} abstract_origin for {:#x} ({:?})!",
        rec.origin, rec.id, kind
    );
}

fn recode_tag(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId) -> crate::Result<()> {
    let Some(sid) = cu.node(nid).scratch else {
        return Ok(());
    };
    let kind = cu.node(nid).kind;
    let rec = dcu.record(sid).clone();

    if kind.has_specification() {
        recode_specification(cu, dcu, nid, &rec);
    }
    if kind.has_namespace() {
        return recode_namespace(cu, dcu, nid);
    }

    match kind {
        TagKind::Subprogram => {
            let name_empty = cu.node(nid).function().is_some_and(|f| f.name.is_empty());
            if name_empty {
                if rec.origin == 0 && rec.spec == 0 {
                    // nameless declaration-only subprogram, nothing to do
                    return Ok(());
                }
                let target = dcu.find_tag(rec.origin).or_else(|| dcu.find_tag(rec.spec));
                match target {
                    Some(tsid) => {
                        let target_node = dcu.record(tsid).node;
                        let name = cu.node(target_node).function().map(|f| f.name);
                        if let (Some(name), Some(f)) = (name, cu.node_mut(nid).function_mut()) {
                            f.name = name;
                        }
                    }
                    None => warn!(
                        "couldn't find name for function {:#x}, abstract_origin={:#x}, specification={:#x}",
                        rec.id, rec.origin, rec.spec
                    ),
                }
            }
            recode_lexblock(cu, dcu, nid)?;
            recode_ftype(cu, dcu, nid);
            // the generic step below resolves the return type
        }
        TagKind::SubroutineType => {
            recode_ftype(cu, dcu, nid);
        }
        TagKind::LexBlock => {
            return recode_lexblock(cu, dcu, nid);
        }
        TagKind::PtrToMember => {
            // the origin slot holds the containing type for this kind
            match dcu.find_type(rec.origin) {
                Some(tsid) => {
                    let small_id = dcu.record(tsid).small_id;
                    if let TagData::PtrToMember(pm) = &mut cu.node_mut(nid).data {
                        pm.containing_type = small_id;
                    }
                }
                None => warn!(
                    "couldn't find containing_type {:#x} for {:#x}!",
                    rec.origin, rec.id
                ),
            }
        }
        // inline expansions and imported modules reference routines and
        // namespaces, which live in the tag hash, not the type hash
        TagKind::InlineExpansion | TagKind::ImportedModule => {
            match dcu.find_tag(rec.type_ref) {
                Some(tsid) => cu.node_mut(nid).type_id = dcu.record(tsid).small_id,
                None => warn_type_not_found(kind, &rec),
            }
            return Ok(());
        }
        // imported declarations can name either
        TagKind::ImportedDeclaration => {
            if let Some(tsid) = dcu.find_tag(rec.type_ref) {
                cu.node_mut(nid).type_id = dcu.record(tsid).small_id;
                return Ok(());
            }
        }
        _ => {}
    }

    if rec.type_ref == 0 {
        cu.node_mut(nid).type_id = 0; // void
        return Ok(());
    }
    match dcu.find_type(rec.type_ref) {
        Some(tsid) => cu.node_mut(nid).type_id = dcu.record(tsid).small_id,
        None => warn_type_not_found(kind, &rec),
    }
    Ok(())
}

/// A type whose own name is empty borrows it from the declaration its
/// `DW_AT_specification` points at.
fn recode_specification(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId, rec: &DwarfTag) {
    let name = cu
        .node(nid)
        .type_payload()
        .map(|t| t.namespace.name)
        .unwrap_or(StringId::EMPTY);
    if !name.is_empty() || rec.spec == 0 {
        return;
    }
    match dcu.find_type(rec.spec) {
        Some(tsid) => {
            let target = dcu.record(tsid).node;
            let name = cu.node(target).namespace().map(|ns| ns.name);
            if let Some(name) = name {
                if let Some(ty) = cu.node_mut(nid).type_payload_mut() {
                    ty.namespace.name = name;
                }
            }
        }
        None => warn!(
            "couldn't find name for type {:#x}, specification={:#x}",
            rec.id, rec.spec
        ),
    }
}

fn recode_namespace(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId) -> crate::Result<()> {
    let children: Vec<NodeId> = cu
        .node(nid)
        .namespace()
        .map(|ns| ns.tags.clone())
        .unwrap_or_default();

    for pos in children {
        let Some(psid) = cu.node(pos).scratch else {
            continue;
        };
        let kind = cu.node(pos).kind;
        let rec = dcu.record(psid).clone();

        if kind.has_namespace() {
            recode_namespace(cu, dcu, pos)?;
            continue;
        }

        match kind {
            TagKind::Member | TagKind::Inheritance => {
                let bitfield_size = cu.node(pos).member().map_or(0, |m| m.bitfield_size);
                if bitfield_size != 0 {
                    recode_member_bitfield(cu, dcu, pos)?;
                    continue;
                }
                // plain members resolve through the generic lookup below
            }
            TagKind::SubroutineType | TagKind::Subprogram => {
                recode_ftype(cu, dcu, pos);
            }
            TagKind::ImportedModule => {
                match dcu.find_tag(rec.type_ref) {
                    Some(tsid) => cu.node_mut(pos).type_id = dcu.record(tsid).small_id,
                    None => warn_type_not_found(kind, &rec),
                }
                continue;
            }
            TagKind::ImportedDeclaration => {
                if let Some(tsid) = dcu.find_tag(rec.type_ref) {
                    cu.node_mut(pos).type_id = dcu.record(tsid).small_id;
                    continue;
                }
            }
            _ => {}
        }

        if rec.type_ref == 0 {
            continue; // void
        }
        match dcu.find_type(rec.type_ref) {
            Some(tsid) => cu.node_mut(pos).type_id = dcu.record(tsid).small_id,
            None => warn_type_not_found(kind, &rec),
        }
    }
    Ok(())
}

/// Parameter types of a subprogram or subroutine type. A parameter without
/// a type reference borrows name and (already recoded) type from its
/// abstract origin.
fn recode_ftype(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId) {
    let parms: Vec<NodeId> = cu
        .node(nid)
        .ftype()
        .map(|f| f.parms.clone())
        .unwrap_or_default();

    for pos in parms {
        let Some(psid) = cu.node(pos).scratch else {
            continue;
        };
        let rec = dcu.record(psid).clone();

        if rec.type_ref == 0 {
            if rec.origin == 0 {
                cu.node_mut(pos).type_id = 0;
                continue;
            }
            borrow_from_origin(cu, dcu, pos, &rec, TagKind::Parameter);
            continue;
        }
        match dcu.find_type(rec.type_ref) {
            Some(tsid) => cu.node_mut(pos).type_id = dcu.record(tsid).small_id,
            None => warn_type_not_found(TagKind::Parameter, &rec),
        }
    }
}

/// Copy the name and recoded type of `rec.origin`'s node onto `pos`.
fn borrow_from_origin(cu: &mut Cu, dcu: &DwarfCu, pos: NodeId, rec: &DwarfTag, kind: TagKind) {
    let Some(osid) = dcu.find_tag(rec.origin) else {
        warn_origin_not_found(kind, rec);
        return;
    };
    let origin_node = dcu.record(osid).node;
    let (name, type_id) = {
        let origin = cu.node(origin_node);
        (origin.name(), origin.type_id)
    };
    let tag = cu.node_mut(pos);
    tag.type_id = type_id;
    if let Some(name) = name {
        match &mut tag.data {
            TagData::Parameter(p) => p.name = name,
            TagData::Variable(v) => v.name = name,
            _ => {}
        }
    }
}

fn recode_lexblock(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId) -> crate::Result<()> {
    let children: Vec<NodeId> = cu
        .node(nid)
        .lexblock()
        .map(|b| b.tags.clone())
        .unwrap_or_default();

    for pos in children {
        let Some(psid) = cu.node(pos).scratch else {
            continue;
        };
        let kind = cu.node(pos).kind;
        let rec = dcu.record(psid).clone();

        match kind {
            TagKind::LexBlock => {
                recode_lexblock(cu, dcu, pos)?;
                continue;
            }
            TagKind::InlineExpansion => {
                // the type slot holds the abstract origin; recode the
                // origin routine's parameter types
                match dcu.find_tag(rec.type_ref) {
                    Some(tsid) => {
                        let origin_node = dcu.record(tsid).node;
                        recode_ftype(cu, dcu, origin_node);
                    }
                    None => warn_type_not_found(kind, &rec),
                }
                continue;
            }
            TagKind::Parameter => {
                if rec.type_ref == 0 {
                    borrow_from_origin(cu, dcu, pos, &rec, kind);
                    continue;
                }
            }
            TagKind::Variable => {
                if rec.type_ref == 0 {
                    if rec.origin == 0 {
                        // completely empty variable DIEs exist in the wild
                        continue;
                    }
                    borrow_from_origin(cu, dcu, pos, &rec, kind);
                    continue;
                }
            }
            TagKind::Label => {
                if rec.origin == 0 {
                    continue;
                }
                let Some(osid) = dcu.find_tag(rec.origin) else {
                    warn_origin_not_found(kind, &rec);
                    continue;
                };
                let origin_node = dcu.record(osid).node;
                let name = cu.node(origin_node).name();
                if let (Some(name), TagData::Label(label)) = (name, &mut cu.node_mut(pos).data) {
                    label.name = name;
                }
                continue;
            }
            _ => {}
        }

        match dcu.find_type(rec.type_ref) {
            Some(tsid) => cu.node_mut(pos).type_id = dcu.record(tsid).small_id,
            None => warn_type_not_found(kind, &rec),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::recode_cu;
    use crate::core::model::NodeId;
    use crate::sizes::cache_member_sizes;
    use crate::{Cu, CuSteal, Cus, LoadConfig};
    use gimli::write::{AttributeValue, DwarfUnit, EndianVec, Sections};
    use gimli::{Encoding, Format, LittleEndian};
    use std::collections::HashMap;

    /// `struct S { int a : 3; int b; }`, loaded with the scratch records
    /// kept alive.
    fn load_bitfield_unit() -> (Box<Cu>, Cus) {
        let encoding = Encoding {
            format: Format::Dwarf32,
            version: 4,
            address_size: 8,
        };
        let mut dwarf = DwarfUnit::new(encoding);
        let root = dwarf.unit.root();
        let entry = dwarf.unit.get_mut(root);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"t.c".to_vec()));
        entry.set(
            gimli::DW_AT_language,
            AttributeValue::Language(gimli::DW_LANG_C99),
        );

        let int = dwarf.unit.add(root, gimli::DW_TAG_base_type);
        let entry = dwarf.unit.get_mut(int);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"int".to_vec()));
        entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(4));
        entry.set(
            gimli::DW_AT_encoding,
            AttributeValue::Encoding(gimli::DW_ATE_signed),
        );

        let s = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
        let entry = dwarf.unit.get_mut(s);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"S".to_vec()));
        entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(8));

        let a = dwarf.unit.add(s, gimli::DW_TAG_member);
        let entry = dwarf.unit.get_mut(a);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"a".to_vec()));
        entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(int));
        entry.set(gimli::DW_AT_data_member_location, AttributeValue::Udata(0));
        entry.set(gimli::DW_AT_bit_offset, AttributeValue::Udata(29));
        entry.set(gimli::DW_AT_bit_size, AttributeValue::Udata(3));

        let b = dwarf.unit.add(s, gimli::DW_TAG_member);
        let entry = dwarf.unit.get_mut(b);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"b".to_vec()));
        entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(int));
        entry.set(gimli::DW_AT_data_member_location, AttributeValue::Udata(4));

        let mut sections = Sections::new(EndianVec::new(LittleEndian));
        dwarf.write(&mut sections).unwrap();
        let mut map = HashMap::new();
        sections
            .for_each(|id, data| {
                map.insert(id.name(), data.slice().to_vec());
                Ok::<_, gimli::Error>(())
            })
            .unwrap();
        let gdwarf = gimli::Dwarf::load(|id| {
            Ok::<_, gimli::Error>(gimli::EndianSlice::new(
                map.get(id.name()).map(Vec::as_slice).unwrap_or(&[]),
                LittleEndian,
            ))
        })
        .unwrap();

        let mut cus = Cus::new();
        let mut stolen: Option<Box<Cu>> = None;
        let mut conf = LoadConfig {
            extra_dbg_info: true,
            get_addr_info: false,
            fixup_silly_bitfields: false,
            steal: Some(Box::new(|cu, _| {
                stolen = Some(cu);
                CuSteal::Stolen
            })),
        };
        crate::load_dwarf(&mut cus, &mut conf, &gdwarf, &[], "t").unwrap();
        drop(conf);
        (stolen.unwrap(), cus)
    }

    fn type_ids(cu: &Cu) -> Vec<u32> {
        (0..cu.nr_nodes())
            .map(|i| cu.node(NodeId(i as u32)).type_id)
            .collect()
    }

    #[test]
    fn test_recode_twice_is_noop() {
        let (mut cu, _cus) = load_bitfield_unit();
        let before = type_ids(&cu);
        let types_len = cu.types_table.len();
        let nodes = cu.nr_nodes();

        recode_cu(&mut cu).unwrap();

        assert_eq!(type_ids(&cu), before);
        assert_eq!(cu.types_table.len(), types_len);
        assert_eq!(cu.nr_nodes(), nodes);
    }

    #[test]
    fn test_size_cache_twice_is_identical() {
        let (mut cu, cus) = load_bitfield_unit();

        let sizes = |cu: &Cu| -> Vec<(u64, u64, u16)> {
            (0..cu.nr_nodes())
                .filter_map(|i| cu.node(NodeId(i as u32)).member())
                .map(|m| (m.byte_size, m.bit_size, m.bitfield_size))
                .collect()
        };
        let first = sizes(&cu);
        assert!(first.contains(&(4, 3, 3)));
        assert!(first.contains(&(4, 32, 0)));

        cache_member_sizes(&mut cu, cus.strings(), false);
        assert_eq!(sizes(&cu), first);
    }
}
