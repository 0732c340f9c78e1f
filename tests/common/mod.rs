#![allow(dead_code)]

//! Synthetic-DWARF builders shared by the integration tests.
//!
//! Units are assembled with `gimli::write`, encoded to section bytes, and
//! read back through the public loading entry points, so the tests
//! exercise the same provider surface a real ELF would.

use gimli::write::{
    Address, AttributeValue, DwarfUnit, EndianVec, Expression, Range, RangeList, RangeListId,
    Sections, UnitEntryId,
};
use gimli::{Encoding, Format, LittleEndian};
use std::collections::HashMap;

pub fn new_unit(language: gimli::DwLang) -> DwarfUnit {
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    };
    let mut dwarf = DwarfUnit::new(encoding);
    let root = dwarf.unit.root();
    let entry = dwarf.unit.get_mut(root);
    entry.set(
        gimli::DW_AT_name,
        AttributeValue::String(b"model.c".to_vec()),
    );
    entry.set(gimli::DW_AT_language, AttributeValue::Language(language));
    dwarf
}

pub fn set_name(dwarf: &mut DwarfUnit, id: UnitEntryId, name: &str) {
    dwarf.unit.get_mut(id).set(
        gimli::DW_AT_name,
        AttributeValue::String(name.as_bytes().to_vec()),
    );
}

pub fn base_type(
    dwarf: &mut DwarfUnit,
    name: &str,
    byte_size: u64,
    encoding: gimli::DwAte,
) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_base_type);
    set_name(dwarf, id, name);
    let entry = dwarf.unit.get_mut(id);
    entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(byte_size));
    entry.set(gimli::DW_AT_encoding, AttributeValue::Encoding(encoding));
    id
}

pub fn structure(dwarf: &mut DwarfUnit, name: &str, byte_size: u64) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
    set_name(dwarf, id, name);
    dwarf
        .unit
        .get_mut(id)
        .set(gimli::DW_AT_byte_size, AttributeValue::Udata(byte_size));
    id
}

pub fn member(
    dwarf: &mut DwarfUnit,
    parent: UnitEntryId,
    name: &str,
    ty: UnitEntryId,
    byte_offset: u64,
) -> UnitEntryId {
    let id = dwarf.unit.add(parent, gimli::DW_TAG_member);
    set_name(dwarf, id, name);
    let entry = dwarf.unit.get_mut(id);
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
    entry.set(
        gimli::DW_AT_data_member_location,
        AttributeValue::Udata(byte_offset),
    );
    id
}

pub fn bitfield_member(
    dwarf: &mut DwarfUnit,
    parent: UnitEntryId,
    name: &str,
    ty: UnitEntryId,
    byte_offset: u64,
    bit_offset: u64,
    bit_size: u64,
) -> UnitEntryId {
    let id = member(dwarf, parent, name, ty, byte_offset);
    let entry = dwarf.unit.get_mut(id);
    entry.set(gimli::DW_AT_bit_offset, AttributeValue::Udata(bit_offset));
    entry.set(gimli::DW_AT_bit_size, AttributeValue::Udata(bit_size));
    id
}

pub fn typedef(dwarf: &mut DwarfUnit, name: &str, ty: UnitEntryId) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_typedef);
    set_name(dwarf, id, name);
    dwarf
        .unit
        .get_mut(id)
        .set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
    id
}

pub fn pointer(dwarf: &mut DwarfUnit, ty: Option<UnitEntryId>) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_pointer_type);
    if let Some(ty) = ty {
        dwarf
            .unit
            .get_mut(id)
            .set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
    }
    id
}

pub fn enumeration(
    dwarf: &mut DwarfUnit,
    name: &str,
    byte_size: Option<u64>,
    enumerators: &[(&str, i64)],
) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_enumeration_type);
    set_name(dwarf, id, name);
    if let Some(byte_size) = byte_size {
        dwarf
            .unit
            .get_mut(id)
            .set(gimli::DW_AT_byte_size, AttributeValue::Udata(byte_size));
    }
    for (ename, value) in enumerators {
        let e = dwarf.unit.add(id, gimli::DW_TAG_enumerator);
        set_name(dwarf, e, ename);
        dwarf
            .unit
            .get_mut(e)
            .set(gimli::DW_AT_const_value, AttributeValue::Sdata(*value));
    }
    id
}

pub fn array(dwarf: &mut DwarfUnit, ty: UnitEntryId, upper_bounds: &[u64]) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_array_type);
    dwarf
        .unit
        .get_mut(id)
        .set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
    for bound in upper_bounds {
        let sub = dwarf.unit.add(id, gimli::DW_TAG_subrange_type);
        dwarf
            .unit
            .get_mut(sub)
            .set(gimli::DW_AT_upper_bound, AttributeValue::Udata(*bound));
    }
    id
}

pub fn subprogram(dwarf: &mut DwarfUnit, name: &str, low_pc: u64, size: u64) -> UnitEntryId {
    let root = dwarf.unit.root();
    let id = dwarf.unit.add(root, gimli::DW_TAG_subprogram);
    set_name(dwarf, id, name);
    let entry = dwarf.unit.get_mut(id);
    entry.set(
        gimli::DW_AT_low_pc,
        AttributeValue::Address(Address::Constant(low_pc)),
    );
    entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(size));
    id
}

pub fn variable(
    dwarf: &mut DwarfUnit,
    parent: UnitEntryId,
    name: &str,
    ty: UnitEntryId,
    location: Option<&[u8]>,
) -> UnitEntryId {
    let id = dwarf.unit.add(parent, gimli::DW_TAG_variable);
    set_name(dwarf, id, name);
    let entry = dwarf.unit.get_mut(id);
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
    if let Some(expr) = location {
        entry.set(
            gimli::DW_AT_location,
            AttributeValue::Exprloc(Expression::raw(expr.to_vec())),
        );
    }
    id
}

pub fn op_addr(addr: u64) -> Vec<u8> {
    let mut expr = vec![gimli::DW_OP_addr.0];
    expr.extend_from_slice(&addr.to_le_bytes());
    expr
}

pub fn range_list(dwarf: &mut DwarfUnit, ranges: &[(u64, u64)]) -> RangeListId {
    dwarf.unit.ranges.add(RangeList(
        ranges
            .iter()
            .map(|&(begin, end)| Range::StartEnd {
                begin: Address::Constant(begin),
                end: Address::Constant(end),
            })
            .collect(),
    ))
}

/// Encoded DWARF sections of one synthetic unit.
pub struct SectionMap {
    sections: HashMap<gimli::SectionId, Vec<u8>>,
}

pub fn encode(dwarf: &mut DwarfUnit) -> SectionMap {
    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).expect("write DWARF");
    let mut map = HashMap::new();
    sections
        .for_each(|id, data| {
            map.insert(id, data.slice().to_vec());
            Ok::<_, gimli::Error>(())
        })
        .unwrap();
    SectionMap { sections: map }
}

impl SectionMap {
    pub fn dwarf(&self) -> gimli::Dwarf<gimli::EndianSlice<'_, LittleEndian>> {
        gimli::Dwarf::load(|id| {
            Ok::<_, gimli::Error>(gimli::EndianSlice::new(
                self.sections.get(&id).map(Vec::as_slice).unwrap_or(&[]),
                LittleEndian,
            ))
        })
        .unwrap()
    }

    pub fn iter(&self) -> impl Iterator<Item = (gimli::SectionId, &[u8])> {
        self.sections.iter().map(|(id, data)| (*id, data.as_slice()))
    }
}

pub fn load(dwarf: &mut DwarfUnit) -> dwelve::Cus {
    load_with(
        dwarf,
        dwelve::LoadConfig {
            get_addr_info: true,
            ..Default::default()
        },
    )
}

pub fn load_with(dwarf: &mut DwarfUnit, mut conf: dwelve::LoadConfig) -> dwelve::Cus {
    let sections = encode(dwarf);
    let gdwarf = sections.dwarf();
    let mut cus = dwelve::Cus::new();
    dwelve::load_dwarf(&mut cus, &mut conf, &gdwarf, &[], "synthetic")
        .expect("load synthetic DWARF");
    cus
}

/// Find a type-table entry by kind and name; returns the dense id and tag.
pub fn find_type<'a>(
    cu: &'a dwelve::Cu,
    strings: &dwelve::StringTable,
    kind: dwelve::TagKind,
    name: &str,
) -> Option<(u32, &'a dwelve::Tag)> {
    cu.types_table.iter().enumerate().find_map(|(i, entry)| {
        let tag = cu.node((*entry)?);
        if tag.kind != kind {
            return None;
        }
        let tag_name = tag.name()?;
        (strings.get(tag_name) == name).then_some((i as u32, tag))
    })
}

/// Find a function-table entry by name.
pub fn find_function<'a>(
    cu: &'a dwelve::Cu,
    strings: &dwelve::StringTable,
    name: &str,
) -> Option<(u32, &'a dwelve::Tag)> {
    cu.functions_table
        .iter()
        .enumerate()
        .find_map(|(i, entry)| {
            let tag = cu.node((*entry)?);
            let f = tag.function()?;
            (strings.get(f.name) == name).then_some((i as u32, tag))
        })
}

/// Find a tags-table entry by kind and name.
pub fn find_tag<'a>(
    cu: &'a dwelve::Cu,
    strings: &dwelve::StringTable,
    kind: dwelve::TagKind,
    name: &str,
) -> Option<(u32, &'a dwelve::Tag)> {
    cu.tags_table.iter().enumerate().find_map(|(i, entry)| {
        let tag = cu.node((*entry)?);
        if tag.kind != kind {
            return None;
        }
        let tag_name = tag.name()?;
        (strings.get(tag_name) == name).then_some((i as u32, tag))
    })
}
