//! Synthetic type construction for bitfield members
//!
//! DWARF has no base types narrower than a byte, so a member declared
//! `int a : 3` references plain `int`. To model the member faithfully the
//! recoder synthesizes a 3-bit `int` base type (or enum, or a fresh
//! typedef/qualifier wrapping one) and points the member at it. This is
//! the only place the type graph grows after parse.

use crate::core::cu::{Cu, DwarfCu};
use crate::core::model::{BaseType, Namespace, NodeId, Tag, TagData, TagKind, Type};
use anyhow::anyhow;
use tracing::warn;

/// Rewrite a bitfield member's type to a synthetic type of its declared
/// bit width.
pub(crate) fn recode_member_bitfield(
    cu: &mut Cu,
    dcu: &DwarfCu,
    member: NodeId,
) -> crate::Result<()> {
    let Some(sid) = cu.node(member).scratch else {
        return Ok(());
    };
    let rec = dcu.record(sid).clone();
    let bit_size = cu.node(member).member().map_or(0, |m| m.bitfield_size);

    let Some(tsid) = dcu.find_type(rec.type_ref) else {
        warn!(
            "couldn't find {:#x} type for bitfield member {:#x}!",
            rec.type_ref, rec.id
        );
        cu.node_mut(member).type_id = 0;
        return Ok(());
    };
    let type_node = dcu.record(tsid).node;

    let recoded = recode_bitfield(cu, dcu, type_node, bit_size)?;
    cu.node_mut(member).type_id = recoded;
    Ok(())
}

/// Return the dense id of a `bit_size`-wide rendition of the type at
/// `nid`, creating it if the CU doesn't have one yet.
///
/// Synthetic base types and enums dedup by `(interned name, bit size)`
/// through a linear scan of the dense types table; bitfields are rare
/// enough that this never matters.
fn recode_bitfield(cu: &mut Cu, dcu: &DwarfCu, nid: NodeId, bit_size: u16) -> crate::Result<u32> {
    let kind = cu.node(nid).kind;
    match kind {
        TagKind::Typedef => {
            let Some(inner) = wrapped_type_node(cu, dcu, nid) else {
                return Ok(0);
            };
            let id = recode_bitfield(cu, dcu, inner, bit_size)?;
            if id == cu.node(nid).type_id {
                return Ok(id);
            }
            let name = cu
                .node(nid)
                .type_payload()
                .map(|t| t.namespace.name)
                .unwrap_or_default();
            let mut ty = Type::default();
            ty.namespace.name = name;
            let new = cu.alloc(Tag {
                kind: TagKind::Typedef,
                top_level: false,
                type_id: id,
                scratch: None,
                data: TagData::Type(ty),
            });
            Ok(cu.table_add(new))
        }
        TagKind::Const | TagKind::Volatile => {
            let Some(inner) = wrapped_type_node(cu, dcu, nid) else {
                return Ok(0);
            };
            let id = recode_bitfield(cu, dcu, inner, bit_size)?;
            if id == cu.node(nid).type_id {
                return Ok(id);
            }
            let new = cu.alloc(Tag {
                kind,
                top_level: false,
                type_id: id,
                scratch: None,
                data: TagData::Simple,
            });
            Ok(cu.table_add(new))
        }
        TagKind::Base => {
            let name = cu.node(nid).base_type().map(|b| b.name).unwrap_or_default();
            if let Some(id) = cu.find_base_type_by_name_and_size(name, bit_size) {
                return Ok(id);
            }
            let new = cu.alloc(Tag {
                kind: TagKind::Base,
                top_level: true,
                type_id: 0,
                scratch: None,
                data: TagData::Base(BaseType {
                    name,
                    bit_size,
                    ..Default::default()
                }),
            });
            Ok(cu.table_add(new))
        }
        TagKind::Enumeration => {
            let name = cu
                .node(nid)
                .type_payload()
                .map(|t| t.namespace.name)
                .unwrap_or_default();
            if let Some(id) = cu.find_enumeration_by_name_and_size(name, bit_size) {
                return Ok(id);
            }
            // the new enum borrows the original's enumerator list
            let (tags, nr_members) = cu
                .node(nid)
                .type_payload()
                .map(|t| (t.namespace.tags.clone(), t.nr_members))
                .unwrap_or_default();
            let mut ty = Type::default();
            ty.namespace = Namespace {
                name,
                tags,
                shared_tags: true,
            };
            ty.nr_members = nr_members;
            ty.size = u64::from(bit_size);
            let new = cu.alloc(Tag {
                kind: TagKind::Enumeration,
                top_level: true,
                type_id: 0,
                scratch: None,
                data: TagData::Type(ty),
            });
            Ok(cu.table_add(new))
        }
        _ => Err(anyhow!(
            "cannot give {:?} a {}-bit rendition for a bitfield",
            kind,
            bit_size
        )),
    }
}

/// The node a typedef or qualifier wraps; `None` (with a diagnostic) when
/// the reference dangles, in which case the member degrades to void.
fn wrapped_type_node(cu: &Cu, dcu: &DwarfCu, nid: NodeId) -> Option<NodeId> {
    let sid = cu.node(nid).scratch?;
    let rec = dcu.record(sid);
    match dcu.find_type(rec.type_ref) {
        Some(tsid) => Some(dcu.record(tsid).node),
        None => {
            warn!(
                "couldn't find {:#x} type under bitfield qualifier {:#x}!",
                rec.type_ref, rec.id
            );
            None
        }
    }
}
