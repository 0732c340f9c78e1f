//! Member size caching
//!
//! Third pass over a loaded CU: every member and inheritance tag gets its
//! effective byte and bit size computed from its resolved type chain, so
//! layout consumers never chase types at print time. Bitfield members take
//! their storage-unit size from the canonical width of the underlying base
//! type's name, not from the (narrow) synthetic type.

use crate::core::cu::Cu;
use crate::core::model::{NodeId, TagKind};
use crate::core::strings::StringTable;
use tracing::warn;

/// Canonical storage-unit width in bits for a C base type name; 0 for
/// names the table doesn't know, which callers surface as zero-sized
/// members.
pub(crate) fn base_type_name_to_size(name: &str, addr_size: u8) -> u32 {
    match name {
        "char" | "signed char" | "unsigned char" | "_Bool" | "bool" => 8,
        "short" | "short int" | "short unsigned int" | "unsigned short" => 16,
        "int" | "signed int" | "unsigned int" | "unsigned" => 32,
        "long" | "long int" | "long unsigned int" | "unsigned long" => u32::from(addr_size) * 8,
        "long long" | "long long int" | "long long unsigned int" | "unsigned long long" => 64,
        "float" => 32,
        "double" => 64,
        _ => 0,
    }
}

/// Chase typedefs and qualifiers down to the type that provides a
/// bitfield's storage.
fn follow_to_storage_type(cu: &Cu, type_id: u32) -> Option<NodeId> {
    let mut nid = cu.type_node(type_id)?;
    loop {
        match cu.node(nid).kind {
            TagKind::Typedef | TagKind::Const | TagKind::Volatile => {
                nid = cu.type_node(cu.node(nid).type_id)?;
            }
            _ => return Some(nid),
        }
    }
}

/// Cache byte and bit sizes on every member and inheritance tag of a CU.
/// Recomputation is idempotent.
pub(crate) fn cache_member_sizes(cu: &mut Cu, strings: &StringTable, fixup_silly_bitfields: bool) {
    for index in 0..cu.nr_nodes() {
        let nid = NodeId(index as u32);
        if !matches!(cu.node(nid).kind, TagKind::Member | TagKind::Inheritance) {
            continue;
        }
        let type_id = cu.node(nid).type_id;
        let bitfield_size = cu.node(nid).member().map_or(0, |m| m.bitfield_size);

        if bitfield_size == 0 {
            let byte_size = cu.type_size(type_id);
            if let Some(member) = cu.node_mut(nid).member_mut() {
                member.byte_size = byte_size;
                member.bit_size = byte_size * 8;
            }
            continue;
        }

        let Some(storage) = follow_to_storage_type(cu, type_id) else {
            continue;
        };
        let tag = cu.node(storage);
        let (type_bit_size, integral_bit_size) = match tag.kind {
            // enums occupy an int-sized unit
            TagKind::Enumeration => (tag.type_payload().map_or(0, |t| t.size), 32u64),
            TagKind::Base => {
                let Some(base) = tag.base_type() else { continue };
                (
                    u64::from(base.bit_size),
                    u64::from(base_type_name_to_size(strings.get(base.name), cu.addr_size)),
                )
            }
            other => {
                warn!("bitfield member {} over {:?}, sizes left unset", index, other);
                continue;
            }
        };

        if let Some(member) = cu.node_mut(nid).member_mut() {
            member.byte_size = integral_bit_size / 8;
            if integral_bit_size == 0 {
                // unknown storage-unit name shows up as a zero-sized member
                continue;
            }
            if type_bit_size == integral_bit_size {
                member.bit_size = integral_bit_size;
                if fixup_silly_bitfields {
                    member.bitfield_size = 0;
                    member.bitfield_offset = 0;
                }
                continue;
            }
            member.bit_size = type_bit_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{BaseType, ClassMember, Tag, TagData};

    #[test]
    fn test_base_type_name_to_size() {
        assert_eq!(base_type_name_to_size("char", 8), 8);
        assert_eq!(base_type_name_to_size("int", 8), 32);
        assert_eq!(base_type_name_to_size("long long int", 8), 64);
        // `long` follows the word size
        assert_eq!(base_type_name_to_size("long int", 8), 64);
        assert_eq!(base_type_name_to_size("long int", 4), 32);
        assert_eq!(base_type_name_to_size("__int128", 8), 0);
    }

    fn cu_with_int(strings: &mut StringTable) -> (Cu, u32) {
        let mut cu = Cu::new(
            "t.c".into(),
            "t".into(),
            Vec::new(),
            8,
            gimli::DW_LANG_C99,
            false,
            false,
        );
        let int_name = strings.add("int");
        let base = cu.alloc(Tag {
            kind: TagKind::Base,
            top_level: true,
            type_id: 0,
            scratch: None,
            data: TagData::Base(BaseType {
                name: int_name,
                bit_size: 32,
                is_signed: true,
                ..Default::default()
            }),
        });
        let id = cu.table_add(base);
        (cu, id)
    }

    fn member_tag(type_id: u32, bitfield_size: u16) -> Tag {
        Tag {
            kind: TagKind::Member,
            top_level: false,
            type_id,
            scratch: None,
            data: TagData::Member(ClassMember {
                bitfield_size,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_plain_member_sizes() {
        let mut strings = StringTable::new();
        let (mut cu, int_id) = cu_with_int(&mut strings);
        let member = cu.alloc(member_tag(int_id, 0));
        cu.table_add(member);

        cache_member_sizes(&mut cu, &strings, false);
        let m = cu.node(member).member().unwrap();
        assert_eq!(m.byte_size, 4);
        assert_eq!(m.bit_size, 32);
    }

    #[test]
    fn test_silly_bitfield_fixup() {
        let mut strings = StringTable::new();
        let (mut cu, int_id) = cu_with_int(&mut strings);
        let member = cu.alloc(member_tag(int_id, 32));
        cu.table_add(member);

        cache_member_sizes(&mut cu, &strings, true);
        let m = cu.node(member).member().unwrap();
        assert_eq!(m.byte_size, 4);
        assert_eq!(m.bit_size, 32);
        assert_eq!(m.bitfield_size, 0);
        assert_eq!(m.bitfield_offset, 0);
    }

    #[test]
    fn test_unknown_base_name_leaves_zero() {
        let mut strings = StringTable::new();
        let mut cu = Cu::new(
            "t.c".into(),
            "t".into(),
            Vec::new(),
            8,
            gimli::DW_LANG_C99,
            false,
            false,
        );
        let odd = strings.add("__odd128");
        let base = cu.alloc(Tag {
            kind: TagKind::Base,
            top_level: true,
            type_id: 0,
            scratch: None,
            data: TagData::Base(BaseType {
                name: odd,
                bit_size: 5,
                ..Default::default()
            }),
        });
        let id = cu.table_add(base);
        let member = cu.alloc(member_tag(id, 5));
        cu.table_add(member);

        cache_member_sizes(&mut cu, &strings, false);
        let m = cu.node(member).member().unwrap();
        assert_eq!(m.byte_size, 0);
        assert_eq!(m.bit_size, 0);
    }

    #[test]
    fn test_cache_is_idempotent() {
        let mut strings = StringTable::new();
        let (mut cu, int_id) = cu_with_int(&mut strings);
        let plain = cu.alloc(member_tag(int_id, 0));
        let bits = cu.alloc(member_tag(int_id, 3));
        cu.table_add(plain);
        cu.table_add(bits);

        cache_member_sizes(&mut cu, &strings, false);
        let first: Vec<_> = [plain, bits]
            .iter()
            .map(|&n| {
                let m = cu.node(n).member().unwrap();
                (m.byte_size, m.bit_size, m.bitfield_size)
            })
            .collect();

        cache_member_sizes(&mut cu, &strings, false);
        let second: Vec<_> = [plain, bits]
            .iter()
            .map(|&n| {
                let m = cu.node(n).member().unwrap();
                (m.byte_size, m.bit_size, m.bitfield_size)
            })
            .collect();
        assert_eq!(first, second);
        assert_eq!(first[1], (4, 3, 3));
    }
}
