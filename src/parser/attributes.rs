//! Attribute readers over a DIE cursor
//!
//! Pure helpers that turn `gimli` attribute values into the numeric,
//! string, reference-offset and block-expression values the factories
//! need. Missing attributes read as 0 / empty; malformed expressions read
//! as `u64::MAX` with a diagnostic.

use crate::core::strings::{StringId, StringTable};
use gimli::{AttributeValue, EndianSlice, LittleEndian};
use tracing::warn;

pub(crate) type Die<'abbrev, 'unit, 'input> =
    gimli::DebuggingInformationEntry<'abbrev, 'unit, EndianSlice<'input, LittleEndian>>;

/// Section-global offset of this DIE. 0 only for malformed input.
pub(crate) fn die_offset(die: &Die, unit: &gimli::Unit<EndianSlice<LittleEndian>>) -> u64 {
    die.offset()
        .to_debug_info_offset(&unit.header)
        .map(|o| o.0 as u64)
        .unwrap_or(0)
}

/// Numeric attribute value, dispatching on form: addresses and data forms
/// by value, flags as 1, anything else 0 with a diagnostic.
pub(crate) fn attr_numeric(die: &Die, at: gimli::DwAt) -> u64 {
    let Ok(Some(value)) = die.attr_value(at) else {
        return 0;
    };
    match value {
        AttributeValue::Addr(addr) => addr,
        AttributeValue::Data1(v) => u64::from(v),
        AttributeValue::Data2(v) => u64::from(v),
        AttributeValue::Data4(v) => u64::from(v),
        AttributeValue::Data8(v) => v,
        AttributeValue::Udata(v) => v,
        AttributeValue::Sdata(v) => v as u64,
        AttributeValue::Flag(f) => u64::from(f),
        other => {
            warn!("unexpected form {:?} for {}", other, at);
            0
        }
    }
}

pub(crate) fn has_attr(die: &Die, at: gimli::DwAt) -> bool {
    matches!(die.attr_value(at), Ok(Some(_)))
}

/// String attribute, interned. Absent or undecodable strings intern as the
/// empty string (id 0).
pub(crate) fn attr_string<'i>(
    die: &Die<'_, '_, 'i>,
    dwarf: &gimli::Dwarf<EndianSlice<'i, LittleEndian>>,
    unit: &gimli::Unit<EndianSlice<'i, LittleEndian>>,
    at: gimli::DwAt,
    strings: &mut StringTable,
) -> StringId {
    let Ok(Some(value)) = die.attr_value(at) else {
        return StringId::EMPTY;
    };
    match dwarf.attr_string(unit, value) {
        Ok(s) => strings.add(&s.to_string_lossy()),
        Err(_) => StringId::EMPTY,
    }
}

/// Dereference a reference-form attribute to its target DIE's
/// section-global offset; 0 if absent or not a reference.
pub(crate) fn attr_type(
    die: &Die,
    unit: &gimli::Unit<EndianSlice<LittleEndian>>,
    at: gimli::DwAt,
) -> u64 {
    match die.attr_value(at) {
        Ok(Some(AttributeValue::UnitRef(offset))) => offset
            .to_debug_info_offset(&unit.header)
            .map(|o| o.0 as u64)
            .unwrap_or(0),
        Ok(Some(AttributeValue::DebugInfoRef(offset))) => offset.0 as u64,
        _ => 0,
    }
}

/// Offset-like attribute: numeric forms by value, block forms evaluated as
/// a one-op location expression.
pub(crate) fn attr_offset(die: &Die, at: gimli::DwAt) -> u64 {
    let Ok(Some(value)) = die.attr_value(at) else {
        return 0;
    };
    match value {
        AttributeValue::Data1(v) => u64::from(v),
        AttributeValue::Data2(v) => u64::from(v),
        AttributeValue::Data4(v) => u64::from(v),
        AttributeValue::Data8(v) => v,
        AttributeValue::Udata(v) => v,
        AttributeValue::Sdata(v) => v as u64,
        AttributeValue::Exprloc(expr) => dwarf_expr(expr.0.slice()),
        AttributeValue::Block(block) => dwarf_expr(block.slice()),
        other => {
            warn!("unexpected form {:?} for {}", other, at);
            0
        }
    }
}

/// Evaluate the common member-offset expression shapes:
/// `DW_OP_plus_uconst <uleb>` and `DW_OP_constu <uleb>`. Anything else is
/// reported and reads as `u64::MAX`.
pub(crate) fn dwarf_expr(expr: &[u8]) -> u64 {
    if let [op, rest @ ..] = expr {
        if *op == gimli::DW_OP_plus_uconst.0 || *op == gimli::DW_OP_constu.0 {
            return uleb128(rest);
        }
        warn!("unhandled DW_OP {:#x} in offset expression", op);
    }
    u64::MAX
}

/// One-byte-at-a-time ULEB128, capped at 10 bytes; overlong or truncated
/// input reads as `u64::MAX`.
pub(crate) fn uleb128(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        if i == 10 {
            return u64::MAX;
        }
        value |= u64::from(byte & 0x7f) << (i * 7);
        if byte & 0x80 == 0 {
            return value;
        }
    }
    u64::MAX
}

/// Per-dimension entry count of a subrange DIE: upper bound + 1, or the
/// explicit count; 0 when neither is present.
pub(crate) fn attr_upper_bound(die: &Die) -> u64 {
    if has_attr(die, gimli::DW_AT_upper_bound) {
        return attr_numeric(die, gimli::DW_AT_upper_bound) + 1;
    }
    attr_numeric(die, gimli::DW_AT_count)
}

/// `DW_AT_low_pc` and the absolute end address derived from
/// `DW_AT_high_pc` (address or offset form).
pub(crate) fn low_high_pc(die: &Die) -> (Option<u64>, Option<u64>) {
    let mut low_pc = None;
    let mut high_pc = None;
    let mut high_pc_offset = None;

    let mut attrs = die.attrs();
    while let Ok(Some(attr)) = attrs.next() {
        match attr.name() {
            gimli::DW_AT_low_pc => {
                if let AttributeValue::Addr(addr) = attr.value() {
                    low_pc = Some(addr);
                }
            }
            gimli::DW_AT_high_pc => match attr.value() {
                AttributeValue::Addr(addr) => high_pc = Some(addr),
                AttributeValue::Udata(offset) => high_pc_offset = Some(offset),
                AttributeValue::Data1(offset) => high_pc_offset = Some(u64::from(offset)),
                AttributeValue::Data2(offset) => high_pc_offset = Some(u64::from(offset)),
                AttributeValue::Data4(offset) => high_pc_offset = Some(u64::from(offset)),
                AttributeValue::Data8(offset) => high_pc_offset = Some(offset),
                _ => {}
            },
            _ => {}
        }
    }

    match (low_pc, high_pc, high_pc_offset) {
        (Some(low), None, Some(offset)) => (Some(low), Some(low + offset)),
        (low, high, _) => (low, high),
    }
}

/// All `DW_AT_ranges` entries of a DIE, begin/end pairs with the unit base
/// applied.
pub(crate) fn entry_ranges<'i>(
    die: &Die<'_, '_, 'i>,
    unit: &gimli::Unit<EndianSlice<'i, LittleEndian>>,
    dwarf: &gimli::Dwarf<EndianSlice<'i, LittleEndian>>,
) -> Vec<(u64, u64)> {
    let offset = match die.attr_value(gimli::DW_AT_ranges) {
        Ok(Some(AttributeValue::RangeListsRef(offset))) => gimli::RangeListsOffset(offset.0),
        Ok(Some(AttributeValue::SecOffset(offset))) => gimli::RangeListsOffset(offset),
        _ => return Vec::new(),
    };

    let mut ranges = Vec::new();
    let Ok(mut iter) = dwarf.ranges(unit, offset) else {
        return ranges;
    };
    while let Ok(Some(range)) = iter.next() {
        if range.begin <= range.end {
            ranges.push((range.begin, range.end));
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uleb128() {
        assert_eq!(uleb128(&[0x00]), 0);
        assert_eq!(uleb128(&[0x08]), 8);
        assert_eq!(uleb128(&[0xe5, 0x8e, 0x26]), 624485);
        // trailing bytes past the terminator are ignored
        assert_eq!(uleb128(&[0x7f, 0x55]), 127);
        // truncated: continuation bit set on the last byte
        assert_eq!(uleb128(&[0x80]), u64::MAX);
        assert_eq!(uleb128(&[]), u64::MAX);
        // capped at 10 bytes
        assert_eq!(uleb128(&[0x80; 11]), u64::MAX);
        let mut max = [0x80u8; 10];
        max[9] = 0x01;
        assert_eq!(uleb128(&max), 1u64 << 63);
    }

    #[test]
    fn test_dwarf_expr() {
        let plus_uconst = [gimli::DW_OP_plus_uconst.0, 0x10];
        assert_eq!(dwarf_expr(&plus_uconst), 0x10);

        let constu = [gimli::DW_OP_constu.0, 0xe5, 0x8e, 0x26];
        assert_eq!(dwarf_expr(&constu), 624485);

        // anything else is malformed for a member offset
        let fbreg = [gimli::DW_OP_fbreg.0, 0x10];
        assert_eq!(dwarf_expr(&fbreg), u64::MAX);
        assert_eq!(dwarf_expr(&[]), u64::MAX);
    }
}
