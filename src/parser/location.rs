//! Variable location classification
//!
//! Maps a variable's single-op location expression onto the coarse
//! [`VarLocation`] buckets the model keeps. A missing expression (or a
//! location list, which means "no single expression") classifies as
//! optimized-away.

use crate::core::model::VarLocation;
use crate::parser::attributes::Die;
use gimli::{AttributeValue, EndianSlice, LittleEndian};

/// Classify `DW_AT_location`; returns the location kind and, for globals,
/// the `DW_OP_addr` operand.
pub(crate) fn variable_location(
    die: &Die,
    unit: &gimli::Unit<EndianSlice<LittleEndian>>,
) -> (VarLocation, u64) {
    let addr_size = unit.header.address_size();
    match die.attr_value(gimli::DW_AT_location) {
        Ok(Some(AttributeValue::Exprloc(expr))) => classify_expr(expr.0.slice(), addr_size),
        Ok(Some(AttributeValue::Block(block))) => classify_expr(block.slice(), addr_size),
        _ => (VarLocation::Optimized, 0),
    }
}

/// First-opcode classification of a location expression.
///
/// The opcode ranges deliberately match the original loader, including its
/// quirk of leaving `DW_OP_reg0` unclassified.
pub(crate) fn classify_expr(expr: &[u8], addr_size: u8) -> (VarLocation, u64) {
    let [op, operands @ ..] = expr else {
        return (VarLocation::Unknown, 0);
    };
    let op = *op;

    if op == gimli::DW_OP_addr.0 {
        return (VarLocation::Global, read_address(operands, addr_size));
    }
    if (gimli::DW_OP_reg1.0..=gimli::DW_OP_reg31.0).contains(&op)
        || (gimli::DW_OP_breg0.0..=gimli::DW_OP_breg31.0).contains(&op)
    {
        return (VarLocation::Register, 0);
    }
    if op == gimli::DW_OP_fbreg.0 {
        return (VarLocation::Local, 0);
    }
    (VarLocation::Unknown, 0)
}

/// Little-endian address operand; short operands read as 0.
fn read_address(operands: &[u8], addr_size: u8) -> u64 {
    let len = usize::from(addr_size).min(8);
    let Some(bytes) = operands.get(..len) else {
        return 0;
    };
    let mut buf = [0u8; 8];
    buf[..len].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_expr() {
        // empty expression stays unclassified
        assert_eq!(classify_expr(&[], 8), (VarLocation::Unknown, 0));

        let mut addr = vec![gimli::DW_OP_addr.0];
        addr.extend_from_slice(&0x0060_1040u64.to_le_bytes());
        assert_eq!(classify_expr(&addr, 8), (VarLocation::Global, 0x60_1040));

        assert_eq!(
            classify_expr(&[gimli::DW_OP_reg5.0], 8),
            (VarLocation::Register, 0)
        );
        assert_eq!(
            classify_expr(&[gimli::DW_OP_breg0.0, 0x10], 8),
            (VarLocation::Register, 0)
        );
        assert_eq!(
            classify_expr(&[gimli::DW_OP_fbreg.0, 0x7c], 8),
            (VarLocation::Local, 0)
        );
        // reg0 is left unclassified, matching the loader this models
        assert_eq!(
            classify_expr(&[gimli::DW_OP_reg0.0], 8),
            (VarLocation::Unknown, 0)
        );
    }

    #[test]
    fn test_global_addr_four_byte() {
        let mut addr = vec![gimli::DW_OP_addr.0];
        addr.extend_from_slice(&0x8048_1234u32.to_le_bytes());
        assert_eq!(classify_expr(&addr, 4), (VarLocation::Global, 0x8048_1234));
        // truncated operand reads as 0
        assert_eq!(
            classify_expr(&[gimli::DW_OP_addr.0, 0x12], 8),
            (VarLocation::Global, 0)
        );
    }
}
