//! DIE-tree parsing: attribute readers, the per-tag factories and drivers,
//! the recode pass and bitfield type synthesis.

pub(crate) mod attributes;
pub(crate) mod bitfield;
pub(crate) mod die_parser;
pub(crate) mod location;
pub(crate) mod recoder;
