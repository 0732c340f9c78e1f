//! dwelve - DWARF declaration loader
//!
//! Walks the Debugging Information Entries of an ELF object's compilation
//! units and produces a strongly-typed, fully cross-linked model of the
//! C/C++ declarations they describe: types, variables, functions and
//! scopes. Loading runs three passes per CU: a recursive descent over the
//! DIE tree, a recode pass that rewrites raw DWARF offset references into
//! dense per-CU indices (synthesizing types for bitfield members along the
//! way), and a pass that caches member sizes.

// Core modules
pub mod core;

// Internal implementation modules
pub(crate) mod parser;
pub(crate) mod sizes;

// Main entry points
pub mod loader;

// Re-export the model and the loading surface
pub use crate::core::cu::{Cu, Cus, Table};
pub use crate::core::errors::{LoadError, Result};
pub use crate::core::model::{
    ArrayType, BaseType, Class, ClassMember, Enumerator, FType, Function, InlineExpansion, Label,
    LexBlock, Namespace, NodeId, Parameter, PtrToMember, Tag, TagData, TagKind, Type, VarLocation,
    Variable,
};
pub use crate::core::strings::{StringId, StringTable};
pub use crate::loader::{load_dwarf, load_file, CuSteal, LoadConfig, StealHook};
