//! Error types for the loader library

use std::path::PathBuf;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("DWARF parsing error: {0}")]
    Gimli(#[from] gimli::Error),
    #[error("Object file error: {0}")]
    Object(#[from] object::Error),
    #[error("no debug information in {path}")]
    NoDebugInfo { path: PathBuf },
    #[error("expected DW_TAG_compile_unit, got {tag} at unit offset {offset:#x}")]
    WrongUnitRoot { tag: gimli::DwTag, offset: u64 },
    #[error("{tag} at {offset:#x} not handled")]
    UnhandledTag { tag: gimli::DwTag, offset: u64 },
}

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
