// src/procfile/mod.rs

//! Procfile reading.
//!
//! - [`lexer`]: shell-style tokenisation and physical-line handling.
//! - [`model`]: the immutable data model handed to the engine.
//! - [`parser`]: classification, options and whole-file validation.

pub mod lexer;
pub mod model;
pub mod parser;

use std::fs;
use std::path::Path;

pub use model::{
    Procfile, ProcessKind, ProcessSpec, ReadySpec, ReloadSignal, DEFAULT_DEBOUNCE,
    DEFAULT_SHUTDOWN_GRACE,
};
pub use parser::parse;

use crate::errors::{ProctorError, Result};

/// Read and parse a Procfile from disk.
pub fn load(path: impl AsRef<Path>) -> Result<Procfile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ProctorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse(&contents)?)
}
