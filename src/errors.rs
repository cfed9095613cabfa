// src/errors.rs

//! Crate-wide error types.
//!
//! Procfile problems are reported as [`Diagnostic`]s so the parser can keep
//! going and list every error in one pass instead of stopping at the first.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single problem found while reading a Procfile.
///
/// `line` is 1-based; 0 means the diagnostic applies to the file as a whole
/// (e.g. a dependency cycle). `col` is 1-based; 0 means "whole line".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn file_scope(message: impl Into<String>) -> Self {
        Self { line: 0, col: 0, message: message.into() }
    }

    pub fn at(line: usize, message: impl Into<String>) -> Self {
        Self { line, col: 0, message: message.into() }
    }

    pub fn at_col(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self { line, col, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.col) {
            (0, _) => write!(f, "{}", self.message),
            (line, 0) => write!(f, "line {}: {}", line, self.message),
            (line, col) => write!(f, "line {}, col {}: {}", line, col, self.message),
        }
    }
}

/// All diagnostics collected while parsing one Procfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcfileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl ProcfileError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }
}

impl fmt::Display for ProcfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostics.len() == 1 {
            return write!(f, "{}", self.diagnostics[0]);
        }
        writeln!(f, "{} errors:", self.diagnostics.len())?;
        for (i, d) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcfileError {}

#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("{0}")]
    Procfile(#[from] ProcfileError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProctorError>;
