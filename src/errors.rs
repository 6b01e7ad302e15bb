/// Error taxonomy
///
/// Core-engine errors (map/scope/regex) stay disjoint from this file —
/// each module owns its own error type close to the code that raises
/// it (`regex::compile::CompileError`, for instance). This module is
/// the ambient layer: configuration, CLI argument handling, and the
/// `Span` type `diagnostics.rs` renders pattern-offset errors against.

use std::path::PathBuf;
use thiserror::Error;

/// A half-open offset range into a pattern or config line, used for
/// rustc-style diagnostic rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("unknown configuration property: '{0}' (run `aero conf list` to see all)")]
    UnknownProperty(String),
    #[error("invalid `conf set` syntax: '{0}' (expected property=value)")]
    BadSetSyntax(String),
    #[error("cannot determine home directory to locate the config file")]
    NoHomeDir,
    #[error("config I/O error")]
    Io(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Conf(#[from] ConfError),
    #[error(transparent)]
    Regex(#[from] crate::regex::compile::CompileError),
    #[error("no such input file: {0}")]
    InputNotFound(PathBuf),
    #[error("I/O error reading {path}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}
