//! Dump failures
use std::io;

use thiserror::Error;

/// Errors that end a dump
///
/// Per-object introspection problems never surface here: they are
/// logged and counted in the dump statistics instead.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("sink failed after {records} records: {source}")]
    Sink {
        /// Records completely written before the failure
        records: u64,
        source: io::Error,
    },
    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid dump options: {0}")]
    Options(#[from] toml::de::Error),
}

impl DumpError {
    /// Records completely written before a sink failure
    pub fn records_written(&self) -> Option<u64> {
        match self {
            DumpError::Sink { records, .. } => Some(*records),
            _ => None,
        }
    }
}
