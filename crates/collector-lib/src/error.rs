//! Error types shared across the engine
//!
//! Source and record errors are absorbed inside a cycle and surface only
//! as counters and log entries. Only [`EngineError`] ends a cycle early.

use crate::models::{ResourceType, SourceKind};
use std::time::Duration;
use thiserror::Error;

/// A source could not be read this cycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source timed out after {0:?}")]
    Timeout(Duration),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response from source: {0}")]
    InvalidResponse(String),
}

/// A single raw record could not be admitted into the cache
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("record field `{field}` is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("{kind} records are not accepted from {origin} sources")]
    WrongSource {
        kind: ResourceType,
        origin: SourceKind,
    },

    #[error("{kind} `{id}` from `{origin}` conflicts with the copy owned by `{owner}`")]
    Conflict {
        kind: ResourceType,
        id: String,
        origin: String,
        owner: String,
    },
}

/// Failure of the engine itself; the previous snapshot stays authoritative
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("cycle aborted: {0}")]
    CycleAborted(String),
}
