//! Typed error kinds for the exploration engine.
//!
//! `ConfigError`, `IngestError`, and `MappingError` are run-fatal: the driver
//! propagates them with `?` and the process exits non-zero. `ReplayError`,
//! `PfsUnavailable`, and `CheckerFailed` are per-state: the replay loop
//! catches them, records the state's verdict, and keeps going.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required key `{0}` in [{1}]")]
    MissingKey(String, String),
    #[error("unknown file system type `{0}`")]
    UnknownFsType(String),
    #[error("service `{0}` referenced in [global].services has no [{0}] section")]
    UnknownService(String),
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}:{1}: could not parse trace line: {2}")]
    MalformedLine(PathBuf, usize, String),
    #[error("unrecognized required opcode `{0}`")]
    UnknownOpcode(String),
    #[error("workload Pwrites target more than one file ({0} and {1})")]
    NotUniqueFile(String, String),
    #[error("rank {0} has {1} barriers but rank {2} has {3}")]
    BarrierCountMismatch(usize, usize, usize, usize),
    #[error("descriptor {0} referenced before it was opened")]
    UnknownDescriptor(i64),
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("no server-side write matches client write at offset {offset} length {length} on {path}")]
    NoMatchingCall {
        path: String,
        offset: u64,
        length: u64,
    },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay of {op} on {path} failed: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PfsUnavailable {
    #[error("snapshot copy exceeded {0}s, cluster recovered via full clean restart")]
    SaveTimeout(u64),
    #[error("checker invocation exceeded {0}s, cluster recovered via full clean restart")]
    CheckerTimeout(u64),
}

#[derive(Debug, Error)]
#[error("checker exited with status {0:?} on state {1}")]
pub struct CheckerFailed(pub Option<i32>, pub usize);

/// Top-level error a caller of the engine's entry points may see.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}
