//! Error types for the session controller and its durable stores.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::{EngineError, InstanceId};

/// Failures of durable local state (session snapshot, marker, presets, config).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write, rename or delete a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is not valid JSON for the expected shape
    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize a value to JSON
    #[error("failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Preset not found
    #[error("preset not found: {0}")]
    PresetNotFound(String),

    /// Preset name cannot be used as a file name
    #[error("invalid preset name: {0:?}")]
    InvalidName(String),
}

impl StorageError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::CreateDir {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StorageError::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by [`SessionController`](crate::controller::SessionController) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine refused to load a plugin file
    #[error("failed to load plugin '{path}': {reason}")]
    Load { path: String, reason: String },

    /// The engine does not know this instance id (stale after a restart)
    #[error("plugin instance not found in engine: {0}")]
    NotFound(InstanceId),

    /// The engine process was replaced; every instance id is gone
    #[error("audio engine was reset")]
    EngineReset,

    /// Opaque plugin state could not be read or written
    #[error("plugin state transfer failed: {0}")]
    State(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Any other engine-side failure
    #[error("engine error: {0}")]
    Engine(String),

    /// The caller addressed an id that is not part of the chain model
    #[error("no plugin with id {0} in the chain")]
    UnknownInstance(InstanceId),

    /// The target could not be rematched after reloading the chain
    #[error("plugin '{0}' could not be found again after reloading the chain")]
    TargetLost(String),

    #[error("reorder must be a permutation of the current chain")]
    InvalidOrder,

    #[error("gain {0} is outside 0.0..=2.0")]
    GainOutOfRange(f32),

    #[error("session was already restored")]
    AlreadyRestored,

    #[error("session has not been restored yet")]
    NotRestored,

    #[error("undo window expired")]
    UndoExpired,

    #[error("plugin '{0}' is blacklisted after a crash")]
    Blacklisted(String),
}

impl SessionError {
    /// Wrap an engine error raised while working on `path`.
    pub fn from_engine(err: EngineError, path: &str) -> Self {
        match err {
            EngineError::Load(reason) => SessionError::Load {
                path: path.to_string(),
                reason,
            },
            EngineError::NotFound(id) => SessionError::NotFound(id),
            EngineError::Reset => SessionError::EngineReset,
            EngineError::State(msg) => SessionError::State(msg),
            EngineError::Unavailable(msg) | EngineError::Rejected(msg) => {
                SessionError::Engine(msg)
            }
        }
    }

    /// True when the error means instance ids went stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, SessionError::NotFound(_) | SessionError::EngineReset)
    }
}
