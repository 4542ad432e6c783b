//! Seam to the out-of-process audio engine
//!
//! The engine hosts the native plugins and runs the real-time graph. The
//! controller only talks to it through [`EngineGateway`]; instance ids it hands
//! out are valid for the lifetime of one engine process.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use thiserror::Error;

#[cfg(test)]
pub mod mock;

/// Engine-assigned handle to a loaded plugin instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        InstanceId(s.to_string())
    }
}

/// Serialized plugin state blob. Never interpreted here, only carried.
///
/// Stored in JSON as a standard base64 string.
#[derive(Clone, PartialEq, Eq)]
pub struct StateToken(pub Vec<u8>);

impl StateToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateToken({} bytes)", self.0.len())
    }
}

impl Serialize for StateToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for StateToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(StateToken)
            .map_err(serde::de::Error::custom)
    }
}

/// What the engine reports back after a successful load
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub instance_id: InstanceId,
    pub has_editor: bool,
}

/// Failure classes reported by the engine gateway
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Invalid or incompatible plugin file
    #[error("load failed: {0}")]
    Load(String),
    /// Unknown instance id
    #[error("instance not found: {0}")]
    NotFound(InstanceId),
    /// The engine process was replaced since the id was issued
    #[error("engine was reset")]
    Reset,
    /// get/set of the opaque state failed
    #[error("state transfer failed: {0}")]
    State(String),
    /// The engine cannot be reached at all
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine refused the request for another reason
    #[error("{0}")]
    Rejected(String),
}

impl EngineError {
    /// Errors that mean the id space we hold no longer matches the engine.
    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::NotFound(_) | EngineError::Reset)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Request/response operations of the audio engine.
///
/// Implementations own the transport. Every call is awaited by the controller;
/// no call is cancelled midway and there is no per-call timeout.
pub trait EngineGateway: Send + Sync + 'static {
    fn load(&self, path: &str) -> impl Future<Output = EngineResult<LoadedPlugin>> + Send;

    fn remove(&self, id: &InstanceId) -> impl Future<Output = EngineResult<()>> + Send;

    /// `active == true` bypasses the plugin.
    fn set_bypass(&self, id: &InstanceId, active: bool)
        -> impl Future<Output = EngineResult<()>> + Send;

    fn set_mute(&self, id: &InstanceId, active: bool)
        -> impl Future<Output = EngineResult<()>> + Send;

    fn set_gain(&self, id: &InstanceId, value: f32) -> impl Future<Output = EngineResult<()>> + Send;

    /// `order` must be a permutation of every loaded id.
    fn reorder(&self, order: &[InstanceId]) -> impl Future<Output = EngineResult<()>> + Send;

    fn get_state(&self, id: &InstanceId) -> impl Future<Output = EngineResult<StateToken>> + Send;

    fn set_state(&self, id: &InstanceId, state: &StateToken)
        -> impl Future<Output = EngineResult<()>> + Send;

    fn open_editor(&self, id: &InstanceId) -> impl Future<Output = EngineResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_token_serializes_as_base64() {
        let token = StateToken(vec![0, 1, 2, 250]);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"AAEC+g==\"");

        let back: StateToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_state_token_rejects_garbage() {
        let parsed = serde_json::from_str::<StateToken>("\"not base64!!\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_stale_classification() {
        assert!(EngineError::NotFound(InstanceId::from("a")).is_stale());
        assert!(EngineError::Reset.is_stale());
        assert!(!EngineError::Load("bad file".into()).is_stale());
        assert!(!EngineError::State("oops".into()).is_stale());
    }
}
