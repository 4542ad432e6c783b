use serde::{Deserialize, Serialize};

use crate::chain::{PluginDescriptor, PluginInstanceRecord, UNITY_GAIN};
use crate::engine::StateToken;

fn default_true() -> bool {
    true
}

fn default_gain() -> f32 {
    UNITY_GAIN
}

/// One plugin of a persisted chain. Instance ids are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<StateToken>,
}

impl SnapshotEntry {
    /// Entry from a live record; `state` is whatever was fetched for it.
    pub fn from_record(record: &PluginInstanceRecord, state: Option<StateToken>) -> Self {
        Self {
            path: record.path.clone(),
            name: record.name.clone(),
            vendor: record.vendor.clone(),
            version: record.version.clone(),
            enabled: record.enabled,
            muted: record.muted,
            gain: record.gain,
            state,
        }
    }

    /// Entry with default settings, as used by templates and plain adds.
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Self {
        Self {
            path: descriptor.path.clone(),
            name: descriptor.name.clone(),
            vendor: descriptor.vendor.clone(),
            version: descriptor.version.clone(),
            enabled: true,
            muted: false,
            gain: UNITY_GAIN,
            state: None,
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            path: self.path.clone(),
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            version: self.version.clone(),
        }
    }
}

/// Ordered description of a chain, sufficient to rebuild it by reloading.
pub type SessionSnapshot = Vec<SnapshotEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let entry: SnapshotEntry =
            serde_json::from_str(r#"{"path":"C:\\VST3\\Comp.vst3","name":"Comp"}"#).unwrap();
        assert!(entry.enabled);
        assert!(!entry.muted);
        assert_eq!(entry.gain, 1.0);
        assert!(entry.state.is_none());
        assert_eq!(entry.vendor, "");
    }

    #[test]
    fn test_state_omitted_when_absent() {
        let entry = SnapshotEntry::from_descriptor(&PluginDescriptor::new("a.vst3", "A"));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("state"));
    }
}
