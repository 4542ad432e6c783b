//! Notifications for the presenting layer

use serde::Serialize;
use uuid::Uuid;

use crate::engine::InstanceId;

/// Events broadcast by the controller. The UI bridge forwards them as-is.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "warning")]
    Warning { message: String },
    /// One item of a batch load was skipped
    #[serde(rename = "plugin_skipped")]
    PluginSkipped { path: String, reason: String },
    #[serde(rename = "undo_available")]
    UndoAvailable {
        action_id: Uuid,
        name: String,
        expires_in_ms: u64,
    },
    /// A load was in flight when the previous run died
    #[serde(rename = "crash_evidence")]
    CrashEvidence { path: String },
    #[serde(rename = "session_restored")]
    SessionRestored { loaded: usize, failed: usize },
    #[serde(rename = "chain_reloaded")]
    ChainReloaded { loaded: usize, failed: usize },
    #[serde(rename = "editor_opened")]
    EditorOpened { instance_id: InstanceId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let json = serde_json::to_value(SessionEvent::PluginSkipped {
            path: "a.vst3".into(),
            reason: "bad".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "plugin_skipped");
        assert_eq!(json["path"], "a.vst3");
    }
}
