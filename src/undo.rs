//! Time-boxed reversible actions (the "Undo" offered after a removal)

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::chain::PluginInstanceRecord;
use crate::engine::StateToken;
use crate::session::SnapshotEntry;

/// A value that can be redeemed until its deadline passes.
#[derive(Debug, Clone)]
pub struct ReversibleAction<T> {
    id: Uuid,
    payload: T,
    expires_at: Instant,
}

impl<T> ReversibleAction<T> {
    pub fn new(payload: T, window: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            expires_at: Instant::now() + window,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Take the payload if the window is still open.
    pub fn redeem(self) -> Option<T> {
        if self.is_expired() {
            None
        } else {
            Some(self.payload)
        }
    }
}

/// Everything needed to bring a removed plugin back
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedPlugin {
    pub path: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub enabled: bool,
    pub muted: bool,
    pub gain: f32,
    /// Captured before removal; `None` if the capture failed
    pub state: Option<StateToken>,
    /// Position it had in the chain (informational; undo appends at the end)
    pub former_index: usize,
}

impl RemovedPlugin {
    pub fn capture(record: &PluginInstanceRecord, index: usize, state: Option<StateToken>) -> Self {
        Self {
            path: record.path.clone(),
            name: record.name.clone(),
            vendor: record.vendor.clone(),
            version: record.version.clone(),
            enabled: record.enabled,
            muted: record.muted,
            gain: record.gain,
            state,
            former_index: index,
        }
    }

    /// What to load to bring it back
    pub fn to_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            path: self.path.clone(),
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            version: self.version.clone(),
            enabled: self.enabled,
            muted: self.muted,
            gain: self.gain,
            state: self.state.clone(),
        }
    }
}

pub type UndoRemove = ReversibleAction<RemovedPlugin>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_redeem_inside_window() {
        let action = ReversibleAction::new(7, Duration::from_secs(5));
        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(!action.is_expired());
        assert_eq!(action.redeem(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_action_refuses() {
        let action = ReversibleAction::new("x", Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(action.remaining(), Duration::ZERO);
        assert_eq!(action.redeem(), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ReversibleAction::new((), Duration::from_secs(1));
        let b = ReversibleAction::new((), Duration::from_secs(1));
        assert_ne!(a.id(), b.id());
    }
}
