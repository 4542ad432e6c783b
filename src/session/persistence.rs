//! Session auto-save
//!
//! Writes the chain to the session store 2 s after the last change and every
//! 30 s regardless, because plugin-internal state (edited in the native
//! editor) changes without the chain changing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use super::snapshot::{SessionSnapshot, SnapshotEntry};
use super::store::SessionStore;
use crate::chain::{Chain, PluginInstanceRecord};
use crate::engine::EngineGateway;

/// Build a snapshot of `chain`, fetching each plugin's state on its own.
/// A failed fetch drops that entry's token, never the pass.
pub async fn snapshot_chain<G: EngineGateway>(
    gateway: &G,
    chain: &[PluginInstanceRecord],
) -> SessionSnapshot {
    let mut entries = Vec::with_capacity(chain.len());
    for record in chain {
        let state = match gateway.get_state(&record.instance_id).await {
            Ok(token) => Some(token),
            Err(e) => {
                log::warn!(
                    "Could not fetch state of '{}' ({}): {}",
                    record.name,
                    record.instance_id,
                    e
                );
                None
            }
        };
        entries.push(SnapshotEntry::from_record(record, state));
    }
    entries
}

/// One persistence pass. Skipped while the gate is closed; storage failures
/// are logged and swallowed.
pub async fn persist_once<G: EngineGateway>(
    gateway: &G,
    store: &SessionStore,
    chain: Chain,
    gate: &AtomicBool,
) -> bool {
    if !gate.load(Ordering::SeqCst) {
        log::debug!("Session save skipped: session not loaded");
        return false;
    }
    let snapshot = snapshot_chain(gateway, &chain).await;
    // Recovery may have closed the gate while states were being fetched
    if !gate.load(Ordering::SeqCst) {
        return false;
    }
    match store.save_snapshot(&snapshot) {
        Ok(()) => {
            log::debug!("Session saved ({} plugins)", snapshot.len());
            true
        }
        Err(e) => {
            log::warn!("Session auto-save failed: {}", e);
            false
        }
    }
}

pub struct PersistenceLoop<G: EngineGateway> {
    pub gateway: Arc<G>,
    pub store: Arc<SessionStore>,
    pub chain: watch::Receiver<Chain>,
    pub gate: Arc<AtomicBool>,
    pub debounce: Duration,
    pub interval: Duration,
}

/// Running loop; dropping it leaves the task running until the chain closes.
pub struct PersistenceHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PersistenceHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            log::error!("Session persistence task failed: {}", e);
        }
    }
}

impl<G: EngineGateway> PersistenceLoop<G> {
    pub fn spawn(self) -> PersistenceHandle {
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(shutdown.clone()));
        PersistenceHandle { shutdown, task }
    }

    async fn run(mut self, shutdown: Arc<Notify>) {
        log::info!(
            "Session persistence started (debounce {:?}, interval {:?})",
            self.debounce,
            self.interval
        );
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; the first periodic save is one period out
        ticker.tick().await;

        let mut deadline: Option<Instant> = None;

        loop {
            let debounce = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.notified() => break,
                changed = self.chain.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    deadline = Some(Instant::now() + self.debounce);
                }
                _ = debounce => {
                    deadline = None;
                    self.save().await;
                }
                _ = ticker.tick() => {
                    self.save().await;
                }
            }
        }
        log::info!("Session persistence stopped");
    }

    async fn save(&mut self) {
        let chain = self.chain.borrow_and_update().clone();
        persist_once(self.gateway.as_ref(), &self.store, chain, &self.gate).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainModel, PluginDescriptor};
    use crate::engine::mock::MockEngine;
    use crate::engine::{EngineGateway, StateToken};
    use tempfile::TempDir;

    async fn loaded(engine: &MockEngine, path: &str) -> PluginInstanceRecord {
        let loaded = engine.load(path).await.unwrap();
        PluginInstanceRecord::loaded(loaded.instance_id, &PluginDescriptor::new(path, path), true)
    }

    #[tokio::test]
    async fn test_failed_state_fetch_omits_token_only() {
        let engine = MockEngine::new();
        let a = loaded(&engine, "a.vst3").await;
        let b = loaded(&engine, "b.vst3").await;
        engine.fail_next("get_state", crate::engine::EngineError::State("busy".into()));

        let snap = snapshot_chain(&engine, &[a, b]).await;
        assert_eq!(snap.len(), 2);
        assert!(snap[0].state.is_none());
        assert_eq!(snap[1].state, Some(StateToken(b"state:b.vst3".to_vec())));
    }

    #[tokio::test]
    async fn test_closed_gate_skips_write() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let store = SessionStore::new(dir.path());
        let chain: Chain = Arc::new(vec![loaded(&engine, "a.vst3").await]);

        let gate = AtomicBool::new(false);
        assert!(!persist_once(&engine, &store, chain.clone(), &gate).await);
        assert!(!store.snapshot_path().exists());

        gate.store(true, Ordering::SeqCst);
        assert!(persist_once(&engine, &store, chain, &gate).await);
        assert_eq!(store.load_snapshot().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_then_interval() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let store = Arc::new(SessionStore::new(dir.path()));
        let model = ChainModel::new();

        let handle = PersistenceLoop {
            gateway: engine.clone(),
            store: store.clone(),
            chain: model.subscribe(),
            gate: Arc::new(AtomicBool::new(true)),
            debounce: Duration::from_secs(2),
            interval: Duration::from_secs(30),
        }
        .spawn();

        model.replace(vec![loaded(&engine, "a.vst3").await]);

        // Nothing before the debounce elapses
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!store.snapshot_path().exists());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.load_snapshot().unwrap().len(), 1);
        let fetches_after_debounce = engine.count_calls("get_state");

        // Internal plugin state changes without a chain change: picked up by the interval
        let id = model.current()[0].instance_id.clone();
        engine.set_instance_state(&id, StateToken(b"edited".to_vec()));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(engine.count_calls("get_state") > fetches_after_debounce);
        assert_eq!(
            store.load_snapshot().unwrap()[0].state,
            Some(StateToken(b"edited".to_vec()))
        );

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_coalesce_into_one_save() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let store = Arc::new(SessionStore::new(dir.path()));
        let model = ChainModel::new();

        let handle = PersistenceLoop {
            gateway: engine.clone(),
            store: store.clone(),
            chain: model.subscribe(),
            gate: Arc::new(AtomicBool::new(true)),
            debounce: Duration::from_secs(2),
            interval: Duration::from_secs(30),
        }
        .spawn();

        let rec = loaded(&engine, "a.vst3").await;
        for step in 0..5 {
            let mut r = rec.clone();
            r.gain = step as f32 * 0.1;
            model.replace(vec![r]);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(engine.count_calls("get_state"), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.count_calls("get_state"), 1);
        assert!((store.load_snapshot().unwrap()[0].gain - 0.4).abs() < 1e-6);

        handle.stop().await;
    }
}
