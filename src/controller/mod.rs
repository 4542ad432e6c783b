//! Plugin chain session controller
//!
//! Owns the chain model and keeps it consistent with the engine. Start-up
//! order is fixed:
//!
//! 1. [`SessionController::new`] builds an empty chain with persistence off.
//! 2. [`SessionController::restore`] (once per run) or
//!    [`SessionController::recover`] rebuilds the chain from the snapshot.
//! 3. [`SessionController::start_persistence`] turns on auto-save; it refuses
//!    to run before step 2 so an empty chain never overwrites the snapshot.

mod batch;
mod mutations;
mod recovery;


use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::chain::{Chain, ChainModel};
use crate::config::SessionConfig;
use crate::engine::{EngineGateway, InstanceId};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::presets::{FilePresetStore, PresetStore, TemplateLibrary};
use crate::session::{persist_once, Blacklist, PersistenceHandle, PersistenceLoop, SessionStore};

pub use batch::{BatchReport, SkippedPlugin};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Constructed, snapshot not consumed yet
    Fresh,
    Restoring,
    /// Restore or recovery finished; auto-save may run
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Enabled,
    Muted,
    Gain,
}

/// Per-field write generations, so a failed call only reverts a field that
/// no later call has written since.
#[derive(Default)]
struct FieldTickets {
    next: u64,
    latest: HashMap<(InstanceId, Field), u64>,
}

impl FieldTickets {
    fn issue(&mut self, id: &InstanceId, field: Field) -> u64 {
        self.next += 1;
        self.latest.insert((id.clone(), field), self.next);
        self.next
    }

    fn is_latest(&self, id: &InstanceId, field: Field, ticket: u64) -> bool {
        self.latest.get(&(id.clone(), field)) == Some(&ticket)
    }

    fn forget(&mut self, id: &InstanceId) {
        self.latest.retain(|(key, _), _| key != id);
    }

    /// Every id changed at once (reload, batch replace)
    fn clear(&mut self) {
        self.latest.clear();
    }
}

/// Where each id retired by a reload lives now. Only a reload hands out
/// successors; ids dropped any other way have none.
#[derive(Default)]
struct Successors {
    next: HashMap<InstanceId, InstanceId>,
}

impl Successors {
    /// A reload replaced each `(old, new)` pair. Earlier entries are carried
    /// forward, or dropped when their current id did not come back.
    fn reloaded(&mut self, pairs: impl IntoIterator<Item = (InstanceId, InstanceId)>) {
        let pairs: HashMap<InstanceId, InstanceId> = pairs.into_iter().collect();
        self.next.retain(|_, current| match pairs.get(&*current) {
            Some(fresh) => {
                *current = fresh.clone();
                true
            }
            None => false,
        });
        self.next.extend(pairs);
    }

    fn follow(&self, id: &InstanceId) -> Option<&InstanceId> {
        self.next.get(id)
    }

    fn forget(&mut self, id: &InstanceId) {
        self.next.retain(|_, current| *current != *id);
    }

    fn clear(&mut self) {
        self.next.clear();
    }
}

pub struct SessionController<G: EngineGateway> {
    gateway: Arc<G>,
    chain: ChainModel,
    store: Arc<SessionStore>,
    presets: Box<dyn PresetStore>,
    templates: TemplateLibrary,
    blacklist: Mutex<Blacklist>,
    events: broadcast::Sender<SessionEvent>,
    // Held by every structural mutation for its whole duration
    structural: tokio::sync::Mutex<()>,
    phase: Mutex<SessionPhase>,
    persist_gate: Arc<AtomicBool>,
    persistence: Mutex<Option<PersistenceHandle>>,
    tickets: Mutex<FieldTickets>,
    successors: Mutex<Successors>,
    config: SessionConfig,
}

impl<G: EngineGateway> SessionController<G> {
    /// Empty controller with file-backed stores under `config.data_dir`.
    pub fn new(gateway: Arc<G>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            chain: ChainModel::new(),
            store: Arc::new(SessionStore::new(&config.data_dir)),
            presets: Box::new(FilePresetStore::new(config.presets_dir())),
            templates: TemplateLibrary::new(config.templates_dir()),
            blacklist: Mutex::new(Blacklist::open(&config.data_dir)),
            events,
            structural: tokio::sync::Mutex::new(()),
            phase: Mutex::new(SessionPhase::Fresh),
            persist_gate: Arc::new(AtomicBool::new(false)),
            persistence: Mutex::new(None),
            tickets: Mutex::new(FieldTickets::default()),
            successors: Mutex::new(Successors::default()),
            config,
        }
    }

    /// Swap the preset store (e.g. for a cloud-backed one).
    pub fn with_preset_store(mut self, presets: Box<dyn PresetStore>) -> Self {
        self.presets = presets;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Current committed chain
    pub fn chain(&self) -> Chain {
        self.chain.current()
    }

    /// Watch every committed chain
    pub fn subscribe(&self) -> watch::Receiver<Chain> {
        self.chain.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn is_persisting(&self) -> bool {
        self.persistence.lock().is_some()
    }

    /// Turn on auto-save. Must run inside a tokio runtime, after restore/recover.
    pub fn start_persistence(&self) -> Result<(), SessionError> {
        if self.phase() != SessionPhase::Ready {
            return Err(SessionError::NotRestored);
        }
        let mut slot = self.persistence.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.persist_gate.store(true, Ordering::SeqCst);
        *slot = Some(
            PersistenceLoop {
                gateway: Arc::clone(&self.gateway),
                store: Arc::clone(&self.store),
                chain: self.chain.subscribe(),
                gate: Arc::clone(&self.persist_gate),
                debounce: self.config.autosave_debounce(),
                interval: self.config.autosave_interval(),
            }
            .spawn(),
        );
        Ok(())
    }

    /// Run one save pass right now. `false` if skipped or failed.
    pub async fn persist_now(&self) -> bool {
        persist_once(
            self.gateway.as_ref(),
            &self.store,
            self.chain.current(),
            &self.persist_gate,
        )
        .await
    }

    /// Stop auto-save after a final pass.
    pub async fn shutdown(&self) {
        let handle = self.persistence.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.persist_now().await;
    }

    pub fn blacklisted(&self) -> Vec<String> {
        self.blacklist.lock().paths.iter().cloned().collect()
    }

    pub fn unblacklist(&self, path: &str) -> bool {
        self.blacklist.lock().remove(path)
    }

    pub fn clear_blacklist(&self) {
        self.blacklist.lock().clear();
    }

    fn is_blacklisted(&self, path: &str) -> bool {
        self.blacklist.lock().contains(path)
    }

    fn notify(&self, event: SessionEvent) {
        // No subscriber is fine
        let _ = self.events.send(event);
    }

    /// Log a user-visible failure, emit it, hand it back for `?`.
    fn fail(&self, err: SessionError) -> SessionError {
        log::error!("{}", err);
        self.notify(SessionEvent::Error {
            message: err.to_string(),
        });
        err
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
    }
}
