use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::batch::{BatchReport, SkippedPlugin};
use super::{SessionController, SessionPhase};
use crate::chain::{Mutation, PluginInstanceRecord, MAX_GAIN, MIN_GAIN, UNITY_GAIN};
use crate::engine::{EngineGateway, InstanceId, LoadedPlugin, StateToken};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::session::{SessionStore, SnapshotEntry};

/// Load `path` with the durable pending marker set around the call.
pub(super) async fn load_marked<G: EngineGateway>(
    gateway: &G,
    store: &SessionStore,
    path: &str,
) -> Result<LoadedPlugin, SessionError> {
    if let Err(e) = store.mark_pending(path) {
        log::warn!("Could not write pending-load marker for {}: {}", path, e);
    }
    let result = gateway.load(path).await;
    if let Err(e) = store.clear_pending(path) {
        log::warn!("Could not clear pending-load marker for {}: {}", path, e);
    }
    result.map_err(|e| SessionError::from_engine(e, path))
}

/// Load one entry and bring its settings and state back.
///
/// Settings the engine refuses are logged; the record keeps the engine's
/// value for them, so the model never claims what the engine did not accept.
pub(super) async fn load_entry<G: EngineGateway>(
    gateway: &G,
    store: &SessionStore,
    entry: &SnapshotEntry,
) -> Result<PluginInstanceRecord, SessionError> {
    let loaded = load_marked(gateway, store, &entry.path).await?;
    let mut record =
        PluginInstanceRecord::loaded(loaded.instance_id, &entry.descriptor(), loaded.has_editor);
    apply_settings(gateway, &mut record, entry).await;
    Ok(record)
}

async fn apply_settings<G: EngineGateway>(
    gateway: &G,
    record: &mut PluginInstanceRecord,
    entry: &SnapshotEntry,
) {
    let id = record.instance_id.clone();

    if let Some(token) = &entry.state {
        apply_state(gateway, record, token).await;
    }

    if !entry.enabled {
        match gateway.set_bypass(&id, true).await {
            Ok(()) => record.enabled = false,
            Err(e) => log::warn!("Could not bypass {} after load: {}", record.name, e),
        }
    }

    if entry.muted {
        match gateway.set_mute(&id, true).await {
            Ok(()) => record.muted = true,
            Err(e) => log::warn!("Could not mute {} after load: {}", record.name, e),
        }
    }

    let gain = if entry.gain.is_finite() {
        entry.gain.clamp(MIN_GAIN, MAX_GAIN)
    } else {
        UNITY_GAIN
    };
    if gain != UNITY_GAIN {
        match gateway.set_gain(&id, gain).await {
            Ok(()) => record.gain = gain,
            Err(e) => log::warn!("Could not set gain of {} after load: {}", record.name, e),
        }
    }
}

async fn apply_state<G: EngineGateway>(
    gateway: &G,
    record: &mut PluginInstanceRecord,
    token: &StateToken,
) {
    match gateway.set_state(&record.instance_id, token).await {
        Ok(()) => record.state = Some(token.clone()),
        Err(e) => log::warn!("Could not restore state of {}: {}", record.name, e),
    }
}

impl<G: EngineGateway> SessionController<G> {
    /// Cold-start restore: load every snapshot entry concurrently and rebuild
    /// the chain in snapshot order from the ones that succeeded.
    pub async fn restore(&self) -> Result<BatchReport, SessionError> {
        {
            let mut phase = self.phase.lock();
            if *phase != SessionPhase::Fresh {
                return Err(SessionError::AlreadyRestored);
            }
            *phase = SessionPhase::Restoring;
        }
        let _guard = self.structural.lock().await;

        self.consume_crash_evidence();

        let snapshot = match self.store.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Could not read saved session: {}", e);
                self.notify(SessionEvent::Warning {
                    message: format!("Saved session could not be read: {}", e),
                });
                Vec::new()
            }
        };
        log::info!("Restoring session with {} plugins", snapshot.len());

        let mut slots: Vec<Option<PluginInstanceRecord>> = vec![None; snapshot.len()];
        let mut skipped = Vec::new();
        let mut tasks = JoinSet::new();

        for (index, entry) in snapshot.iter().enumerate() {
            if self.is_blacklisted(&entry.path) {
                skipped.push(SkippedPlugin::new(index, &entry.path, "blacklisted after a crash"));
                continue;
            }
            let gateway = Arc::clone(&self.gateway);
            let store = Arc::clone(&self.store);
            let entry = entry.clone();
            tasks.spawn(async move {
                let result = load_entry(gateway.as_ref(), &store, &entry).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(record))) => slots[index] = Some(record),
                Ok((index, Err(e))) => {
                    skipped.push(SkippedPlugin::new(index, &snapshot[index].path, &e.to_string()))
                }
                Err(e) => log::error!("Restore task failed: {}", e),
            }
        }
        skipped.sort_by_key(|s| s.index);

        let records: Vec<PluginInstanceRecord> = slots.into_iter().flatten().collect();
        let report = BatchReport {
            loaded: records.len(),
            skipped,
        };
        self.chain.settle(Mutation::Committed(records))?;
        self.report_skipped(&report);

        self.set_phase(SessionPhase::Ready);
        self.persist_gate.store(true, Ordering::SeqCst);
        self.notify(SessionEvent::SessionRestored {
            loaded: report.loaded,
            failed: report.skipped.len(),
        });
        log::info!(
            "Session restored: {} loaded, {} failed",
            report.loaded,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Rebuild the chain from the snapshot after the engine died, one load at
    /// a time. `excluded` (or, failing that, the path of a load that was in
    /// flight) is skipped instead of retried.
    pub async fn recover(&self, excluded: Option<&str>) -> Result<BatchReport, SessionError> {
        let _guard = self.structural.lock().await;
        let gate_was_open = self.persist_gate.swap(false, Ordering::SeqCst);

        let in_flight = self.consume_crash_evidence();
        let excluded = excluded.map(str::to_string).or(in_flight);

        let snapshot = match self.store.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.persist_gate.store(gate_was_open, Ordering::SeqCst);
                return Err(self.fail(e.into()));
            }
        };
        log::warn!(
            "Recovering chain after engine failure ({} plugins, excluding {:?})",
            snapshot.len(),
            excluded
        );

        self.discard_engine_instances().await;
        let (records, skipped) = self.load_sequential(&snapshot, excluded.as_deref()).await;
        let report = BatchReport {
            loaded: records.len(),
            skipped,
        };
        self.tickets.lock().clear();
        self.successors.lock().clear();
        self.chain.settle(Mutation::Committed(records))?;
        self.report_skipped(&report);

        self.set_phase(SessionPhase::Ready);
        self.persist_gate.store(true, Ordering::SeqCst);
        self.notify(SessionEvent::ChainReloaded {
            loaded: report.loaded,
            failed: report.skipped.len(),
        });
        Ok(report)
    }

    /// A marker left behind means a load never settled: blacklist that path.
    fn consume_crash_evidence(&self) -> Option<String> {
        match self.store.take_pending() {
            Ok(Some(pending)) => {
                log::warn!(
                    "Plugin load of {} (started {}) never finished",
                    pending.path,
                    pending.started_at
                );
                self.blacklist.lock().add(&pending.path);
                self.notify(SessionEvent::CrashEvidence {
                    path: pending.path.clone(),
                });
                Some(pending.path)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Could not read pending-load marker: {}", e);
                None
            }
        }
    }

    /// Best-effort removal of every id the model holds.
    pub(super) async fn discard_engine_instances(&self) {
        for record in self.chain.current().iter() {
            if let Err(e) = self.gateway.remove(&record.instance_id).await {
                log::debug!("Discarding {} failed: {}", record.instance_id, e);
            }
        }
    }

    /// Load `entries` one after another. Failures, blacklisted paths and the
    /// excluded path are skipped and reported, never fatal.
    pub(super) async fn load_sequential(
        &self,
        entries: &[SnapshotEntry],
        excluded: Option<&str>,
    ) -> (Vec<PluginInstanceRecord>, Vec<SkippedPlugin>) {
        let mut records = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if excluded == Some(entry.path.as_str()) {
                log::warn!("Skipping {}: implicated in the engine crash", entry.path);
                skipped.push(SkippedPlugin::new(index, &entry.path, "excluded after engine crash"));
                continue;
            }
            if self.is_blacklisted(&entry.path) {
                skipped.push(SkippedPlugin::new(index, &entry.path, "blacklisted after a crash"));
                continue;
            }
            match load_entry(self.gateway.as_ref(), &self.store, entry).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("Skipping {}: {}", entry.path, e);
                    skipped.push(SkippedPlugin::new(index, &entry.path, &e.to_string()));
                }
            }
        }
        (records, skipped)
    }

    /// Reload every record in the model from its path with fresh ids.
    /// Caller holds the structural guard.
    pub(super) async fn reload_chain_locked(&self) -> BatchReport {
        let prior = self.chain.current();
        log::warn!("Engine ids are stale, reloading {} plugins", prior.len());

        let entries: Vec<SnapshotEntry> = prior
            .iter()
            .map(|r| SnapshotEntry::from_record(r, r.state.clone()))
            .collect();

        self.discard_engine_instances().await;
        let (records, skipped) = self.load_sequential(&entries, None).await;

        // Records come back in entry order, minus the skipped indices
        let lost: HashSet<usize> = skipped.iter().map(|s| s.index).collect();
        let retired = prior
            .iter()
            .enumerate()
            .filter(|(index, _)| !lost.contains(index))
            .map(|(_, r)| r.instance_id.clone());
        self.successors
            .lock()
            .reloaded(retired.zip(records.iter().map(|r| r.instance_id.clone())));

        let report = BatchReport {
            loaded: records.len(),
            skipped,
        };
        self.tickets.lock().clear();
        self.chain.replace(records);
        self.report_skipped(&report);
        self.notify(SessionEvent::ChainReloaded {
            loaded: report.loaded,
            failed: report.skipped.len(),
        });
        report
    }

    /// Stale-id fallback for `id`: reload the chain if the model still holds
    /// it, then return the id its record was reloaded under. An id that left
    /// the model any other way (removed, replaced by a preset) has no
    /// successor and stays unknown.
    /// Caller holds the structural guard.
    pub(super) async fn fallback_locked(&self, id: &InstanceId) -> Result<InstanceId, SessionError> {
        let reloading = self.chain.find(id).map(|(_, record)| record.path);
        if reloading.is_some() {
            self.reload_chain_locked().await;
        }
        let fresh = self.successors.lock().follow(id).cloned();
        match fresh {
            Some(fresh) if self.chain.find(&fresh).is_some() => Ok(fresh),
            _ => match reloading {
                Some(path) => Err(SessionError::TargetLost(path)),
                None => Err(SessionError::UnknownInstance(id.clone())),
            },
        }
    }

    /// Same as [`fallback_locked`](Self::fallback_locked), taking the guard.
    pub(super) async fn fallback(&self, id: &InstanceId) -> Result<InstanceId, SessionError> {
        let _guard = self.structural.lock().await;
        self.fallback_locked(id).await
    }

    pub(super) fn report_skipped(&self, report: &BatchReport) {
        for skipped in &report.skipped {
            self.notify(SessionEvent::PluginSkipped {
                path: skipped.path.clone(),
                reason: skipped.reason.clone(),
            });
        }
    }
}
