//! Whole-chain replacement: presets and templates

use serde::Serialize;
use std::path::Path;

use super::SessionController;
use crate::chain::Mutation;
use crate::engine::{EngineError, EngineGateway};
use crate::error::SessionError;
use crate::presets::{ChainTemplate, Preset};
use crate::session::{snapshot_chain, SnapshotEntry};

/// Outcome of loading a list of plugins where single failures are not fatal
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedPlugin>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPlugin {
    /// Position in the requested list
    pub index: usize,
    pub path: String,
    pub reason: String,
}

impl SkippedPlugin {
    pub fn new(index: usize, path: &str, reason: &str) -> Self {
        Self {
            index,
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl<G: EngineGateway> SessionController<G> {
    /// Replace the chain with `entries`: remove everything, then load each
    /// entry in order. Entries that fail to load are skipped and reported.
    pub async fn replace_chain(&self, entries: &[SnapshotEntry]) -> Result<BatchReport, SessionError> {
        let _guard = self.structural.lock().await;
        self.replace_chain_locked(entries).await
    }

    async fn replace_chain_locked(
        &self,
        entries: &[SnapshotEntry],
    ) -> Result<BatchReport, SessionError> {
        let current = self.chain.current();
        log::info!(
            "Replacing chain of {} with {} plugins",
            current.len(),
            entries.len()
        );

        for (pos, record) in current.iter().enumerate() {
            match self.gateway.remove(&record.instance_id).await {
                Ok(()) => {}
                Err(EngineError::Unavailable(msg)) => {
                    // Keep what is still loaded so the model matches the engine
                    self.chain
                        .settle(Mutation::Committed(current[pos..].to_vec()))?;
                    return Err(self.fail(SessionError::Engine(msg)));
                }
                Err(e) => log::debug!("Ignoring removal failure of {}: {}", record.instance_id, e),
            }
        }
        self.tickets.lock().clear();
        self.successors.lock().clear();

        let (records, skipped) = self.load_sequential(entries, None).await;
        let report = BatchReport {
            loaded: records.len(),
            skipped,
        };
        self.chain.settle(Mutation::Committed(records))?;
        self.report_skipped(&report);
        if !report.is_complete() {
            log::warn!(
                "{} of {} plugins could not be loaded",
                report.skipped.len(),
                entries.len()
            );
        }
        Ok(report)
    }

    pub async fn apply_preset(&self, preset: &Preset) -> Result<BatchReport, SessionError> {
        log::info!("Applying preset '{}'", preset.name);
        self.replace_chain(&preset.plugins).await
    }

    /// Load a stored preset by name and apply it.
    pub async fn load_preset(&self, name: &str) -> Result<BatchReport, SessionError> {
        let preset = self.presets.load(name).map_err(|e| self.fail(e.into()))?;
        self.apply_preset(&preset).await
    }

    pub async fn apply_template(&self, template: &ChainTemplate) -> Result<BatchReport, SessionError> {
        log::info!("Applying template '{}'", template.name);
        self.replace_chain(&template.plugins).await
    }

    pub async fn apply_template_named(&self, name: &str) -> Result<BatchReport, SessionError> {
        let template = self.templates.get(name).map_err(|e| self.fail(e.into()))?;
        self.apply_template(&template).await
    }

    /// Every readable template in the templates folder
    pub fn templates(&self) -> Result<Vec<ChainTemplate>, SessionError> {
        Ok(self.templates.all()?)
    }

    /// Save the current chain, plugin state included, as preset `name`.
    pub async fn save_preset(&self, name: &str) -> Result<Preset, SessionError> {
        let chain = self.chain.current();
        let preset = Preset {
            name: name.to_string(),
            plugins: snapshot_chain(self.gateway.as_ref(), &chain).await,
        };
        self.presets.save(&preset).map_err(|e| self.fail(e.into()))?;
        Ok(preset)
    }

    pub fn list_presets(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.presets.list()?)
    }

    pub fn delete_preset(&self, name: &str) -> Result<(), SessionError> {
        self.presets.delete(name).map_err(|e| self.fail(e.into()))
    }

    pub fn export_preset(&self, name: &str, destination: &Path) -> Result<(), SessionError> {
        self.presets
            .export(name, destination)
            .map_err(|e| self.fail(e.into()))
    }

    /// Import a preset file; returns the name it was stored under.
    pub fn import_preset(&self, source: &Path) -> Result<String, SessionError> {
        self.presets.import(source).map_err(|e| self.fail(e.into()))
    }
}
