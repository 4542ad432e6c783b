use super::recovery::{load_entry, load_marked};
use super::{Field, SessionController};
use crate::chain::model::ids_of;
use crate::chain::{
    is_permutation, validate_gain, Chain, Mutation, PluginDescriptor, PluginInstanceRecord,
};
use crate::engine::{EngineGateway, EngineResult, InstanceId, StateToken};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::undo::{RemovedPlugin, UndoRemove};

/// A new value for one field of a record
#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldValue {
    Enabled(bool),
    Muted(bool),
    Gain(f32),
}

impl FieldValue {
    fn field(self) -> Field {
        match self {
            FieldValue::Enabled(_) => Field::Enabled,
            FieldValue::Muted(_) => Field::Muted,
            FieldValue::Gain(_) => Field::Gain,
        }
    }

    /// The value `record` currently holds for `field`
    fn read(field: Field, record: &PluginInstanceRecord) -> Self {
        match field {
            Field::Enabled => FieldValue::Enabled(record.enabled),
            Field::Muted => FieldValue::Muted(record.muted),
            Field::Gain => FieldValue::Gain(record.gain),
        }
    }

    fn write(self, record: &mut PluginInstanceRecord) {
        match self {
            FieldValue::Enabled(v) => record.enabled = v,
            FieldValue::Muted(v) => record.muted = v,
            FieldValue::Gain(v) => record.gain = v,
        }
    }

    async fn send<G: EngineGateway>(self, gateway: &G, id: &InstanceId) -> EngineResult<()> {
        match self {
            // The engine speaks in bypass, the chain in enabled
            FieldValue::Enabled(v) => gateway.set_bypass(id, !v).await,
            FieldValue::Muted(v) => gateway.set_mute(id, v).await,
            FieldValue::Gain(v) => gateway.set_gain(id, v).await,
        }
    }
}

impl<G: EngineGateway> SessionController<G> {
    /// Load a plugin and append it to the end of the chain with default settings.
    pub async fn add(
        &self,
        descriptor: &PluginDescriptor,
    ) -> Result<PluginInstanceRecord, SessionError> {
        if self.is_blacklisted(&descriptor.path) {
            return Err(self.fail(SessionError::Blacklisted(descriptor.path.clone())));
        }
        let _guard = self.structural.lock().await;

        let loaded = load_marked(self.gateway.as_ref(), &self.store, &descriptor.path)
            .await
            .map_err(|e| self.fail(e))?;
        let record = PluginInstanceRecord::loaded(loaded.instance_id, descriptor, loaded.has_editor);
        log::info!("Added {} as {}", record.name, record.instance_id);

        self.append(record.clone())?;
        Ok(record)
    }

    /// Remove a plugin. The returned action brings it back (state included)
    /// until the undo window closes.
    pub async fn remove(&self, id: &InstanceId) -> Result<UndoRemove, SessionError> {
        let _guard = self.structural.lock().await;
        let (index, record) = self.locate(id)?;

        let mut state = self.capture_state(&record, id).await;
        let mut target = id.clone();

        if let Err(e) = self.gateway.remove(id).await {
            let err = SessionError::from_engine(e, &record.path);
            if !err.is_stale() {
                return Err(self.fail(err));
            }
            target = self
                .fallback_locked(id)
                .await
                .map_err(|e| self.fail(e))?;
            if state.is_none() {
                state = self.capture_state(&record, &target).await;
            }
            self.gateway
                .remove(&target)
                .await
                .map_err(|e| self.fail(SessionError::from_engine(e, &record.path)))?;
        }

        let next: Vec<PluginInstanceRecord> = self
            .chain
            .current()
            .iter()
            .filter(|r| r.instance_id != target)
            .cloned()
            .collect();
        self.chain.settle(Mutation::Committed(next))?;
        self.tickets.lock().forget(&target);
        self.successors.lock().forget(&target);

        let action = UndoRemove::new(
            RemovedPlugin::capture(&record, index, state),
            self.config.undo_window(),
        );
        log::info!("Removed {} ({}), undo until {:?}", record.name, target, action.expires_at());
        self.notify(SessionEvent::UndoAvailable {
            action_id: action.id(),
            name: record.name.clone(),
            expires_in_ms: action.remaining().as_millis() as u64,
        });
        Ok(action)
    }

    /// Bring a removed plugin back at the end of the chain, with its settings
    /// and captured state.
    pub async fn undo_remove(
        &self,
        action: UndoRemove,
    ) -> Result<PluginInstanceRecord, SessionError> {
        let removed = action
            .redeem()
            .ok_or_else(|| self.fail(SessionError::UndoExpired))?;
        let _guard = self.structural.lock().await;

        let record = load_entry(self.gateway.as_ref(), &self.store, &removed.to_entry())
            .await
            .map_err(|e| self.fail(e))?;
        log::info!("Undo: restored {} as {}", record.name, record.instance_id);

        self.append(record.clone())?;
        Ok(record)
    }

    pub async fn set_enabled(&self, id: &InstanceId, enabled: bool) -> Result<(), SessionError> {
        self.set_field(id, FieldValue::Enabled(enabled)).await
    }

    /// Flip bypass. Returns the new enabled flag.
    pub async fn toggle_enabled(&self, id: &InstanceId) -> Result<bool, SessionError> {
        let (_, record) = self
            .chain
            .find(id)
            .ok_or_else(|| self.fail(SessionError::UnknownInstance(id.clone())))?;
        let enabled = !record.enabled;
        self.set_enabled(id, enabled).await?;
        Ok(enabled)
    }

    pub async fn set_muted(&self, id: &InstanceId, muted: bool) -> Result<(), SessionError> {
        self.set_field(id, FieldValue::Muted(muted)).await
    }

    /// Set linear output gain in `[0, 2]`. Out-of-range values are refused
    /// before anything is sent.
    pub async fn set_gain(&self, id: &InstanceId, gain: f32) -> Result<(), SessionError> {
        let gain = validate_gain(gain).map_err(|e| self.fail(e))?;
        self.set_field(id, FieldValue::Gain(gain)).await
    }

    /// Put the chain into `order`, which must name every record exactly once.
    pub async fn reorder(&self, order: &[InstanceId]) -> Result<(), SessionError> {
        let _guard = self.structural.lock().await;
        let current = self.chain.current();
        if !is_permutation(&current, order) {
            return Err(self.fail(SessionError::InvalidOrder));
        }
        let prior = ids_of(&current);
        if prior == order {
            return Ok(());
        }

        self.chain.replace(self.chain.reordered(order));
        let err = match self.gateway.reorder(order).await {
            Ok(()) => return Ok(()),
            Err(e) => SessionError::from_engine(e, "chain"),
        };

        let restored = self.chain.reordered(&prior);
        if err.is_stale() {
            self.chain.replace(restored);
            self.reload_chain_locked().await;
            return self.retry_reorder(order, err).await;
        }
        self.chain
            .settle(Mutation::RolledBack {
                restored,
                error: err,
            })
            .map(|_| ())
            .map_err(|e| self.fail(e))
    }

    /// Replay `order` on the ids a stale reload handed out. Fails with `cause`
    /// when a plugin it names did not come back.
    async fn retry_reorder(
        &self,
        order: &[InstanceId],
        cause: SessionError,
    ) -> Result<(), SessionError> {
        let fresh: Option<Vec<InstanceId>> = {
            let successors = self.successors.lock();
            order.iter().map(|id| successors.follow(id).cloned()).collect()
        };
        let reloaded = self.chain.current();
        let fresh = match fresh {
            Some(fresh) if is_permutation(&reloaded, &fresh) => fresh,
            _ => return Err(self.fail(cause)),
        };

        log::info!("Retrying reorder on reloaded chain");
        self.chain.replace(self.chain.reordered(&fresh));
        let err = match self.gateway.reorder(&fresh).await {
            Ok(()) => return Ok(()),
            Err(e) => SessionError::from_engine(e, "chain"),
        };
        self.chain
            .settle(Mutation::RolledBack {
                restored: reloaded.as_ref().clone(),
                error: err,
            })
            .map(|_| ())
            .map_err(|e| self.fail(e))
    }

    /// Ask the engine to show the plugin's editor window. Returns the id the
    /// editor was opened for, which differs from `id` after a stale-id reload.
    pub async fn open_editor(&self, id: &InstanceId) -> Result<InstanceId, SessionError> {
        let (_, record) = self.locate(id)?;

        let target = match self.gateway.open_editor(id).await {
            Ok(()) => id.clone(),
            Err(e) if e.is_stale() => {
                let fresh = self.fallback(id).await.map_err(|e| self.fail(e))?;
                self.gateway
                    .open_editor(&fresh)
                    .await
                    .map_err(|e| self.fail(SessionError::from_engine(e, &record.path)))?;
                fresh
            }
            Err(e) => return Err(self.fail(SessionError::from_engine(e, &record.path))),
        };

        self.notify(SessionEvent::EditorOpened {
            instance_id: target.clone(),
        });
        Ok(target)
    }

    async fn set_field(&self, id: &InstanceId, value: FieldValue) -> Result<(), SessionError> {
        self.locate(id)?;
        match self.attempt_field(id, value).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_stale() => {
                log::warn!("{} is stale ({}), reloading chain", id, err);
                let fresh = self.fallback(id).await.map_err(|e| self.fail(e))?;
                self.attempt_field(&fresh, value)
                    .await
                    .map_err(|e| self.fail(e))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Optimistic write of one field. On a non-stale failure the field is
    /// reverted, unless a later write to the same field has been issued since.
    async fn attempt_field(&self, id: &InstanceId, value: FieldValue) -> Result<(), SessionError> {
        let field = value.field();
        let (_, prior) = self
            .chain
            .find(id)
            .ok_or_else(|| SessionError::UnknownInstance(id.clone()))?;
        let previous = FieldValue::read(field, &prior);

        let ticket = self.tickets.lock().issue(id, field);
        self.chain.patch(id, |r| value.write(r));

        let err = match value.send(self.gateway.as_ref(), id).await {
            Ok(()) => return Ok(()),
            Err(e) => SessionError::from_engine(e, &prior.path),
        };

        if !err.is_stale() {
            let tickets = self.tickets.lock();
            if tickets.is_latest(id, field, ticket) {
                log::debug!("Reverting {:?} of {} to {:?}", field, id, previous);
                self.chain.patch(id, |r| previous.write(r));
            } else {
                log::debug!("Not reverting {:?} of {}: superseded", field, id);
            }
        }
        Err(err)
    }

    /// Index and record of `id` in the current chain.
    fn locate(&self, id: &InstanceId) -> Result<(usize, PluginInstanceRecord), SessionError> {
        self.chain
            .find(id)
            .ok_or_else(|| self.fail(SessionError::UnknownInstance(id.clone())))
    }

    /// Best-effort state capture; falls back to the cached token.
    async fn capture_state(
        &self,
        record: &PluginInstanceRecord,
        id: &InstanceId,
    ) -> Option<StateToken> {
        match self.gateway.get_state(id).await {
            Ok(token) => Some(token),
            Err(e) => {
                log::warn!("Could not capture state of {}: {}", record.name, e);
                record.state.clone()
            }
        }
    }

    fn append(&self, record: PluginInstanceRecord) -> Result<Chain, SessionError> {
        let mut next = self.chain.current().as_ref().clone();
        next.push(record);
        self.chain.settle(Mutation::Committed(next))
    }
}
