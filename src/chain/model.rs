use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use super::record::PluginInstanceRecord;
use crate::engine::InstanceId;
use crate::error::SessionError;

/// Immutable view of the chain at one point in time
pub type Chain = Arc<Vec<PluginInstanceRecord>>;

/// Result of a mutation, settled by the caller in one assignment
#[derive(Debug)]
pub enum Mutation {
    Committed(Vec<PluginInstanceRecord>),
    RolledBack {
        restored: Vec<PluginInstanceRecord>,
        error: SessionError,
    },
}

/// The authoritative ordered list of plugin records.
///
/// Every change swaps the whole list; subscribers (the persistence loop, the
/// UI bridge) see each committed list through a watch channel.
pub struct ChainModel {
    tx: watch::Sender<Chain>,
}

impl Default for ChainModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainModel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    pub fn current(&self) -> Chain {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Chain> {
        self.tx.subscribe()
    }

    pub fn find(&self, id: &InstanceId) -> Option<(usize, PluginInstanceRecord)> {
        let chain = self.current();
        chain
            .iter()
            .position(|r| &r.instance_id == id)
            .map(|index| (index, chain[index].clone()))
    }

    /// Replace the whole list.
    pub fn replace(&self, next: Vec<PluginInstanceRecord>) -> Chain {
        if !ids_unique(&next) {
            log::error!("Chain commit with duplicate instance ids: {:?}", ids_of(&next));
        }
        let next = Arc::new(next);
        self.tx.send_replace(next.clone());
        next
    }

    /// Settle a mutation: commit the new list or put back the restored one.
    pub fn settle(&self, mutation: Mutation) -> Result<Chain, SessionError> {
        match mutation {
            Mutation::Committed(next) => Ok(self.replace(next)),
            Mutation::RolledBack { restored, error } => {
                self.replace(restored);
                Err(error)
            }
        }
    }

    /// Pass `id`'s record through `f` and publish the result as one commit.
    /// Runs under the channel lock, so concurrent patches never lose each
    /// other. Returns `false` (and notifies nobody) when `id` is not in the chain.
    pub fn patch(&self, id: &InstanceId, f: impl FnOnce(&mut PluginInstanceRecord)) -> bool {
        self.tx.send_if_modified(|chain| {
            match chain.iter().position(|r| &r.instance_id == id) {
                Some(index) => {
                    f(&mut Arc::make_mut(chain)[index]);
                    true
                }
                None => false,
            }
        })
    }

    /// Copy of the current list put into the order given by `order`.
    /// Ids unknown to the chain are ignored; records missing from `order`
    /// keep their relative order at the end.
    pub fn reordered(&self, order: &[InstanceId]) -> Vec<PluginInstanceRecord> {
        let mut rest: Vec<PluginInstanceRecord> = self.current().as_ref().clone();
        let mut next = Vec::with_capacity(rest.len());
        for id in order {
            if let Some(pos) = rest.iter().position(|r| &r.instance_id == id) {
                next.push(rest.remove(pos));
            }
        }
        next.extend(rest);
        next
    }
}

pub fn ids_of(records: &[PluginInstanceRecord]) -> Vec<InstanceId> {
    records.iter().map(|r| r.instance_id.clone()).collect()
}

pub fn ids_unique(records: &[PluginInstanceRecord]) -> bool {
    let mut seen = HashSet::with_capacity(records.len());
    records.iter().all(|r| seen.insert(&r.instance_id))
}

/// True when `order` names every record of `records` exactly once.
pub fn is_permutation(records: &[PluginInstanceRecord], order: &[InstanceId]) -> bool {
    if order.len() != records.len() {
        return false;
    }
    let mut seen = HashSet::with_capacity(order.len());
    order
        .iter()
        .all(|id| seen.insert(id) && records.iter().any(|r| &r.instance_id == id))
}
