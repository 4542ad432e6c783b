//! In-process stand-in for the audio engine used by the tests

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::{EngineError, EngineGateway, EngineResult, InstanceId, LoadedPlugin, StateToken};

#[derive(Debug, Clone, PartialEq)]
pub struct MockInstance {
    pub id: InstanceId,
    pub path: String,
    pub bypassed: bool,
    pub muted: bool,
    pub gain: f32,
    pub state: StateToken,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    instances: Vec<MockInstance>,
    bad_paths: HashSet<String>,
    load_delays: HashMap<String, Duration>,
    op_delays: HashMap<&'static str, Duration>,
    next_delays: HashMap<&'static str, Duration>,
    fail_next: HashMap<&'static str, EngineError>,
    broken_state: bool,
    calls: Vec<String>,
    load_order: Vec<String>,
}

/// Fake engine: keeps instances in processing order, hands out `inst-N` ids.
#[derive(Default)]
pub struct MockEngine {
    inner: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads of this path fail with a load error.
    pub fn reject_path(&self, path: &str) {
        self.inner.lock().bad_paths.insert(path.to_string());
    }

    /// Loads of this path take `delay` before completing.
    pub fn delay_load(&self, path: &str, delay: Duration) {
        self.inner.lock().load_delays.insert(path.to_string(), delay);
    }

    /// Every call of `op` waits `delay` before it is answered.
    pub fn delay_op(&self, op: &'static str, delay: Duration) {
        self.inner.lock().op_delays.insert(op, delay);
    }

    /// Only the next call of `op` waits `delay`.
    pub fn delay_next(&self, op: &'static str, delay: Duration) {
        self.inner.lock().next_delays.insert(op, delay);
    }

    /// The next call of `op` to be answered fails with `err`.
    pub fn fail_next(&self, op: &'static str, err: EngineError) {
        self.inner.lock().fail_next.insert(op, err);
    }

    /// Every get_state/set_state call fails.
    pub fn break_state(&self, broken: bool) {
        self.inner.lock().broken_state = broken;
    }

    /// Simulate a silent engine restart: all instances and ids are gone.
    pub fn restart(&self) {
        self.inner.lock().instances.clear();
    }

    pub fn instances(&self) -> Vec<MockInstance> {
        self.inner.lock().instances.clone()
    }

    pub fn instance(&self, id: &InstanceId) -> Option<MockInstance> {
        self.inner.lock().instances.iter().find(|i| &i.id == id).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().instances.iter().map(|i| i.path.clone()).collect()
    }

    pub fn set_instance_state(&self, id: &InstanceId, state: StateToken) {
        if let Some(inst) = self.inner.lock().instances.iter_mut().find(|i| &i.id == id) {
            inst.state = state;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Paths in the order their loads completed.
    pub fn load_completion_order(&self) -> Vec<String> {
        self.inner.lock().load_order.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Record the call, wait out any configured delay, then pop a scripted failure.
    async fn enter(&self, op: &'static str, detail: &str) -> EngineResult<()> {
        let delay = {
            let mut state = self.inner.lock();
            state.calls.push(format!("{} {}", op, detail));
            state
                .next_delays
                .remove(op)
                .or_else(|| state.op_delays.get(op).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.inner.lock().fail_next.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_instance<T>(
        &self,
        id: &InstanceId,
        f: impl FnOnce(&mut MockInstance) -> T,
    ) -> EngineResult<T> {
        let mut state = self.inner.lock();
        state
            .instances
            .iter_mut()
            .find(|i| &i.id == id)
            .map(f)
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }
}

impl EngineGateway for MockEngine {
    async fn load(&self, path: &str) -> EngineResult<LoadedPlugin> {
        self.enter("load", path).await?;
        let delay = self.inner.lock().load_delays.get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock();
        if state.bad_paths.contains(path) {
            return Err(EngineError::Load(format!("cannot open {}", path)));
        }
        state.next_id += 1;
        let id = InstanceId(format!("inst-{}", state.next_id));
        state.instances.push(MockInstance {
            id: id.clone(),
            path: path.to_string(),
            bypassed: false,
            muted: false,
            gain: 1.0,
            state: StateToken(format!("state:{}", path).into_bytes()),
        });
        state.load_order.push(path.to_string());
        Ok(LoadedPlugin {
            instance_id: id,
            has_editor: true,
        })
    }

    async fn remove(&self, id: &InstanceId) -> EngineResult<()> {
        self.enter("remove", id.as_str()).await?;
        let mut state = self.inner.lock();
        let before = state.instances.len();
        state.instances.retain(|i| &i.id != id);
        if state.instances.len() == before {
            return Err(EngineError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn set_bypass(&self, id: &InstanceId, active: bool) -> EngineResult<()> {
        self.enter("set_bypass", id.as_str()).await?;
        self.with_instance(id, |i| i.bypassed = active)
    }

    async fn set_mute(&self, id: &InstanceId, active: bool) -> EngineResult<()> {
        self.enter("set_mute", id.as_str()).await?;
        self.with_instance(id, |i| i.muted = active)
    }

    async fn set_gain(&self, id: &InstanceId, value: f32) -> EngineResult<()> {
        self.enter("set_gain", id.as_str()).await?;
        self.with_instance(id, |i| i.gain = value)
    }

    async fn reorder(&self, order: &[InstanceId]) -> EngineResult<()> {
        self.enter("reorder", &format!("{}", order.len())).await?;
        let mut state = self.inner.lock();
        if order.len() != state.instances.len() {
            return Err(EngineError::Rejected("order is not a permutation".into()));
        }
        let mut next = Vec::with_capacity(order.len());
        for id in order {
            match state.instances.iter().find(|i| &i.id == id) {
                Some(inst) => next.push(inst.clone()),
                None => return Err(EngineError::NotFound(id.clone())),
            }
        }
        state.instances = next;
        Ok(())
    }

    async fn get_state(&self, id: &InstanceId) -> EngineResult<StateToken> {
        self.enter("get_state", id.as_str()).await?;
        if self.inner.lock().broken_state {
            return Err(EngineError::State("chunk unavailable".into()));
        }
        self.with_instance(id, |i| i.state.clone())
    }

    async fn set_state(&self, id: &InstanceId, token: &StateToken) -> EngineResult<()> {
        self.enter("set_state", id.as_str()).await?;
        if self.inner.lock().broken_state {
            return Err(EngineError::State("chunk rejected".into()));
        }
        self.with_instance(id, |i| i.state = token.clone())
    }

    async fn open_editor(&self, id: &InstanceId) -> EngineResult<()> {
        self.enter("open_editor", id.as_str()).await?;
        self.with_instance(id, |_| ())
    }
}
