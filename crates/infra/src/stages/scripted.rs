//! Scripted stage invoker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use tenantflow_core::StageKind;

use super::{RunResultsSummary, StageInvocationError, StageInvoker};

type Outcome = Result<RunResultsSummary, StageInvocationError>;

#[derive(Debug, Default)]
struct State {
    outcomes: HashMap<StageKind, VecDeque<Outcome>>,
    delays: HashMap<StageKind, Duration>,
    calls: Vec<StageKind>,
}

/// Returns queued outcomes per stage; the last one repeats. Unscripted stages
/// succeed with an empty summary.
#[derive(Debug, Default)]
pub struct ScriptedStageInvoker {
    state: Mutex<State>,
}

impl ScriptedStageInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn script(&self, stage: StageKind, outcomes: Vec<Outcome>) {
        self.state().outcomes.insert(stage, outcomes.into());
    }

    /// Every invocation of `stage` takes `delay` before answering.
    pub fn delay(&self, stage: StageKind, delay: Duration) {
        self.state().delays.insert(stage, delay);
    }

    /// Stages invoked so far, in call order.
    pub fn calls(&self) -> Vec<StageKind> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, stage: StageKind) -> usize {
        self.state().calls.iter().filter(|s| **s == stage).count()
    }
}

#[async_trait]
impl StageInvoker for ScriptedStageInvoker {
    async fn invoke(&self, stage: StageKind) -> Result<RunResultsSummary, StageInvocationError> {
        let (delay, outcome) = {
            let mut state = self.state();
            state.calls.push(stage);
            let delay = state.delays.get(&stage).copied();
            let outcome = match state.outcomes.get_mut(&stage) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            (delay, outcome)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        outcome.unwrap_or_else(|| Ok(RunResultsSummary::default()))
    }
}
