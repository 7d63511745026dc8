//! Shared fixtures for lifecycle BDD scenarios.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use meshpool::test_support::ScriptedProvider;
use meshpool::{LifecycleError, LifecyclePhase, MeshName, MeshRequest, Readiness};
use rstest::fixture;

use crate::mesh_request::mesh_request;

/// Poll interval used by every scenario; the clock is paused so it costs
/// nothing.
pub const INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub provider: ScriptedProvider,
    pub request: Arc<MeshRequest>,
    outcome: Arc<Mutex<Option<LifecycleOutcome>>>,
}

#[derive(Clone, Debug)]
pub enum LifecycleOutcome {
    StartFailed {
        error: LifecycleError,
        phase: LifecyclePhase,
    },
    Settled {
        mesh: MeshName,
        verdict: Result<Readiness, LifecycleError>,
        phase: LifecyclePhase,
        calls_after_drain: usize,
        calls_later: usize,
    },
}

impl LifecycleContext {
    pub fn record(&self, outcome: LifecycleOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    pub fn outcome(&self) -> Option<LifecycleOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        provider: ScriptedProvider::new(),
        request: mesh_request("bdd-"),
        outcome: Arc::new(Mutex::new(None)),
    }
}
