//! Shared fixtures for batch BDD scenarios.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use meshpool::test_support::ScriptedProvider;
use meshpool::{BatchFailurePolicy, MeshRequest};
use rstest::fixture;

use crate::mesh_request::mesh_request;

pub const INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchSettings {
    pub count: usize,
    pub parallelism: usize,
    pub policy: BatchFailurePolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            count: 1,
            parallelism: 1,
            policy: BatchFailurePolicy::Abort,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchOutcome {
    Started { ready: usize, failures: usize },
    Failed { create_error: bool },
}

#[derive(Clone, Debug)]
pub struct BatchContext {
    pub provider: ScriptedProvider,
    pub request: Arc<MeshRequest>,
    settings: Arc<Mutex<BatchSettings>>,
    outcome: Arc<Mutex<Option<BatchOutcome>>>,
}

impl BatchContext {
    pub fn settings(&self) -> BatchSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut BatchSettings)) {
        f(&mut self.settings.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn record(&self, outcome: BatchOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    pub fn outcome(&self) -> Option<BatchOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[fixture]
pub fn batch_context() -> BatchContext {
    BatchContext {
        provider: ScriptedProvider::new(),
        request: mesh_request("batch-"),
        settings: Arc::new(Mutex::new(BatchSettings::default())),
        outcome: Arc::new(Mutex::new(None)),
    }
}
