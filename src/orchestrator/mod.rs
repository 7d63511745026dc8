//! Fan-out of many mesh lifecycles under a shared concurrency limit.
//!
//! [`BatchOrchestrator::start`] spawns one work item per mesh. Every item
//! builds a [`MeshLifecycle`] sharing the orchestrator's limiter, starts it
//! and waits for readiness; finished items are collected in arrival order.
//! [`BatchOrchestrator::stop`] tears a batch down again.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fusion::Readiness;
use crate::lifecycle::{LifecycleError, LifecycleOptions, LifecyclePhase, MeshLifecycle};
use crate::limiter::ConcurrencyLimiter;
use crate::provider::{MeshName, MeshProvider, MeshRequest};

/// What a batch does when one of its meshes fails to come up.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BatchFailurePolicy {
    /// Stop outstanding work, tear down every created mesh and return the
    /// first error.
    #[default]
    Abort,
    /// Tear down the failed meshes, keep the healthy ones and report the
    /// failures alongside them.
    Continue,
}

/// Raised when a failure policy name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown batch failure policy '{0}' (expected 'abort' or 'continue')")]
pub struct ParsePolicyError(String);

impl FromStr for BatchFailurePolicy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            _ => Err(ParsePolicyError(value.to_owned())),
        }
    }
}

impl fmt::Display for BatchFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Continue => "continue",
        })
    }
}

/// Errors raised while starting or stopping a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A lifecycle operation failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Every facet of a mesh reported failure.
    #[error("mesh {mesh} failed to provision")]
    MeshFailed {
        /// Mesh that failed.
        mesh: MeshName,
    },
    /// The work item gave up because another mesh failed first.
    #[error("aborted after another mesh in the batch failed")]
    Aborted,
    /// A work item panicked or was cancelled by the runtime.
    #[error("batch work item ended abnormally: {message}")]
    Task {
        /// Join error description.
        message: String,
    },
    /// One or more meshes could not be stopped.
    #[error("{failed} mesh(es) could not be stopped; first error: {first}")]
    Stop {
        /// Number of meshes whose stop failed.
        failed: usize,
        /// First stop error in completion order.
        #[source]
        first: LifecycleError,
    },
}

/// Meshes brought up by [`BatchOrchestrator::start`].
pub struct MeshBatch<P: MeshProvider> {
    meshes: Vec<MeshLifecycle<P>>,
    failures: Vec<BatchError>,
}

impl<P: MeshProvider> MeshBatch<P> {
    /// Healthy meshes, in the order they became ready.
    #[must_use]
    pub fn meshes(&self) -> &[MeshLifecycle<P>] {
        &self.meshes
    }

    /// Names of the healthy meshes, in the order they became ready.
    #[must_use]
    pub fn names(&self) -> Vec<MeshName> {
        self.meshes
            .iter()
            .filter_map(MeshLifecycle::mesh_name)
            .cloned()
            .collect()
    }

    /// Failures tolerated under [`BatchFailurePolicy::Continue`].
    #[must_use]
    pub fn failures(&self) -> &[BatchError] {
        &self.failures
    }

    /// Number of healthy meshes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Returns true when no mesh came up.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Runs many lifecycles with at most `parallelism` provider operations in
/// flight.
pub struct BatchOrchestrator<P: MeshProvider> {
    provider: Arc<P>,
    request: Arc<MeshRequest>,
    runtime: Handle,
    limiter: ConcurrencyLimiter,
    options: LifecycleOptions,
    policy: BatchFailurePolicy,
    shutdown: CancellationToken,
}

impl<P: MeshProvider> BatchOrchestrator<P> {
    /// Creates an orchestrator with its own limiter of `parallelism` tokens.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        request: Arc<MeshRequest>,
        runtime: Handle,
        parallelism: usize,
    ) -> Self {
        Self {
            provider,
            request,
            runtime,
            limiter: ConcurrencyLimiter::new(parallelism),
            options: LifecycleOptions::default(),
            policy: BatchFailurePolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the options applied to every lifecycle.
    #[must_use]
    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: BatchFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Makes `start` wind down as if a mesh had failed once `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Limiter shared by every lifecycle of this orchestrator.
    #[must_use]
    pub const fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Brings up `count` meshes and waits until each has settled.
    ///
    /// # Errors
    ///
    /// Under [`BatchFailurePolicy::Abort`] the first failure is returned
    /// after every created mesh has been torn down. Under
    /// [`BatchFailurePolicy::Continue`] failures are reported through
    /// [`MeshBatch::failures`] instead.
    pub async fn start(&self, count: usize) -> Result<MeshBatch<P>, BatchError> {
        info!(count, parallelism = self.limiter.capacity(), policy = %self.policy, "starting mesh batch");
        let cancel = self.shutdown.child_token();
        let mut items = JoinSet::new();
        for _ in 0..count {
            let lifecycle = MeshLifecycle::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.request),
                self.runtime.clone(),
            )
            .with_options(self.options.clone())
            .with_limiter(self.limiter.clone())
            .with_shutdown(cancel.clone());
            items.spawn_on(provision(lifecycle, cancel.clone()), &self.runtime);
        }

        let mut meshes = Vec::with_capacity(count);
        let mut failed = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = items.join_next().await {
            let (lifecycle, outcome) = match joined {
                Ok(item) => item,
                Err(err) => {
                    warn!(error = %err, "batch work item ended abnormally");
                    self.on_failure(&cancel);
                    failures.push(BatchError::Task {
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            match outcome {
                Ok(()) => meshes.push(lifecycle),
                Err(err) => {
                    if !matches!(err, BatchError::Aborted) {
                        warn!(error = %err, "mesh failed to come up");
                    }
                    self.on_failure(&cancel);
                    failures.push(err);
                    failed.push(lifecycle);
                }
            }
        }

        self.teardown(failed).await;
        if self.policy == BatchFailurePolicy::Abort && !failures.is_empty() {
            self.teardown(std::mem::take(&mut meshes)).await;
            let first = failures.into_iter().next();
            return Err(first.unwrap_or(BatchError::Aborted));
        }

        info!(ready = meshes.len(), failed = failures.len(), "mesh batch started");
        Ok(MeshBatch { meshes, failures })
    }

    /// Stops every mesh of `batch` and waits for each to drain.
    ///
    /// # Errors
    ///
    /// Every mesh is attempted; [`BatchError::Stop`] reports how many failed
    /// and the first error.
    pub async fn stop(&self, batch: MeshBatch<P>) -> Result<(), BatchError> {
        info!(count = batch.len(), "stopping mesh batch");
        let errors = self.stop_all(batch.meshes).await;
        let failed = errors.len();
        match errors.into_iter().next() {
            Some(first) => Err(BatchError::Stop { failed, first }),
            None => Ok(()),
        }
    }

    fn on_failure(&self, cancel: &CancellationToken) {
        if self.policy == BatchFailurePolicy::Abort && !cancel.is_cancelled() {
            warn!("aborting mesh batch");
            cancel.cancel();
        }
    }

    async fn teardown(&self, lifecycles: Vec<MeshLifecycle<P>>) {
        for err in self.stop_all(lifecycles).await {
            warn!(error = %err, "failed to tear down mesh");
        }
    }

    async fn stop_all(&self, lifecycles: Vec<MeshLifecycle<P>>) -> Vec<LifecycleError> {
        let mut stops = JoinSet::new();
        for mut lifecycle in lifecycles {
            if !is_live(lifecycle.phase()) {
                continue;
            }
            stops.spawn_on(
                async move {
                    let completion = lifecycle.stop().await?;
                    completion.await;
                    Ok::<(), LifecycleError>(())
                },
                &self.runtime,
            );
        }

        let mut errors = Vec::new();
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(err) => warn!(error = %err, "stop task ended abnormally"),
            }
        }
        errors
    }
}

const fn is_live(phase: LifecyclePhase) -> bool {
    matches!(
        phase,
        LifecyclePhase::Polling | LifecyclePhase::Ready | LifecyclePhase::Failed
    )
}

async fn provision<P: MeshProvider>(
    mut lifecycle: MeshLifecycle<P>,
    cancel: CancellationToken,
) -> (MeshLifecycle<P>, Result<(), BatchError>) {
    let ready = match lifecycle.start().await {
        Ok(ready) => ready,
        Err(LifecycleError::Aborted) => return (lifecycle, Err(BatchError::Aborted)),
        Err(err) => return (lifecycle, Err(err.into())),
    };

    let mesh = ready.mesh().clone();
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BatchError::Aborted),
        readiness = ready => match readiness {
            Ok(Readiness::Ready) => Ok(()),
            Ok(Readiness::Failed) => Err(BatchError::MeshFailed { mesh }),
            Err(err) => Err(err.into()),
        },
    };
    (lifecycle, outcome)
}

#[cfg(test)]
mod tests;
