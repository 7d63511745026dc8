//! Per-instance lifecycle: create, watch until settled, delete, drain.
//!
//! A [`MeshLifecycle`] owns at most one live mesh. `start` creates it and
//! spawns three status pollers plus the fusion task on the runtime handle;
//! the returned [`ReadySignal`] resolves once the fused status settles.
//! `stop` deletes the mesh and hands back a [`CompletionSignal`] that
//! resolves after every spawned task has exited.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fusion::{FusionTask, Readiness};
use crate::limiter::{ConcurrencyLimiter, ConcurrencyToken};
use crate::poller::{
    AgentProbe, AgentTracker, DEFAULT_POLL_INTERVAL, DependentGate, PollError, Probe, StatusPoller,
    StatusProbe,
};
use crate::provider::{MeshName, MeshProvider, MeshRequest};
use crate::status::{AgentStatus, ApplicationStatus, ServiceStatus};

mod error;
mod signals;

pub use error::LifecycleError;
pub use signals::{CompletionSignal, ReadySignal};

/// Log text the build agent prints once it accepts work.
pub const DEFAULT_READY_MARKER: &str = "Listening for Jobs";

/// Phase of a [`MeshLifecycle`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum LifecyclePhase {
    /// No mesh exists.
    #[default]
    Off,
    /// The create request is in flight.
    Creating,
    /// The mesh exists and its statuses are being polled.
    Polling,
    /// Every facet reported ready.
    Ready,
    /// Every facet reported failure, or a poller failed.
    Failed,
    /// The mesh is being deleted and drained.
    Stopping,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tunables for one lifecycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleOptions {
    /// Delay between two polls of the same facet.
    pub poll_interval: Duration,
    /// Replica whose container log is followed.
    pub replica_index: u32,
    /// Text that marks the agent as ready when it appears in a log line.
    pub ready_marker: String,
    /// Echo container log lines through `tracing`.
    pub output_container_logs: bool,
    /// Log every distinct status snapshot.
    pub output_component_status: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            replica_index: 0,
            ready_marker: DEFAULT_READY_MARKER.to_owned(),
            output_container_logs: true,
            output_component_status: true,
        }
    }
}

/// Creates, watches and tears down one mesh at a time.
pub struct MeshLifecycle<P: MeshProvider> {
    provider: Arc<P>,
    request: Arc<MeshRequest>,
    runtime: Handle,
    options: LifecycleOptions,
    limiter: Option<ConcurrencyLimiter>,
    shutdown: Option<CancellationToken>,
    phase: Arc<watch::Sender<LifecyclePhase>>,
    active: Option<ActiveMesh>,
}

struct ActiveMesh {
    name: MeshName,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    /// Phase implied by the fused verdict, once there is one.
    settled: watch::Receiver<Option<LifecyclePhase>>,
}

impl ActiveMesh {
    async fn drain(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(mesh = %self.name, error = %err, "mesh task ended abnormally");
            }
        }
        debug!(mesh = %self.name, "mesh drained");
    }
}

impl Drop for ActiveMesh {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<P: MeshProvider> MeshLifecycle<P> {
    /// Creates an idle lifecycle that spawns its tasks on `runtime`.
    #[must_use]
    pub fn new(provider: Arc<P>, request: Arc<MeshRequest>, runtime: Handle) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Off);
        Self {
            provider,
            request,
            runtime,
            options: LifecycleOptions::default(),
            limiter: None,
            shutdown: None,
            phase: Arc::new(phase),
            active: None,
        }
    }

    /// Replaces the default options.
    #[must_use]
    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a concurrency limiter; `start` and `stop` then hold a token
    /// while they talk to the provider.
    #[must_use]
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Makes `start` give up with [`LifecycleError::Aborted`] when `shutdown`
    /// fires before the create request is sent. `stop` ignores it.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Receiver observing every phase change.
    #[must_use]
    pub fn phase_watch(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Name of the live mesh, if any.
    #[must_use]
    pub fn mesh_name(&self) -> Option<&MeshName> {
        self.active.as_ref().map(|active| &active.name)
    }

    /// Creates a new mesh and starts watching it.
    ///
    /// The returned signal resolves with the fused verdict. It also owns the
    /// concurrency token, so the slot stays taken until readiness is known.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPhase`] unless the lifecycle is
    /// `Off`, [`LifecycleError::Limiter`] when no token can be acquired,
    /// [`LifecycleError::Aborted`] when the shutdown token fired first and
    /// [`LifecycleError::Create`] when the provider rejects the request. The
    /// lifecycle is `Off` again after a failed start.
    pub async fn start(&mut self) -> Result<ReadySignal, LifecycleError> {
        let phase = self.phase();
        if phase != LifecyclePhase::Off {
            return Err(LifecycleError::InvalidPhase {
                operation: "start",
                phase,
            });
        }

        let token = match &self.shutdown {
            Some(shutdown) => tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(LifecycleError::Aborted),
                token = self.acquire() => token?,
            },
            None => self.acquire().await?,
        };
        let name = MeshName::generate(&self.request.name_prefix);
        self.phase.send_replace(LifecyclePhase::Creating);
        info!(mesh = %name, "creating mesh");

        if let Err(source) = self.provider.create(&name, &self.request).await {
            self.phase.send_replace(LifecyclePhase::Off);
            warn!(mesh = %name, error = %source, "mesh creation failed");
            return Err(LifecycleError::Create { mesh: name, source });
        }

        self.phase.send_replace(LifecyclePhase::Polling);
        let (ready_tx, ready_rx) = oneshot::channel();
        let active = self.spawn_tasks(name.clone(), ready_tx);
        self.active = Some(active);
        Ok(ReadySignal::new(name, ready_rx, token))
    }

    /// Deletes the live mesh and drains its tasks in the background.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPhase`] when no mesh is live,
    /// [`LifecycleError::Limiter`] when no token can be acquired and
    /// [`LifecycleError::Delete`] when the provider rejects the delete. A
    /// failed delete restores the previous phase so `stop` can be retried.
    pub async fn stop(&mut self) -> Result<CompletionSignal, LifecycleError> {
        let previous = self.phase();
        let stoppable = matches!(
            previous,
            LifecyclePhase::Polling | LifecyclePhase::Ready | LifecyclePhase::Failed
        );
        let Some(active) = self.active.take_if(|_| stoppable) else {
            return Err(LifecycleError::InvalidPhase {
                operation: "stop",
                phase: previous,
            });
        };

        let token = match self.acquire().await {
            Ok(token) => token,
            Err(err) => {
                self.active = Some(active);
                return Err(err);
            }
        };

        self.phase.send_replace(LifecyclePhase::Stopping);
        info!(mesh = %active.name, "deleting mesh");
        if let Err(source) = self.provider.delete(&active.name).await {
            warn!(mesh = %active.name, error = %source, "mesh deletion failed");
            // Fusion cannot advance the phase while it reads `Stopping`; a
            // verdict reached during the delete takes precedence.
            self.phase.send_modify(|current| {
                *current = (*active.settled.borrow()).unwrap_or(previous);
            });
            let mesh = active.name.clone();
            self.active = Some(active);
            return Err(LifecycleError::Delete { mesh, source });
        }

        let (done_tx, done_rx) = oneshot::channel();
        let phase = Arc::clone(&self.phase);
        self.runtime.spawn(async move {
            let mesh = active.name.clone();
            active.drain().await;
            drop(token);
            phase.send_replace(LifecyclePhase::Off);
            info!(mesh = %mesh, "mesh stopped");
            if done_tx.send(()).is_err() {
                debug!(mesh = %mesh, "completion signal dropped");
            }
        });
        Ok(CompletionSignal::new(done_rx))
    }

    async fn acquire(&self) -> Result<Option<ConcurrencyToken>, LifecycleError> {
        match &self.limiter {
            Some(limiter) => Ok(Some(limiter.acquire().await?)),
            None => Ok(None),
        }
    }

    fn spawn_tasks(
        &self,
        name: MeshName,
        ready_tx: oneshot::Sender<Result<Readiness, LifecycleError>>,
    ) -> ActiveMesh {
        let cancel = CancellationToken::new();
        let gate = DependentGate::default();
        let poller = StatusPoller::new(self.options.poll_interval, cancel.clone());
        let (application_tx, application_rx) = watch::channel(ApplicationStatus::Unknown);
        let (service_tx, service_rx) = watch::channel(ServiceStatus::Unknown);
        let (agent_tx, agent_rx) = watch::channel(AgentStatus::Unknown);
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();

        let application = StatusProbe::new(Arc::clone(&self.provider), name.clone(), application_tx);
        let service = StatusProbe::new(Arc::clone(&self.provider), name.clone(), service_tx);
        let agent = AgentProbe::new(
            Arc::clone(&self.provider),
            name.clone(),
            self.options.replica_index,
            AgentTracker::new(self.options.ready_marker.clone()),
            agent_tx,
        )
        .with_log_echo(self.options.output_container_logs);

        let fusion = FusionTask {
            mesh: name.clone(),
            application: application_rx,
            service: service_rx,
            agent: agent_rx,
            faults: faults_rx,
            gate: gate.clone(),
            cancel: cancel.clone(),
            log_status: self.options.output_component_status,
        };
        let phase = Arc::clone(&self.phase);
        let mesh = name.clone();
        let (settled_tx, settled) = watch::channel(None);
        let settle = move |outcome: Result<Readiness, PollError>| {
            let next = match outcome {
                Ok(Readiness::Ready) => LifecyclePhase::Ready,
                Ok(Readiness::Failed) | Err(_) => LifecyclePhase::Failed,
            };
            settled_tx.send_replace(Some(next));
            phase.send_if_modified(|current| {
                let polling = *current == LifecyclePhase::Polling;
                if polling {
                    *current = next;
                }
                polling
            });
            let verdict = outcome.map_err(|source| LifecycleError::Poll {
                mesh: mesh.clone(),
                source,
            });
            if ready_tx.send(verdict).is_err() {
                debug!(mesh = %mesh, "readiness signal dropped");
            }
        };

        let tasks = vec![
            self.spawn_poller(&name, &poller, None, application, faults_tx.clone()),
            self.spawn_poller(&name, &poller, Some(gate.clone()), service, faults_tx.clone()),
            self.spawn_poller(&name, &poller, Some(gate), agent, faults_tx),
            self.runtime.spawn(fusion.run(settle)),
        ];

        ActiveMesh {
            name,
            cancel,
            tasks,
            settled,
        }
    }

    fn spawn_poller<T: Probe + 'static>(
        &self,
        name: &MeshName,
        poller: &StatusPoller,
        gate: Option<DependentGate>,
        mut probe: T,
        faults: mpsc::UnboundedSender<PollError>,
    ) -> JoinHandle<()> {
        let mesh = name.clone();
        let looped = poller.clone();
        self.runtime.spawn(async move {
            let result = match &gate {
                Some(dependents) => looped.run_gated(dependents, &mut probe).await,
                None => looped.run(&mut probe).await,
            };
            match result {
                Ok(exit) => debug!(mesh = %mesh, ?exit, "poller stopped"),
                Err(err) => {
                    if faults.send(err).is_err() {
                        debug!(mesh = %mesh, "fusion gone; poller error dropped");
                    }
                }
            }
        })
    }
}

impl<P: MeshProvider> Drop for MeshLifecycle<P> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            warn!(mesh = %active.name, "lifecycle dropped while a mesh is live; polling stopped without deleting it");
        }
    }
}
