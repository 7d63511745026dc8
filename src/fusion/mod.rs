//! Fusion of the three facet statuses into one readiness verdict.
//!
//! [`StatusFusion`] is the pure rule engine: it sees every distinct
//! [`StatusSnapshot`] and decides which signal, if any, that change raises.
//! [`FusionTask`] wires it to the pollers' watch channels and fires the
//! dependent gate and the readiness outcome.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::poller::{DependentGate, PollError};
use crate::provider::MeshName;
use crate::status::{AgentStatus, ApplicationStatus, ServiceStatus, StatusSnapshot};

/// Terminal verdict of a provisioning attempt.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Readiness {
    /// Application, service and agent all report ready.
    Ready,
    /// Application, service and agent all report failure.
    Failed,
}

/// Signal raised by one status change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FusionEvent {
    /// A terminal verdict was reached.
    Terminal(Readiness),
    /// The application failed; dependent pollers must stop.
    AbortDependents,
    /// The application is being created; dependent pollers may start.
    StartDependents,
}

/// Result of feeding one snapshot into [`StatusFusion::observe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Observation {
    /// The snapshot equals the previous one and was suppressed.
    Unchanged,
    /// The snapshot is new; carries the event it raised, if any.
    Changed(Option<FusionEvent>),
}

/// Rule engine evaluated on every distinct status snapshot.
///
/// Rules are checked in priority order and at most one fires per change.
/// Once a terminal verdict has been reached, or the fusion was settled
/// externally, no further events are raised.
#[derive(Clone, Debug, Default)]
pub struct StatusFusion {
    last: Option<StatusSnapshot>,
    settled: bool,
    abort_fired: bool,
    start_fired: bool,
}

impl StatusFusion {
    /// Creates a fusion that has not seen any snapshot yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a terminal verdict has been reached or the fusion
    /// was settled by an error.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.settled
    }

    /// Marks the fusion as settled without a verdict.
    pub const fn settle(&mut self) {
        self.settled = true;
    }

    /// Feeds one snapshot and returns what it changed.
    pub fn observe(&mut self, snapshot: StatusSnapshot) -> Observation {
        if self.last == Some(snapshot) {
            return Observation::Unchanged;
        }
        self.last = Some(snapshot);

        if self.settled {
            return Observation::Changed(None);
        }

        let event = if snapshot.all_ready() {
            self.settled = true;
            Some(FusionEvent::Terminal(Readiness::Ready))
        } else if snapshot.all_failed() {
            self.settled = true;
            Some(FusionEvent::Terminal(Readiness::Failed))
        } else if snapshot.application == ApplicationStatus::Failed && !self.abort_fired {
            self.abort_fired = true;
            Some(FusionEvent::AbortDependents)
        } else if snapshot.application == ApplicationStatus::Creating && !self.start_fired {
            self.start_fired = true;
            Some(FusionEvent::StartDependents)
        } else {
            None
        };
        Observation::Changed(event)
    }
}

/// Inputs of the fusion loop for one mesh instance.
pub struct FusionTask {
    /// Mesh whose statuses are fused.
    pub mesh: MeshName,
    /// Latest application status.
    pub application: watch::Receiver<ApplicationStatus>,
    /// Latest service status.
    pub service: watch::Receiver<ServiceStatus>,
    /// Latest agent status.
    pub agent: watch::Receiver<AgentStatus>,
    /// Fatal errors reported by the pollers.
    pub faults: mpsc::UnboundedReceiver<PollError>,
    /// Gate fired for the dependent pollers.
    pub gate: DependentGate,
    /// Ends the loop.
    pub cancel: CancellationToken,
    /// Log every distinct status snapshot at info level.
    pub log_status: bool,
}

impl FusionTask {
    /// Runs until cancelled, calling `settle` exactly once with the first
    /// terminal verdict or fatal poller error.
    ///
    /// `settle` is not called when the loop is cancelled first.
    pub async fn run<F>(self, on_settled: F)
    where
        F: FnOnce(Result<Readiness, PollError>) + Send,
    {
        let Self {
            mesh,
            mut application,
            mut service,
            mut agent,
            mut faults,
            gate,
            cancel,
            log_status,
        } = self;

        let mut fusion = StatusFusion::new();
        let mut settle = Some(on_settled);
        let mut app_open = true;
        let mut service_open = true;
        let mut agent_open = true;
        let mut faults_open = true;

        loop {
            let snapshot = StatusSnapshot::new(
                *application.borrow_and_update(),
                *service.borrow_and_update(),
                *agent.borrow_and_update(),
            );

            if let Observation::Changed(event) = fusion.observe(snapshot) {
                if log_status {
                    info!(mesh = %mesh, "{snapshot}");
                }
                match event {
                    Some(FusionEvent::StartDependents) => {
                        debug!(mesh = %mesh, "starting dependent pollers");
                        gate.start.fire();
                    }
                    Some(FusionEvent::AbortDependents) => {
                        warn!(mesh = %mesh, "application failed; aborting dependent pollers");
                        gate.abort.fire();
                    }
                    Some(FusionEvent::Terminal(readiness)) => {
                        info!(mesh = %mesh, ?readiness, "mesh settled");
                        if let Some(callback) = settle.take() {
                            callback(Ok(readiness));
                        }
                    }
                    None => {}
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                fault = faults.recv(), if faults_open => match fault {
                    Some(err) if fusion.is_settled() => {
                        warn!(mesh = %mesh, error = %err, "poller failed after mesh settled");
                    }
                    Some(err) => {
                        warn!(mesh = %mesh, error = %err, "poller failed");
                        fusion.settle();
                        if let Some(callback) = settle.take() {
                            callback(Err(err));
                        }
                    }
                    None => faults_open = false,
                },
                changed = application.changed(), if app_open => {
                    app_open = changed.is_ok();
                }
                changed = service.changed(), if service_open => {
                    service_open = changed.is_ok();
                }
                changed = agent.changed(), if agent_open => {
                    agent_open = changed.is_ok();
                }
            }
        }
        debug!(mesh = %mesh, "fusion stopped");
    }
}
