//! Cancellable status polling loops.
//!
//! A [`StatusPoller`] repeatedly runs a [`Probe`]: call the provider, publish
//! the result, wait a fixed interval, repeat. The loop ends when the
//! lifecycle cancels it, when an abort [`Trigger`] fires, or when the probe
//! reports a terminal status.
//!
//! Dependent pollers are gated: they wait for the fusion step to fire the
//! start trigger before issuing any provider call.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::log_stream::LogStreamError;
use crate::provider::ProviderError;
use crate::status::StatusParseError;

mod probes;

pub use probes::{AgentProbe, AgentTracker, LogResponse, StatusFacet, StatusProbe};

/// Default delay between two polls of the same facet.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that end a polling loop.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// The provider failed with an unexpected error.
    #[error("{facet} poll failed: {source}")]
    Provider {
        /// Facet being polled.
        facet: &'static str,
        /// Provider error.
        #[source]
        source: ProviderError,
    },
    /// The provider returned a status string outside the known set.
    #[error(transparent)]
    Status(#[from] StatusParseError),
    /// The container log violated the growing-prefix contract.
    #[error("container log stream failed: {0}")]
    Log(#[from] LogStreamError),
}

/// Whether a polling loop should keep going after a probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Wait for the interval and probe again.
    Continue,
    /// A terminal status was observed; stop polling.
    Stop,
}

/// Why a polling loop returned without error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollExit {
    /// The lifecycle cancelled the loop.
    Cancelled,
    /// The abort trigger fired.
    Aborted,
    /// The probe observed a terminal status.
    Finished,
}

/// Future returned by [`Probe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<Flow, PollError>> + Send + 'a>>;

/// One provider query plus the bookkeeping that publishes its result.
pub trait Probe: Send {
    /// Queries the provider once and publishes any status change.
    fn probe(&mut self) -> ProbeFuture<'_>;

    /// Called once when the loop ends because the abort trigger fired.
    fn aborted(&mut self) {}

    /// Called once when the loop ends for any reason other than an error.
    fn finished(&mut self) {}
}

/// Single-use signal that stays fired once fired.
#[derive(Clone, Debug)]
pub struct Trigger(CancellationToken);

impl Trigger {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Fires the trigger; later calls have no effect.
    pub fn fire(&self) {
        self.0.cancel();
    }

    /// Returns true once the trigger has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves when the trigger fires.
    pub async fn fired(&self) {
        self.0.cancelled().await;
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Start and abort signals shared by the fusion step and the dependent
/// (service and agent) pollers.
#[derive(Clone, Debug, Default)]
pub struct DependentGate {
    /// Fired when the application enters `Creating`.
    pub start: Trigger,
    /// Fired when the application reports `Failed`.
    pub abort: Trigger,
}

/// Drives a [`Probe`] at a fixed cadence until cancelled.
#[derive(Clone, Debug)]
pub struct StatusPoller {
    interval: Duration,
    cancel: CancellationToken,
    abort: Option<Trigger>,
}

impl StatusPoller {
    /// Creates a poller that stops when `cancel` is cancelled.
    #[must_use]
    pub const fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            cancel,
            abort: None,
        }
    }

    /// Adds an abort trigger observed between and during probes.
    #[must_use]
    pub fn with_abort(mut self, abort: Trigger) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Runs the probe until cancellation, abort, or a terminal status.
    ///
    /// An in-flight provider call is dropped as soon as cancellation or the
    /// abort trigger is observed.
    ///
    /// # Errors
    ///
    /// Returns the first [`PollError`] raised by the probe. Expected
    /// transient conditions are absorbed by the probe and never surface here.
    pub async fn run<P: Probe + ?Sized>(&self, probe: &mut P) -> Result<PollExit, PollError> {
        let exit = self.poll(probe).await?;
        if exit == PollExit::Aborted {
            probe.aborted();
        }
        probe.finished();
        Ok(exit)
    }

    /// Waits for the gate to open before running the probe.
    ///
    /// If the abort trigger fires first the probe is never run; it is told
    /// it was aborted and the loop ends.
    ///
    /// # Errors
    ///
    /// Returns the first [`PollError`] raised once polling has started.
    pub async fn run_gated<P: Probe + ?Sized>(
        &self,
        gate: &DependentGate,
        probe: &mut P,
    ) -> Result<PollExit, PollError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                probe.finished();
                return Ok(PollExit::Cancelled);
            }
            () = gate.abort.fired() => {
                probe.aborted();
                probe.finished();
                return Ok(PollExit::Aborted);
            }
            () = gate.start.fired() => {}
        }

        self.clone().with_abort(gate.abort.clone()).run(probe).await
    }

    async fn poll<P: Probe + ?Sized>(&self, probe: &mut P) -> Result<PollExit, PollError> {
        loop {
            let flow = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(PollExit::Cancelled),
                () = wait_for(self.abort.as_ref()) => return Ok(PollExit::Aborted),
                result = probe.probe() => result?,
            };

            if flow == Flow::Stop {
                return Ok(PollExit::Finished);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(PollExit::Cancelled),
                () = wait_for(self.abort.as_ref()) => return Ok(PollExit::Aborted),
                () = sleep(self.interval) => {}
            }
        }
    }
}

async fn wait_for(abort: Option<&Trigger>) {
    match abort {
        Some(trigger) => trigger.fired().await,
        None => std::future::pending().await,
    }
}
