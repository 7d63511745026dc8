//! Probes for the application, service and agent facets.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::log_stream::LogReassembler;
use crate::provider::{MeshName, MeshProvider, ProviderError, ProviderFuture};
use crate::status::{AgentStatus, ApplicationStatus, ServiceStatus, StatusParseError};

use super::{Flow, PollError, Probe, ProbeFuture};

/// A status facet fetched from the provider as a string.
pub trait StatusFacet:
    Copy + Eq + fmt::Display + FromStr<Err = StatusParseError> + Send + Sync + 'static
{
    /// Facet name used in logs and errors.
    const FACET: &'static str;
    /// Status recorded when the provider reports the resource missing.
    const NOT_FOUND: Self;
    /// Status published when the poller is aborted, if the facet has one.
    const ABORTED: Option<Self>;

    /// Fetches the raw status string for this facet.
    fn fetch<'a, P: MeshProvider>(provider: &'a P, name: &'a MeshName) -> ProviderFuture<'a, String>;
}

impl StatusFacet for ApplicationStatus {
    const FACET: &'static str = "application";
    const NOT_FOUND: Self = Self::NotFound;
    const ABORTED: Option<Self> = None;

    fn fetch<'a, P: MeshProvider>(provider: &'a P, name: &'a MeshName) -> ProviderFuture<'a, String> {
        provider.application_status(name)
    }
}

impl StatusFacet for ServiceStatus {
    const FACET: &'static str = "service";
    const NOT_FOUND: Self = Self::NotFound;
    const ABORTED: Option<Self> = Some(Self::Failed);

    fn fetch<'a, P: MeshProvider>(provider: &'a P, name: &'a MeshName) -> ProviderFuture<'a, String> {
        provider.service_status(name)
    }
}

/// Polls one provider status facet and publishes changes on a watch channel.
///
/// `NotFound` from the provider becomes the facet's `NotFound` status and
/// ends the loop; `NotReady` leaves the published status untouched.
pub struct StatusProbe<P, S: StatusFacet> {
    provider: Arc<P>,
    name: MeshName,
    sender: watch::Sender<S>,
}

impl<P: MeshProvider, S: StatusFacet> StatusProbe<P, S> {
    /// Creates a probe publishing into `sender`.
    #[must_use]
    pub const fn new(provider: Arc<P>, name: MeshName, sender: watch::Sender<S>) -> Self {
        Self {
            provider,
            name,
            sender,
        }
    }

    fn publish(&self, status: S) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!(mesh = %self.name, facet = S::FACET, %status, "status changed");
        }
    }

    async fn query(&self) -> Result<Flow, PollError> {
        trace!(mesh = %self.name, facet = S::FACET, "querying status");
        let status = match S::fetch(self.provider.as_ref(), &self.name).await {
            Ok(raw) => raw.parse::<S>()?,
            Err(ProviderError::NotFound { .. }) => S::NOT_FOUND,
            Err(ProviderError::NotReady { .. }) => return Ok(Flow::Continue),
            Err(source) => {
                return Err(PollError::Provider {
                    facet: S::FACET,
                    source,
                });
            }
        };

        self.publish(status);
        if status == S::NOT_FOUND {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

impl<P: MeshProvider, S: StatusFacet> Probe for StatusProbe<P, S> {
    fn probe(&mut self) -> ProbeFuture<'_> {
        Box::pin(self.query())
    }

    fn aborted(&mut self) {
        if let Some(status) = S::ABORTED {
            self.publish(status);
        }
    }
}

/// Outcome of one container log query, as seen by the [`AgentTracker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogResponse<'a> {
    /// The container or its replica does not exist.
    NotFound,
    /// The container exists but its log is not available yet.
    ResourceNotReady,
    /// Log content was returned; carries the lines it completed.
    Output(&'a [String]),
}

/// Derives the agent status from successive log responses.
///
/// The agent is `Starting` once its container produces output and `Ready`
/// once a completed line contains the ready marker. Losing the log after it
/// has started means the container went away, which is terminal.
#[derive(Clone, Debug)]
pub struct AgentTracker {
    status: AgentStatus,
    ready_marker: String,
}

impl AgentTracker {
    /// Creates a tracker that recognises readiness by `ready_marker`.
    #[must_use]
    pub fn new(ready_marker: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Unknown,
            ready_marker: ready_marker.into(),
        }
    }

    /// Returns the current agent status.
    #[must_use]
    pub const fn status(&self) -> AgentStatus {
        self.status
    }

    /// Returns true once the agent status can no longer change through
    /// log observation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, AgentStatus::NotFound | AgentStatus::Failed)
    }

    /// Applies one log response, returning the new status when it changed.
    pub fn observe(&mut self, response: LogResponse<'_>) -> Option<AgentStatus> {
        let previous = self.status;
        self.status = match (previous, response) {
            (AgentStatus::NotFound | AgentStatus::Failed, _) => previous,
            (AgentStatus::Unknown, LogResponse::ResourceNotReady) => AgentStatus::NotReady,
            (AgentStatus::Unknown | AgentStatus::NotReady, LogResponse::Output(lines)) => {
                if self.contains_marker(lines) {
                    AgentStatus::Ready
                } else {
                    AgentStatus::Starting
                }
            }
            (AgentStatus::Starting, LogResponse::Output(lines)) if self.contains_marker(lines) => {
                AgentStatus::Ready
            }
            (AgentStatus::Starting | AgentStatus::Ready, LogResponse::Output(_)) => previous,
            (
                AgentStatus::Starting | AgentStatus::Ready,
                LogResponse::NotFound | LogResponse::ResourceNotReady,
            ) => AgentStatus::NotFound,
            (AgentStatus::Unknown | AgentStatus::NotReady, _) => previous,
        };

        (self.status != previous).then_some(self.status)
    }

    /// Marks the agent as failed after the application failed.
    pub fn abort(&mut self) -> Option<AgentStatus> {
        if self.is_terminal() {
            return None;
        }
        self.status = AgentStatus::Failed;
        Some(self.status)
    }

    fn contains_marker(&self, lines: &[String]) -> bool {
        lines.iter().any(|line| line.contains(&self.ready_marker))
    }
}

/// Polls the agent container log, reassembles it into lines and derives the
/// agent status from it.
pub struct AgentProbe<P> {
    provider: Arc<P>,
    name: MeshName,
    replica: u32,
    reassembler: LogReassembler,
    tracker: AgentTracker,
    sender: watch::Sender<AgentStatus>,
    echo_logs: bool,
}

impl<P: MeshProvider> AgentProbe<P> {
    /// Creates a probe for the given replica publishing into `sender`.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        name: MeshName,
        replica: u32,
        tracker: AgentTracker,
        sender: watch::Sender<AgentStatus>,
    ) -> Self {
        Self {
            provider,
            name,
            replica,
            reassembler: LogReassembler::new(),
            tracker,
            sender,
            echo_logs: true,
        }
    }

    /// Controls whether container log lines are logged.
    #[must_use]
    pub const fn with_log_echo(mut self, echo_logs: bool) -> Self {
        self.echo_logs = echo_logs;
        self
    }

    fn echo(&self, lines: &[String]) {
        if !self.echo_logs {
            return;
        }
        for line in lines {
            info!(target: "meshpool::container", mesh = %self.name, "{line}");
        }
    }

    fn publish(&self, change: Option<AgentStatus>) {
        if let Some(status) = change {
            self.sender.send_replace(status);
            debug!(mesh = %self.name, facet = "agent", %status, "status changed");
        }
    }

    async fn query(&mut self) -> Result<Flow, PollError> {
        trace!(mesh = %self.name, replica = self.replica, "querying container log");
        let lines = match self
            .provider
            .container_log(&self.name, self.replica)
            .await
        {
            Ok(content) => Some(self.reassembler.push(&content)?),
            Err(ProviderError::NotFound { .. }) => None,
            Err(ProviderError::NotReady { .. }) => {
                let status = self.tracker.observe(LogResponse::ResourceNotReady);
                self.publish(status);
                return Ok(self.flow());
            }
            Err(source) => {
                return Err(PollError::Provider {
                    facet: "agent",
                    source,
                });
            }
        };

        let status = match lines {
            Some(completed) => {
                self.echo(&completed);
                self.tracker.observe(LogResponse::Output(&completed))
            }
            None => self.tracker.observe(LogResponse::NotFound),
        };
        self.publish(status);
        Ok(self.flow())
    }

    fn flow(&self) -> Flow {
        if self.tracker.is_terminal() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

impl<P: MeshProvider> Probe for AgentProbe<P> {
    fn probe(&mut self) -> ProbeFuture<'_> {
        Box::pin(self.query())
    }

    fn aborted(&mut self) {
        let status = self.tracker.abort();
        self.publish(status);
    }

    fn finished(&mut self) {
        if let Some(remainder) = self.reassembler.finish() {
            self.echo(std::slice::from_ref(&remainder));
        }
    }
}
