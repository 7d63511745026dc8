//! Closed status enumerations reported for each facet of a mesh.
//!
//! Application and service statuses arrive from the provider as strings and
//! are parsed strictly; the agent status is derived locally from the
//! container log stream.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Raised when the provider reports a status string outside the known set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unrecognised {facet} status '{value}'")]
pub struct StatusParseError {
    /// Facet whose status could not be parsed.
    pub facet: &'static str,
    /// Raw value returned by the provider.
    pub value: String,
}

/// Status of the mesh application resource.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ApplicationStatus {
    /// Nothing observed yet.
    #[default]
    Unknown,
    /// The provider is provisioning the application.
    Creating,
    /// The application is fully provisioned.
    Ready,
    /// The application is being removed.
    Deleting,
    /// Provisioning failed.
    Failed,
    /// The application does not exist.
    NotFound,
}

/// Status of the agent service inside the mesh application.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ServiceStatus {
    /// Nothing observed yet.
    #[default]
    Unknown,
    /// The service is running.
    Ready,
    /// The service failed or was aborted.
    Failed,
    /// The service does not exist.
    NotFound,
}

/// Status of the build agent, derived from its container log.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AgentStatus {
    /// Nothing observed yet.
    #[default]
    Unknown,
    /// The container exists but its log is not available yet.
    NotReady,
    /// The container produces output but the agent is not listening yet.
    Starting,
    /// The agent is listening for jobs.
    Ready,
    /// The agent was aborted because the application failed.
    Failed,
    /// The container disappeared after it had started.
    NotFound,
}

impl FromStr for ApplicationStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Unknown" => Ok(Self::Unknown),
            "Creating" => Ok(Self::Creating),
            "Ready" => Ok(Self::Ready),
            "Deleting" => Ok(Self::Deleting),
            "Failed" => Ok(Self::Failed),
            "NotFound" => Ok(Self::NotFound),
            other => Err(StatusParseError {
                facet: "application",
                value: other.to_owned(),
            }),
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Unknown" => Ok(Self::Unknown),
            "Ready" => Ok(Self::Ready),
            "Failed" => Ok(Self::Failed),
            "NotFound" => Ok(Self::NotFound),
            other => Err(StatusParseError {
                facet: "service",
                value: other.to_owned(),
            }),
        }
    }
}

macro_rules! display_as_debug {
    ($($name:ident),+) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Debug::fmt(self, f)
                }
            }
        )+
    };
}

display_as_debug!(ApplicationStatus, ServiceStatus, AgentStatus);

/// Latest status of all three facets, as seen by the fusion step.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct StatusSnapshot {
    /// Application status.
    pub application: ApplicationStatus,
    /// Service status.
    pub service: ServiceStatus,
    /// Agent status.
    pub agent: AgentStatus,
}

impl StatusSnapshot {
    /// Builds a snapshot from its three components.
    #[must_use]
    pub const fn new(
        application: ApplicationStatus,
        service: ServiceStatus,
        agent: AgentStatus,
    ) -> Self {
        Self {
            application,
            service,
            agent,
        }
    }

    /// Returns true when every facet reports ready.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.application == ApplicationStatus::Ready
            && self.service == ServiceStatus::Ready
            && self.agent == AgentStatus::Ready
    }

    /// Returns true when every facet reports failure.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.application == ApplicationStatus::Failed
            && self.service == ServiceStatus::Failed
            && self.agent == AgentStatus::Failed
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "application {:>8} service {:>8} agent {:>8}",
            self.application.to_string(),
            self.service.to_string(),
            self.agent.to_string()
        )
    }
}
