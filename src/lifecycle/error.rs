//! Errors raised by [`super::MeshLifecycle`].

use thiserror::Error;

use crate::limiter::LimiterClosed;
use crate::poller::PollError;
use crate::provider::{MeshName, ProviderError};

use super::LifecyclePhase;

/// Errors surfaced by lifecycle operations and readiness signals.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// The operation is not allowed in the current phase.
    #[error("cannot {operation} a mesh in phase {phase}")]
    InvalidPhase {
        /// Operation that was attempted.
        operation: &'static str,
        /// Phase the lifecycle was in.
        phase: LifecyclePhase,
    },
    /// The provider rejected the create request.
    #[error("failed to create mesh {mesh}: {source}")]
    Create {
        /// Mesh that could not be created.
        mesh: MeshName,
        /// Provider error.
        #[source]
        source: ProviderError,
    },
    /// The provider rejected the delete request.
    #[error("failed to delete mesh {mesh}: {source}")]
    Delete {
        /// Mesh that could not be deleted.
        mesh: MeshName,
        /// Provider error.
        #[source]
        source: ProviderError,
    },
    /// A status poller failed before the mesh settled.
    #[error("polling mesh {mesh} failed: {source}")]
    Poll {
        /// Mesh being polled.
        mesh: MeshName,
        /// Poller error.
        #[source]
        source: PollError,
    },
    /// The mesh was stopped before it settled.
    #[error("mesh {mesh} was stopped before it settled")]
    Cancelled {
        /// Mesh that was stopped.
        mesh: MeshName,
    },
    /// The shutdown token fired before the create request was sent.
    #[error("mesh start aborted before creation")]
    Aborted,
    /// No concurrency token could be obtained.
    #[error(transparent)]
    Limiter(#[from] LimiterClosed),
}
