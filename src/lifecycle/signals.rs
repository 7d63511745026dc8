//! One-shot signals returned by `start` and `stop`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::fusion::Readiness;
use crate::limiter::ConcurrencyToken;
use crate::provider::MeshName;

use super::LifecycleError;

/// Resolves once the mesh settles as ready or failed.
///
/// Holds the concurrency token acquired by `start`; the token is released
/// when the signal resolves or is dropped.
#[derive(Debug)]
#[must_use = "dropping the signal releases the concurrency slot without waiting for readiness"]
pub struct ReadySignal {
    mesh: MeshName,
    receiver: oneshot::Receiver<Result<Readiness, LifecycleError>>,
    token: Option<ConcurrencyToken>,
}

impl ReadySignal {
    pub(super) const fn new(
        mesh: MeshName,
        receiver: oneshot::Receiver<Result<Readiness, LifecycleError>>,
        token: Option<ConcurrencyToken>,
    ) -> Self {
        Self {
            mesh,
            receiver,
            token,
        }
    }

    /// Mesh this signal belongs to.
    #[must_use]
    pub const fn mesh(&self) -> &MeshName {
        &self.mesh
    }
}

impl Future for ReadySignal {
    type Output = Result<Readiness, LifecycleError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(received) => received,
        };
        self.token = None;
        Poll::Ready(received.unwrap_or_else(|_| {
            Err(LifecycleError::Cancelled {
                mesh: self.mesh.clone(),
            })
        }))
    }
}

/// Resolves once a stopped mesh has been fully drained.
#[derive(Debug)]
#[must_use = "the completion signal reports when polling has drained"]
pub struct CompletionSignal {
    receiver: oneshot::Receiver<()>,
}

impl CompletionSignal {
    pub(super) const fn new(receiver: oneshot::Receiver<()>) -> Self {
        Self { receiver }
    }
}

impl Future for CompletionSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|_| ())
    }
}
