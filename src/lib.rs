//! Core library for the meshpool agent provisioner.
//!
//! The crate creates disposable container meshes that host build agents,
//! watches their application, service and agent status until the agent is
//! ready for work, and tears them down again. A batch orchestrator runs many
//! such lifecycles under a shared concurrency limit.

pub mod azure;
pub mod config;
pub mod fusion;
pub mod lifecycle;
pub mod limiter;
pub mod log_stream;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod status;
pub mod test_support;

pub use azure::{AzureMeshProvider, AzureSettings};
pub use config::MeshConfig;
pub use fusion::Readiness;
pub use lifecycle::{
    CompletionSignal, LifecycleError, LifecycleOptions, LifecyclePhase, MeshLifecycle,
    ReadySignal,
};
pub use limiter::{ConcurrencyLimiter, ConcurrencyToken, LimiterClosed};
pub use log_stream::{LogCursor, LogReassembler, LogStreamError};
pub use orchestrator::{BatchError, BatchFailurePolicy, BatchOrchestrator, MeshBatch};
pub use poller::{PollError, StatusPoller};
pub use provider::{
    MeshName, MeshProvider, MeshRequest, MeshRequestBuilder, ProviderError, RequestError,
};
pub use status::{AgentStatus, ApplicationStatus, ServiceStatus, StatusSnapshot};
