//! BDD step definitions for mesh batches.

use std::sync::Arc;

use meshpool::test_support::CallKind;
use meshpool::{
    BatchError, BatchFailurePolicy, BatchOrchestrator, LifecycleError, LifecycleOptions,
    ProviderError,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::{Builder, Handle};

use super::test_helpers::{BatchContext, BatchOutcome, INTERVAL};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("runtime setup failed: {0}")]
    Runtime(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a provider that brings meshes up healthy")]
fn healthy_provider(batch_context: &BatchContext) {
    batch_context.provider.script_healthy_mesh();
}

#[given("the first create is rejected")]
fn first_create_rejected(batch_context: &BatchContext) {
    batch_context
        .provider
        .fail_next_create(ProviderError::other("quota exceeded"));
}

#[given("a batch of \"{count}\" meshes with parallelism \"{parallelism}\"")]
fn batch_of(batch_context: &BatchContext, count: usize, parallelism: usize) {
    batch_context.update_settings(|settings| {
        settings.count = count;
        settings.parallelism = parallelism;
    });
}

#[given("the batch continues on failure")]
fn continues_on_failure(batch_context: &BatchContext) {
    batch_context.update_settings(|settings| settings.policy = BatchFailurePolicy::Continue);
}

#[when("I run the batch and stop it")]
fn run_batch(batch_context: &BatchContext) -> Result<(), StepError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Runtime(err.to_string()))?;
    let settings = batch_context.settings();
    let provider = Arc::new(batch_context.provider.clone());
    let request = Arc::clone(&batch_context.request);

    let outcome = runtime.block_on(async move {
        let options = LifecycleOptions {
            poll_interval: INTERVAL,
            output_container_logs: false,
            output_component_status: false,
            ..LifecycleOptions::default()
        };
        let orchestrator =
            BatchOrchestrator::new(provider, request, Handle::current(), settings.parallelism)
                .with_options(options)
                .with_failure_policy(settings.policy);

        match orchestrator.start(settings.count).await {
            Ok(batch) => {
                let ready = batch.len();
                let failures = batch.failures().len();
                orchestrator
                    .stop(batch)
                    .await
                    .map(|()| BatchOutcome::Started { ready, failures })
                    .map_err(|err| err.to_string())
            }
            Err(err) => Ok(BatchOutcome::Failed {
                create_error: matches!(err, BatchError::Lifecycle(LifecycleError::Create { .. })),
            }),
        }
    });

    let recorded = outcome.map_err(StepError::Assertion)?;
    batch_context.record(recorded);
    Ok(())
}

#[then("\"{count}\" meshes became ready")]
fn meshes_ready(batch_context: &BatchContext, count: usize) -> Result<(), StepError> {
    match batch_context.outcome() {
        Some(BatchOutcome::Started { ready, .. }) if ready == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} ready meshes, got {other:?}"
        ))),
    }
}

#[then("\"{count}\" failures are reported")]
fn failures_reported(batch_context: &BatchContext, count: usize) -> Result<(), StepError> {
    match batch_context.outcome() {
        Some(BatchOutcome::Started { failures, .. }) if failures == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} reported failures, got {other:?}"
        ))),
    }
}

#[then("at most \"{parallelism}\" meshes were provisioning at once")]
fn bounded_provisioning(batch_context: &BatchContext, parallelism: usize) -> Result<(), StepError> {
    let peak = batch_context.provider.peak_provisioning();
    if peak <= parallelism {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{peak} meshes provisioned at once, limit was {parallelism}"
        )))
    }
}

#[then("the batch fails with a create error")]
fn batch_create_error(batch_context: &BatchContext) -> Result<(), StepError> {
    match batch_context.outcome() {
        Some(BatchOutcome::Failed { create_error: true }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a create error, got {other:?}"
        ))),
    }
}

#[then("every created mesh is deleted exactly once")]
fn all_deleted(batch_context: &BatchContext) -> Result<(), StepError> {
    for mesh in batch_context.provider.created() {
        let deletes = batch_context.provider.count_for(&mesh, CallKind::Delete);
        if deletes != 1 {
            return Err(StepError::Assertion(format!(
                "mesh {mesh} was deleted {deletes} times"
            )));
        }
    }
    Ok(())
}
