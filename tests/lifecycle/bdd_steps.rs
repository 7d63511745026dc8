//! BDD step definitions for the mesh lifecycle.

use std::sync::Arc;

use meshpool::test_support::CallKind;
use meshpool::{
    LifecycleError, LifecycleOptions, LifecyclePhase, MeshLifecycle, ProviderError, Readiness,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::{Builder, Handle};

use super::test_helpers::{INTERVAL, LifecycleContext, LifecycleOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("runtime setup failed: {0}")]
    Runtime(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a provider that brings meshes up healthy")]
fn healthy_provider(lifecycle_context: &LifecycleContext) {
    lifecycle_context.provider.script_healthy_mesh();
}

#[given("a provider whose application fails")]
fn failing_application(lifecycle_context: &LifecycleContext) {
    lifecycle_context.provider.script_application(["Failed"]);
}

#[given("a provider that rejects creation")]
fn rejecting_provider(lifecycle_context: &LifecycleContext) {
    lifecycle_context
        .provider
        .fail_next_create(ProviderError::other("quota exceeded"));
}

#[given("a provider reporting an unrecognised application status")]
fn unrecognised_status(lifecycle_context: &LifecycleContext) {
    lifecycle_context
        .provider
        .script_application(["Creating", "Exploded"]);
}

#[when("I run a mesh to its verdict and tear it down")]
fn run_mesh(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Runtime(err.to_string()))?;
    let provider = lifecycle_context.provider.clone();
    let request = Arc::clone(&lifecycle_context.request);

    let outcome = runtime.block_on(async move {
        let options = LifecycleOptions {
            poll_interval: INTERVAL,
            output_container_logs: false,
            output_component_status: false,
            ..LifecycleOptions::default()
        };
        let mut lifecycle = MeshLifecycle::new(Arc::new(provider.clone()), request, Handle::current())
            .with_options(options);

        let ready = match lifecycle.start().await {
            Ok(ready) => ready,
            Err(error) => {
                return LifecycleOutcome::StartFailed {
                    error,
                    phase: lifecycle.phase(),
                };
            }
        };
        let mesh = ready.mesh().clone();
        let verdict = ready.await;

        if let Ok(completion) = lifecycle.stop().await {
            completion.await;
        }
        let calls_after_drain = provider.total_for(&mesh);
        tokio::time::sleep(INTERVAL * 20).await;
        LifecycleOutcome::Settled {
            calls_later: provider.total_for(&mesh),
            mesh,
            verdict,
            phase: lifecycle.phase(),
            calls_after_drain,
        }
    });

    lifecycle_context.record(outcome);
    Ok(())
}

fn settled(
    lifecycle_context: &LifecycleContext,
) -> Result<(Result<Readiness, LifecycleError>, usize, usize), StepError> {
    match lifecycle_context.outcome() {
        Some(LifecycleOutcome::Settled {
            verdict,
            calls_after_drain,
            calls_later,
            ..
        }) => Ok((verdict, calls_after_drain, calls_later)),
        Some(LifecycleOutcome::StartFailed { error, .. }) => Err(StepError::Assertion(format!(
            "expected the mesh to start, got {error}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the verdict is \"{verdict}\"")]
fn verdict_is(lifecycle_context: &LifecycleContext, verdict: String) -> Result<(), StepError> {
    let (observed, _, _) = settled(lifecycle_context)?;
    let matches = match verdict.as_str() {
        "ready" => observed == Ok(Readiness::Ready),
        "failed" => observed == Ok(Readiness::Failed),
        "poll error" => matches!(observed, Err(LifecycleError::Poll { .. })),
        other => {
            return Err(StepError::Assertion(format!("unknown verdict {other}")));
        }
    };
    if matches {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected verdict {verdict}, got {observed:?}"
        )))
    }
}

#[then("the mesh is deleted exactly once")]
fn deleted_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let Some(LifecycleOutcome::Settled { mesh, .. }) = lifecycle_context.outcome() else {
        return Err(StepError::Assertion(String::from("mesh never started")));
    };
    let deletes = lifecycle_context.provider.count_for(&mesh, CallKind::Delete);
    if deletes == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one delete of {mesh}, saw {deletes}"
        )))
    }
}

#[then("no provider calls follow the drain")]
fn quiet_after_drain(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let (_, after_drain, later) = settled(lifecycle_context)?;
    if after_drain == later {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{} provider calls arrived after the drain",
            later.saturating_sub(after_drain)
        )))
    }
}

#[then("the agent log is never read")]
fn agent_log_untouched(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let reads = lifecycle_context.provider.count(CallKind::ContainerLog);
    if reads == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no container log reads, saw {reads}"
        )))
    }
}

#[then("the start fails with a create error")]
fn start_failed(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context.outcome() {
        Some(LifecycleOutcome::StartFailed {
            error: LifecycleError::Create { .. },
            ..
        }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a create error, got {other:?}"
        ))),
    }
}

#[then("the lifecycle ends \"{phase}\"")]
fn lifecycle_ends(lifecycle_context: &LifecycleContext, phase: String) -> Result<(), StepError> {
    let observed = match lifecycle_context.outcome() {
        Some(
            LifecycleOutcome::StartFailed { phase: observed, .. }
            | LifecycleOutcome::Settled { phase: observed, .. },
        ) => observed,
        None => return Err(StepError::Assertion(String::from("missing outcome"))),
    };
    let expected = match phase.as_str() {
        "off" => LifecyclePhase::Off,
        "ready" => LifecyclePhase::Ready,
        "failed" => LifecyclePhase::Failed,
        other => return Err(StepError::Assertion(format!("unknown phase {other}"))),
    };
    if observed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected phase {expected}, got {observed}"
        )))
    }
}
