//! Unit tests for the batch orchestrator.

use std::collections::BTreeSet;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::provider::ProviderError;
use crate::test_support::{CallKind, ScriptedProvider};

const INTERVAL: Duration = Duration::from_millis(100);

#[fixture]
fn request() -> Arc<MeshRequest> {
    let request = MeshRequest::builder()
        .name_prefix("batch-")
        .image_name("agent:latest")
        .image_registry_server("registry.example.com")
        .image_registry_username("robot")
        .image_registry_password("secret")
        .resource_group("build-agents")
        .location("eastus")
        .pipelines_url("https://dev.example.com/org")
        .pipelines_token("pat")
        .build()
        .expect("request fixture should be valid");
    Arc::new(request)
}

fn orchestrator(
    provider: &ScriptedProvider,
    request: Arc<MeshRequest>,
    parallelism: usize,
    policy: BatchFailurePolicy,
) -> BatchOrchestrator<ScriptedProvider> {
    let options = LifecycleOptions {
        poll_interval: INTERVAL,
        output_container_logs: false,
        output_component_status: false,
        ..LifecycleOptions::default()
    };
    BatchOrchestrator::new(
        Arc::new(provider.clone()),
        request,
        Handle::current(),
        parallelism,
    )
    .with_options(options)
    .with_failure_policy(policy)
}

fn assert_all_created_deleted(provider: &ScriptedProvider) {
    for name in provider.created() {
        assert_eq!(
            provider.count_for(&name, CallKind::Delete),
            1,
            "mesh {name} should be deleted exactly once"
        );
    }
}

#[rstest]
#[case(3, 2)]
#[case(3, 1)]
#[case(4, 4)]
#[tokio::test(start_paused = true)]
async fn batch_respects_parallelism(
    request: Arc<MeshRequest>,
    #[case] count: usize,
    #[case] parallelism: usize,
) {
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    let batch_runner = orchestrator(&provider, request, parallelism, BatchFailurePolicy::Abort);

    let batch = batch_runner.start(count).await.expect("batch should start");

    assert_eq!(batch.len(), count);
    assert!(batch.failures().is_empty());
    let names: BTreeSet<_> = batch.names().into_iter().collect();
    assert_eq!(names.len(), count);
    assert!(provider.peak_provisioning() <= parallelism);
    assert_eq!(batch_runner.limiter().available(), parallelism);

    batch_runner.stop(batch).await.expect("batch should stop");
    assert_all_created_deleted(&provider);

    let calls = provider.calls().len();
    tokio::time::sleep(INTERVAL * 20).await;
    assert_eq!(provider.calls().len(), calls);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn slow_creates_hold_their_slot(request: Arc<MeshRequest>) {
    let create_delay = INTERVAL * 30;
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    provider.set_create_delay(create_delay);
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Abort);
    let started_at = tokio::time::Instant::now();

    let batch = batch_runner.start(4).await.expect("batch should start");

    assert!(started_at.elapsed() >= create_delay * 2);
    assert_eq!(provider.count(CallKind::Create), 4);
    assert!(provider.peak_provisioning() <= 2);
    assert!(
        batch
            .meshes()
            .iter()
            .all(|mesh| mesh.phase() == LifecyclePhase::Ready)
    );

    batch_runner.stop(batch).await.expect("batch should stop");
    assert_all_created_deleted(&provider);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn abort_policy_tears_down_everything(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    provider.fail_next_create(ProviderError::other("quota exceeded"));
    let batch_runner = orchestrator(&provider, request, 1, BatchFailurePolicy::Abort);

    let err = batch_runner
        .start(3)
        .await
        .err()
        .expect("first failure aborts the batch");

    assert!(matches!(
        err,
        BatchError::Lifecycle(LifecycleError::Create { .. })
    ));
    assert_all_created_deleted(&provider);
    assert_eq!(batch_runner.limiter().available(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn continue_policy_keeps_healthy_meshes(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    provider.fail_next_create(ProviderError::other("quota exceeded"));
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Continue);

    let batch = batch_runner.start(3).await.expect("continue tolerates failures");

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.failures().len(), 1);
    assert!(matches!(
        batch.failures().first(),
        Some(BatchError::Lifecycle(LifecycleError::Create { .. }))
    ));
    for name in batch.names() {
        assert_eq!(provider.count_for(&name, CallKind::Delete), 0);
    }

    batch_runner.stop(batch).await.expect("batch should stop");
    assert_all_created_deleted(&provider);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_meshes_abort_the_batch(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    provider.script_application(["Creating", "Failed"]);
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Abort);

    let err = batch_runner.start(2).await.err().expect("failed meshes abort");

    assert!(matches!(err, BatchError::MeshFailed { .. }));
    assert_all_created_deleted(&provider);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stop_attempts_every_mesh(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Abort);
    let batch = batch_runner.start(2).await.expect("batch should start");

    provider.fail_next_delete(ProviderError::other("conflict"));
    let err = batch_runner.stop(batch).await.expect_err("one delete fails");

    assert!(matches!(err, BatchError::Stop { failed: 1, .. }));
    assert_eq!(provider.count(CallKind::Delete), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn empty_batch_is_trivial(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Abort);

    let batch = batch_runner.start(0).await.expect("nothing to start");

    assert!(batch.is_empty());
    batch_runner.stop(batch).await.expect("nothing to stop");
    assert!(provider.calls().is_empty());
}

#[rstest]
#[case("abort", BatchFailurePolicy::Abort)]
#[case("Continue", BatchFailurePolicy::Continue)]
#[case(" continue ", BatchFailurePolicy::Continue)]
fn parses_failure_policy(#[case] raw: &str, #[case] expected: BatchFailurePolicy) {
    assert_eq!(raw.parse::<BatchFailurePolicy>(), Ok(expected));
}

#[rstest]
fn rejects_unknown_failure_policy() {
    let err = "retry"
        .parse::<BatchFailurePolicy>()
        .expect_err("retry is not a policy");
    assert!(err.to_string().contains("retry"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shutdown_before_start_creates_nothing(request: Arc<MeshRequest>) {
    let provider = ScriptedProvider::new();
    provider.script_healthy_mesh();
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let batch_runner = orchestrator(&provider, request, 2, BatchFailurePolicy::Continue)
        .with_shutdown(shutdown);

    let batch = batch_runner.start(3).await.expect("continue reports aborts");

    assert!(batch.is_empty());
    assert_eq!(batch.failures().len(), 3);
    assert!(batch.failures().iter().all(|err| matches!(err, BatchError::Aborted)));
    assert_eq!(provider.count(CallKind::Create), 0);
}
