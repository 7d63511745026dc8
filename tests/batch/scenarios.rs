//! BDD scenarios for mesh batches.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BatchContext, batch_context};

#[scenario(
    path = "tests/features/batch.feature",
    name = "Batch stays within its parallelism"
)]
fn scenario_parallelism(batch_context: BatchContext) {
    drop(batch_context);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Abort policy tears down the batch after a failure"
)]
fn scenario_abort_policy(batch_context: BatchContext) {
    drop(batch_context);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Continue policy keeps healthy meshes"
)]
fn scenario_continue_policy(batch_context: BatchContext) {
    drop(batch_context);
}
