//! BDD scenarios for the mesh lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Healthy mesh becomes ready and drains"
)]
fn scenario_healthy_mesh(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Failed application fails the mesh fast"
)]
fn scenario_application_failure(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Rejected creation leaves the lifecycle off"
)]
fn scenario_create_rejected(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Unrecognised status fails readiness"
)]
fn scenario_unrecognised_status(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
