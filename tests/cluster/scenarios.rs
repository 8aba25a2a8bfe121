//! BDD scenarios for cluster lifecycle operations.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ClusterContext, cluster_context};

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Grow, degrade and shrink a cluster"
)]
fn scenario_grow_degrade_shrink(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Refuse to delete the control plane"
)]
fn scenario_control_plane_delete(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Deleted names are never reused"
)]
fn scenario_names_not_reused(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Restart on a backend that cannot restart hosts"
)]
fn scenario_restart_unsupported(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Status survives a failing probe"
)]
fn scenario_failing_probe(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Stopping every node leaves the cluster unavailable"
)]
fn scenario_stop_profile(cluster_context: ClusterContext) {
    let _ = cluster_context;
}

#[scenario(
    path = "tests/features/cluster.feature",
    name = "Profiles reload from persistence"
)]
fn scenario_reload(cluster_context: ClusterContext) {
    let _ = cluster_context;
}
