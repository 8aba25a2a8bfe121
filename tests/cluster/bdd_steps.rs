//! BDD step definitions for cluster lifecycle behaviour.

use flotilla::test_support::provision_options;
use flotilla::{HostState, RuntimeState, SimulatedOp, StatusSnapshot};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ClusterContext, block_on, ctx, error_label, parse_health};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn status(cluster_context: &ClusterContext, profile: &str) -> Result<StatusSnapshot, StepError> {
    let orchestrator = cluster_context.orchestrator();
    block_on(orchestrator.status(profile, &ctx()))
        .map_err(|err| StepError::Assertion(format!("status of {profile} failed: {err}")))
}

fn expect_names(actual: &[String], expected: &str) -> Result<(), StepError> {
    let wanted: Vec<&str> = expected.split(',').map(str::trim).collect();
    if actual.iter().map(String::as_str).eq(wanted.iter().copied()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected nodes {wanted:?}, got {actual:?}"
        )))
    }
}

#[given("a simulated backend")]
fn simulated_backend(cluster_context: ClusterContext) -> ClusterContext {
    cluster_context
}

#[given("a simulated backend without restart support")]
fn backend_without_restart(cluster_context: ClusterContext) -> ClusterContext {
    cluster_context.driver.set_restart_supported(false);
    cluster_context
}

#[when("I create profile \"{profile}\" with {count:u32} nodes")]
fn create_profile(
    mut cluster_context: ClusterContext,
    profile: String,
    count: u32,
) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.create_cluster(&profile, count, provision_options(), &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("I add a node to profile \"{profile}\"")]
fn add_node(mut cluster_context: ClusterContext, profile: String) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.add_node(&profile, &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("I stop node \"{name}\" of profile \"{profile}\"")]
fn stop_node(mut cluster_context: ClusterContext, name: String, profile: String) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.stop_node(&profile, &name, &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("I start node \"{name}\" of profile \"{profile}\"")]
fn start_node(
    mut cluster_context: ClusterContext,
    name: String,
    profile: String,
) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.start_node(&profile, &name, &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("I delete node \"{name}\" of profile \"{profile}\"")]
fn delete_node(
    mut cluster_context: ClusterContext,
    name: String,
    profile: String,
) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.delete_node(&profile, &name, &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("I stop profile \"{profile}\"")]
fn stop_profile(mut cluster_context: ClusterContext, profile: String) -> ClusterContext {
    let orchestrator = cluster_context.orchestrator();
    let result = block_on(orchestrator.stop_cluster(&profile, &ctx()));
    cluster_context.remember(result);
    cluster_context
}

#[when("host probes fail for machine \"{machine}\"")]
fn host_probes_fail(cluster_context: ClusterContext, machine: String) -> ClusterContext {
    cluster_context
        .driver
        .fail_for(SimulatedOp::HostProbe, machine);
    cluster_context
}

#[then("profile \"{profile}\" reports {hosts:u32} running hosts and {kubelets:u32} running kubelets")]
fn reports_running(
    cluster_context: &ClusterContext,
    profile: String,
    hosts: u32,
    kubelets: u32,
) -> Result<(), StepError> {
    let snapshot = status(cluster_context, &profile)?;
    let running_hosts = snapshot
        .nodes
        .iter()
        .filter(|report| report.host() == HostState::Running)
        .count();
    let running_kubelets = snapshot
        .nodes
        .iter()
        .filter(|report| report.kubelet() == RuntimeState::Running)
        .count();
    if running_hosts == hosts as usize && running_kubelets == kubelets as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {hosts} running hosts and {kubelets} running kubelets, \
             got {running_hosts} and {running_kubelets}"
        )))
    }
}

#[then("profile \"{profile}\" reports {hosts:u32} stopped hosts and {kubelets:u32} stopped kubelets")]
fn reports_stopped(
    cluster_context: &ClusterContext,
    profile: String,
    hosts: u32,
    kubelets: u32,
) -> Result<(), StepError> {
    let snapshot = status(cluster_context, &profile)?;
    let stopped_hosts = snapshot
        .nodes
        .iter()
        .filter(|report| report.host() == HostState::Stopped)
        .count();
    let stopped_kubelets = snapshot
        .nodes
        .iter()
        .filter(|report| report.kubelet() == RuntimeState::Stopped)
        .count();
    if stopped_hosts == hosts as usize && stopped_kubelets == kubelets as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {hosts} stopped hosts and {kubelets} stopped kubelets, \
             got {stopped_hosts} and {stopped_kubelets}"
        )))
    }
}

#[then("profile \"{profile}\" is \"{health}\"")]
fn profile_health(
    cluster_context: &ClusterContext,
    profile: String,
    health: String,
) -> Result<(), StepError> {
    let expected = parse_health(&health)
        .ok_or_else(|| StepError::Assertion(format!("unknown health label: {health}")))?;
    let actual = status(cluster_context, &profile)?.health();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {actual:?}"
        )))
    }
}

#[then("profile \"{profile}\" has nodes \"{names}\"")]
fn profile_nodes(
    cluster_context: &ClusterContext,
    profile: String,
    names: String,
) -> Result<(), StepError> {
    let snapshot = status(cluster_context, &profile)?;
    let actual: Vec<String> = snapshot
        .nodes
        .iter()
        .map(|report| report.name.to_string())
        .collect();
    expect_names(&actual, &names)
}

#[then("a fresh orchestrator lists nodes \"{names}\" for profile \"{profile}\"")]
fn fresh_orchestrator_lists(
    cluster_context: &ClusterContext,
    names: String,
    profile: String,
) -> Result<(), StepError> {
    let orchestrator = cluster_context.orchestrator();
    let nodes = orchestrator
        .list_nodes(&profile)
        .map_err(|err| StepError::Assertion(format!("list nodes failed: {err}")))?;
    let actual: Vec<String> = nodes.iter().map(|node| node.name.to_string()).collect();
    expect_names(&actual, &names)
}

#[then("the last operation failed with \"{kind}\"")]
fn last_operation_failed(cluster_context: &ClusterContext, kind: String) -> Result<(), StepError> {
    match cluster_context.last_error {
        Some(actual) if error_label(actual) == kind => Ok(()),
        Some(actual) => Err(StepError::Assertion(format!(
            "expected {kind}, got {}",
            error_label(actual)
        ))),
        None => Err(StepError::Assertion(String::from(
            "expected the last operation to fail",
        ))),
    }
}
