//! Unit tests for the `flotilla` CLI binary implementation.

use super::*;
use crate::cli::{NodeArgs, ProfileArgs};
use flotilla::test_support::EnvGuard;
use flotilla::{NodeName, NodeRole, NodeState};
use rstest::rstest;
use tempfile::TempDir;

fn profile_args(profile: &str) -> ProfileArgs {
    ProfileArgs {
        profile: profile.to_owned(),
    }
}

fn start_command(profile: &str, nodes: u32) -> StartCommand {
    StartCommand {
        target: profile_args(profile),
        nodes,
        cpus: None,
        memory_mb: None,
        disk_gb: None,
        kubernetes_version: None,
    }
}

fn status_command(profile: &str) -> StatusCommand {
    StatusCommand {
        target: profile_args(profile),
        output: OutputArg::Summary,
    }
}

fn configured() -> FlotillaConfig {
    FlotillaConfig {
        state_dir: String::from("/var/lib/flotilla"),
        driver: String::from("simulated"),
        host_driver_bin: None,
        runtime_bin: None,
        host_restart_supported: true,
        operation_timeout_secs: 600,
        poll_interval_ms: 500,
        reconcile_timeout_secs: 10,
        degraded_exit_code: 7,
        unavailable_exit_code: 8,
        cpus: 2,
        memory_mb: 2200,
        disk_gb: 20,
        kubernetes_version: String::from("v1.30.0"),
    }
}

fn backend_failure() -> ClusterError {
    ClusterError::Backend {
        profile: String::from("p"),
        node: NodeName::for_ordinal(2),
        step: flotilla::Step::StartHost,
        source: Box::new(std::io::Error::other("boom")),
    }
}

#[rstest]
#[case(CliError::Cluster(ClusterError::RestartUnsupported {
    profile: String::from("p"),
    node: NodeName::for_ordinal(2),
}), false, EXIT_RESTART_FAILED)]
#[case(CliError::Cluster(ClusterError::RestartUnreliable {
    profile: String::from("p"),
    node: NodeName::for_ordinal(2),
    step: flotilla::Step::StartHost,
    source: Box::new(std::io::Error::other("boom")),
}), false, EXIT_RESTART_FAILED)]
#[case(CliError::Cluster(backend_failure()), false, EXIT_FAILURE)]
#[case(CliError::Cluster(backend_failure()), true, EXIT_UNAVAILABLE)]
#[case(CliError::Status { code: 42, source: backend_failure() }, true, 42)]
fn exit_codes_follow_error_and_command(
    #[case] err: CliError,
    #[case] for_status: bool,
    #[case] expected: i32,
) {
    assert_eq!(err.exit_code(for_status), expected);
}

#[test]
fn start_flags_override_configured_defaults() {
    let config = configured();
    let args = StartCommand {
        cpus: Some(4),
        kubernetes_version: Some(String::from("v1.29.2")),
        ..start_command("p", 1)
    };

    let options = start_options(&config, &args).expect("options");

    assert_eq!(options.cpus, 4);
    assert_eq!(options.memory_mb, config.memory_mb);
    assert_eq!(options.kubernetes_version, "v1.29.2");
}

#[test]
fn node_lines_show_both_layers() {
    let listed = Node {
        name: NodeName::for_ordinal(2),
        ordinal: 2,
        role: NodeRole::Worker,
        state: NodeState::HostOnly,
    };

    assert_eq!(
        node_line("p", &listed),
        "m02\tp-m02\tworker\thost=Running\tkubelet=Stopped"
    );
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    write_error(&mut buf, &CliError::Cluster(backend_failure()));
    let rendered = String::from_utf8(buf).expect("utf8");
    assert_eq!(
        rendered,
        "node m02 of profile 'p' failed to start host: boom\n"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn dispatch_runs_against_simulated_state() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = tmp.path().to_string_lossy().into_owned();
    let state_dir = format!("{root}/state");
    let _guard = EnvGuard::set_vars(&[
        ("HOME", root.as_str()),
        ("FLOTILLA_STATE_DIR", state_dir.as_str()),
        ("FLOTILLA_DRIVER", "simulated"),
    ])
    .await;

    let started = dispatch(Command::Start(start_command("p", 2))).await;
    assert!(matches!(started, Ok(EXIT_OK)), "start: {started:?}");

    let healthy = dispatch(Command::Status(status_command("p"))).await;
    assert!(matches!(healthy, Ok(EXIT_OK)), "status: {healthy:?}");

    let stopped = dispatch(Command::Node(NodeCommand::Stop(NodeArgs {
        target: profile_args("p"),
        name: String::from("m02"),
    })))
    .await;
    assert!(matches!(stopped, Ok(EXIT_OK)), "stop: {stopped:?}");

    let degraded = dispatch(Command::Status(status_command("p"))).await;
    assert!(
        matches!(degraded, Ok(flotilla::EXIT_DEGRADED)),
        "status: {degraded:?}"
    );

    let missing = dispatch(Command::Status(status_command("absent")))
        .await
        .expect_err("unknown profile");
    assert_eq!(missing.exit_code(true), EXIT_UNAVAILABLE);
}
