//! CLI behaviour under injected simulated-driver faults.
//!
//! These tests build the binary with the `test-backdoors` feature so the
//! simulated driver honours `FLOTILLA_SIMULATED_FAULTS`.

#[path = "support/cli_env.rs"]
mod cli_env;

use std::sync::LazyLock;

use escargot::CargoBuild;
use predicates::prelude::*;
use rstest::{fixture, rstest};

use cli_env::CliEnv;

#[expect(
    clippy::expect_used,
    reason = "test setup requires panic on build failure"
)]
static FLOTILLA_BIN: LazyLock<escargot::CargoRun> = LazyLock::new(|| {
    CargoBuild::new()
        .bin("flotilla")
        .features("test-backdoors")
        .run()
        .expect("failed to build flotilla with test-backdoors feature")
});

#[fixture]
fn env() -> CliEnv {
    CliEnv::new()
}

fn flotilla(env: &CliEnv, args: &[&str]) -> assert_cmd::Command {
    env.prepare(FLOTILLA_BIN.command().into(), args)
}

fn two_node_cluster(env: &CliEnv) {
    flotilla(env, &["start", "-p", "p", "--nodes", "2"])
        .assert()
        .success();
}

#[rstest]
fn failed_restart_exits_with_restart_code(env: CliEnv) {
    two_node_cluster(&env);
    flotilla(&env, &["node", "stop", "-p", "p", "m02"])
        .assert()
        .success();

    flotilla(&env, &["node", "start", "-p", "p", "m02"])
        .env("FLOTILLA_SIMULATED_FAULTS", "host.start@p-m02")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("restarting node m02"))
        .stderr(predicate::str::contains("start host"));

    flotilla(&env, &["node", "start", "-p", "p", "m02"])
        .assert()
        .success()
        .stdout("started node m02\n");
}

#[rstest]
fn failing_probe_degrades_status_without_failing_it(env: CliEnv) {
    two_node_cluster(&env);

    flotilla(&env, &["status", "-p", "p", "--output", "json"])
        .env("FLOTILLA_SIMULATED_FAULTS", "host.probe@p-m02")
        .assert()
        .code(7)
        .stdout(predicate::str::contains("\"health\": \"degraded\""))
        .stdout(predicate::str::contains("\"probe_error\""));
}

#[rstest]
fn provisioning_failure_names_node_and_step(env: CliEnv) {
    flotilla(&env, &["start", "-p", "p", "--nodes", "3"])
        .env("FLOTILLA_SIMULATED_FAULTS", "runtime.install@p-m02")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "node m02 of profile 'p' failed to install runtime",
        ));

    flotilla(&env, &["node", "list", "-p", "p"])
        .assert()
        .success()
        .stdout("m01\tp\tcontrol-plane\thost=Running\tkubelet=Running\nm02\tp-m02\tworker\thost=Running\tkubelet=Stopped\n");
}

#[rstest]
fn unknown_fault_labels_are_rejected(env: CliEnv) {
    flotilla(&env, &["profile", "list"])
        .env("FLOTILLA_SIMULATED_FAULTS", "host.reboot")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("host.reboot"));
}
