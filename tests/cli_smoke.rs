//! Behavioural smoke tests for the CLI entrypoint.

#[path = "support/cli_env.rs"]
mod cli_env;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};

use cli_env::CliEnv;

#[fixture]
fn env() -> CliEnv {
    CliEnv::new()
}

fn flotilla(env: &CliEnv, args: &[&str]) -> assert_cmd::Command {
    env.prepare(cargo_bin_cmd!("flotilla"), args)
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("flotilla");
    cmd.assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("Usage"));
}

#[rstest]
fn lifecycle_reports_degraded_then_healthy(env: CliEnv) {
    flotilla(&env, &["start", "-p", "p", "--nodes", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m01, m02"));

    flotilla(&env, &["status", "-p", "p"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("host: Running").count(2))
        .stdout(predicate::str::contains("kubelet: Running").count(2));

    flotilla(&env, &["node", "add", "-p", "p"])
        .assert()
        .success()
        .stdout("added node m03 (p-m03)\n");

    flotilla(&env, &["node", "stop", "-p", "p", "m03"])
        .assert()
        .success()
        .stdout("stopped node m03\n");

    flotilla(&env, &["status", "-p", "p", "--output", "summary"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains(
            "m03\tp-m03\tworker\thost=Stopped\tkubelet=Stopped",
        ));

    flotilla(&env, &["node", "delete", "-p", "p", "m03"])
        .assert()
        .success()
        .stdout("deleted node m03\n");

    flotilla(&env, &["status", "-p", "p"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("p-m03").not());
}

#[rstest]
fn control_plane_delete_is_refused(env: CliEnv) {
    flotilla(&env, &["start", "-p", "p", "--nodes", "2"])
        .assert()
        .success();

    flotilla(&env, &["node", "delete", "-p", "p", "m01"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("control plane"));

    flotilla(&env, &["node", "list", "-p", "p"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m01\tp\tcontrol-plane"))
        .stdout(predicate::str::contains("m02\tp-m02\tworker"));
}

#[rstest]
fn status_of_unknown_profile_is_unavailable(env: CliEnv) {
    flotilla(&env, &["status", "-p", "missing"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("profile 'missing' not found"));
}

#[rstest]
fn configured_exit_codes_apply(env: CliEnv) {
    flotilla(&env, &["start", "-p", "p", "--nodes", "2"])
        .assert()
        .success();
    flotilla(&env, &["node", "stop", "-p", "p", "m02"])
        .assert()
        .success();

    flotilla(&env, &["status", "-p", "p"])
        .env("FLOTILLA_DEGRADED_EXIT_CODE", "42")
        .assert()
        .code(42);
}

#[rstest]
fn stop_and_delete_remove_the_profile(env: CliEnv) {
    flotilla(&env, &["start", "-p", "alpha", "--nodes", "2"])
        .assert()
        .success();
    flotilla(&env, &["start", "-p", "beta"]).assert().success();

    flotilla(&env, &["profile", "list"])
        .assert()
        .success()
        .stdout("alpha\nbeta\n");

    flotilla(&env, &["stop", "-p", "alpha"])
        .assert()
        .success()
        .stdout("stopped node m02\nstopped node m01\n");
    flotilla(&env, &["status", "-p", "alpha"]).assert().code(8);

    flotilla(&env, &["delete", "-p", "alpha"])
        .assert()
        .success()
        .stdout("deleted profile 'alpha'\n");
    flotilla(&env, &["profile", "list"])
        .assert()
        .success()
        .stdout("beta\n");
}

#[rstest]
fn invalid_configuration_names_the_setting(env: CliEnv) {
    flotilla(&env, &["profile", "list"])
        .env("FLOTILLA_DRIVER", "command")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FLOTILLA_HOST_DRIVER_BIN"));
}
