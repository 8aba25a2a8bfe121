//! External command execution behind a seam that tests can script.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::process::Command;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit status rendered for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Raised when a command cannot be run at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when the process cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error message.
        message: String,
    },
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// Dropping the returned future before it resolves must stop the
    /// command, so a timed-out or cancelled driver step leaves nothing
    /// running behind it.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| CommandError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    use super::*;

    fn shell(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let args = shell("printf Running; printf 'disk full' >&2; exit 3");

        let output = ProcessCommandRunner
            .run("sh", &args)
            .await
            .expect("sh should run");

        assert_eq!(
            output,
            CommandOutput {
                code: Some(3),
                stdout: String::from("Running"),
                stderr: String::from("disk full"),
            }
        );
        assert!(!output.is_success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = ProcessCommandRunner
            .run("flotilla-no-such-program", &[])
            .await
            .expect_err("spawn should fail");

        assert!(matches!(err, CommandError::Spawn { ref program, .. } if program == "flotilla-no-such-program"));
    }

    #[tokio::test]
    async fn abandoned_command_is_killed() {
        let tmp = TempDir::new().expect("tempdir");
        let marker = tmp.path().join("finished");
        let args = shell(&format!("sleep 1 && touch '{}'", marker.display()));

        let outcome = timeout(
            Duration::from_millis(100),
            ProcessCommandRunner.run("sh", &args),
        )
        .await;
        assert!(outcome.is_err(), "command should outlive the deadline");

        sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "a killed command must not finish its work");
    }
}
