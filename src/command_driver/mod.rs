//! Host driver and runtime installer backed by external executables.
//!
//! The host executable is invoked as `<host_bin> <verb> <machine>` with verbs
//! `create`, `start`, `stop`, `destroy`, and `probe`. `create` also receives
//! the machine's profile, role, and provisioning options as flags. The
//! runtime executable is invoked as `<runtime_bin> <verb> <machine>` with
//! verbs `install`, `start`, `stop`, and `probe`. A zero exit status means
//! success; `probe` prints `Running`, `Stopped`, or `Absent` on stdout.
//!
//! Commands run as child processes that are killed when the driver call is
//! dropped, so a step abandoned at its deadline or on cancellation does not
//! keep acting on the machine while the orchestrator re-probes it.

use std::ffi::OsString;
use std::str::FromStr;

use thiserror::Error;

use crate::driver::{DriverFuture, HostDriver, Machine, RuntimeInstaller};
use crate::node::{HostState, RuntimeState, StateLabelError};
use crate::process::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Executables and capabilities of a [`CommandDriver`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandDriverConfig {
    /// Host driver executable.
    pub host_bin: String,
    /// Runtime installer executable.
    pub runtime_bin: String,
    /// Whether the host executable can reliably restart stopped machines.
    pub restart_supported: bool,
}

impl CommandDriverConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CommandDriverError::InvalidConfig`] when either executable
    /// is blank.
    pub fn new(
        host_bin: impl Into<String>,
        runtime_bin: impl Into<String>,
    ) -> Result<Self, CommandDriverError> {
        let trimmed_host_bin = host_bin.into().trim().to_owned();
        let trimmed_runtime_bin = runtime_bin.into().trim().to_owned();
        if trimmed_host_bin.is_empty() {
            return Err(CommandDriverError::InvalidConfig {
                field: String::from("host_driver_bin"),
            });
        }
        if trimmed_runtime_bin.is_empty() {
            return Err(CommandDriverError::InvalidConfig {
                field: String::from("runtime_bin"),
            });
        }
        Ok(Self {
            host_bin: trimmed_host_bin,
            runtime_bin: trimmed_runtime_bin,
            restart_supported: true,
        })
    }

    /// Declares whether restarting stopped machines is supported.
    #[must_use]
    pub const fn with_restart_supported(mut self, supported: bool) -> Self {
        self.restart_supported = supported;
        self
    }
}

/// Errors returned by [`CommandDriver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandDriverError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when an executable returns a non-zero exit status.
    #[error("{program} {verb} {machine} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Verb passed to the program.
        verb: &'static str,
        /// Machine the command targeted.
        machine: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when `probe` prints something other than a state label.
    #[error("{program} probe {machine} printed an unexpected state: {source}")]
    UnexpectedState {
        /// Program that was probed.
        program: String,
        /// Machine the probe targeted.
        machine: String,
        /// Parse failure.
        #[source]
        source: StateLabelError,
    },
    /// Raised when the command could not be run.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

/// Drives hosts and runtimes by running external executables.
#[derive(Clone, Debug)]
pub struct CommandDriver<R: CommandRunner> {
    config: CommandDriverConfig,
    runner: R,
}

impl CommandDriver<ProcessCommandRunner> {
    /// Creates a driver wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(config: CommandDriverConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CommandDriver<R> {
    /// Creates a driver using the provided configuration and runner.
    #[must_use]
    pub const fn new(config: CommandDriverConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Returns the driver configuration.
    #[must_use]
    pub const fn config(&self) -> &CommandDriverConfig {
        &self.config
    }

    fn host_args(verb: &'static str, machine: &Machine) -> Vec<OsString> {
        let mut args = vec![OsString::from(verb), OsString::from(&machine.name)];
        if verb == "create" {
            let options = &machine.options;
            let flags = [
                ("--profile", machine.profile.clone()),
                ("--role", machine.role.as_str().to_owned()),
                ("--cpus", options.cpus.to_string()),
                ("--memory-mb", options.memory_mb.to_string()),
                ("--disk-gb", options.disk_gb.to_string()),
                ("--kubernetes-version", options.kubernetes_version.clone()),
            ];
            for (flag, value) in flags {
                args.push(OsString::from(flag));
                args.push(OsString::from(value));
            }
        }
        args
    }

    async fn run_host(
        &self,
        verb: &'static str,
        machine: &Machine,
    ) -> Result<CommandOutput, CommandDriverError> {
        let args = Self::host_args(verb, machine);
        self.invoke(&self.config.host_bin, verb, machine, &args)
            .await
    }

    async fn run_runtime(
        &self,
        verb: &'static str,
        machine: &Machine,
    ) -> Result<CommandOutput, CommandDriverError> {
        let args = vec![OsString::from(verb), OsString::from(&machine.name)];
        self.invoke(&self.config.runtime_bin, verb, machine, &args)
            .await
    }

    async fn invoke(
        &self,
        program: &str,
        verb: &'static str,
        machine: &Machine,
        args: &[OsString],
    ) -> Result<CommandOutput, CommandDriverError> {
        let output = self.runner.run(program, args).await?;
        if output.is_success() {
            return Ok(output);
        }

        Err(CommandDriverError::CommandFailure {
            program: program.to_owned(),
            verb,
            machine: machine.name.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

fn parse_state<S>(program: &str, machine: &Machine, output: &CommandOutput) -> Result<S, CommandDriverError>
where
    S: FromStr<Err = StateLabelError>,
{
    output
        .stdout
        .parse()
        .map_err(|source| CommandDriverError::UnexpectedState {
            program: program.to_owned(),
            machine: machine.name.clone(),
            source,
        })
}

impl<R: CommandRunner> HostDriver for CommandDriver<R> {
    type Error = CommandDriverError;

    fn create<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_host("create", machine).await.map(drop) })
    }

    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_host("start", machine).await.map(drop) })
    }

    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_host("stop", machine).await.map(drop) })
    }

    fn destroy<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_host("destroy", machine).await.map(drop) })
    }

    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, HostState, Self::Error> {
        Box::pin(async move {
            let output = self.run_host("probe", machine).await?;
            parse_state(&self.config.host_bin, machine, &output)
        })
    }

    fn supports_restart(&self) -> bool {
        self.config.restart_supported
    }
}

impl<R: CommandRunner> RuntimeInstaller for CommandDriver<R> {
    type Error = CommandDriverError;

    fn install<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_runtime("install", machine).await.map(drop) })
    }

    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_runtime("start", machine).await.map(drop) })
    }

    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run_runtime("stop", machine).await.map(drop) })
    }

    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, RuntimeState, Self::Error> {
        Box::pin(async move {
            let output = self.run_runtime("probe", machine).await?;
            parse_state(&self.config.runtime_bin, machine, &output)
        })
    }
}
