//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::command_driver::CommandDriverConfig;
use crate::driver::ProvisionOptions;
use crate::status::{EXIT_DEGRADED, EXIT_UNAVAILABLE, ExitCodes};
use crate::util::expand_tilde;

/// Default location of profile records and simulated machine state.
pub const DEFAULT_STATE_DIR: &str = "~/.flotilla";

/// Settings for the `flotilla` binary, merged from defaults, `flotilla.toml`,
/// and `FLOTILLA_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLOTILLA",
    discovery(
        app_name = "flotilla",
        env_var = "FLOTILLA_CONFIG_PATH",
        config_file_name = "flotilla.toml",
        dotfile_name = ".flotilla.toml",
        project_file_name = "flotilla.toml"
    )
)]
pub struct FlotillaConfig {
    /// Directory holding profile records. Supports `~/` expansion.
    #[ortho_config(default = DEFAULT_STATE_DIR.to_owned())]
    pub state_dir: String,
    /// Backend used for hosts and runtimes: `simulated` or `command`.
    #[ortho_config(default = "simulated".to_owned())]
    pub driver: String,
    /// Host driver executable used by the `command` driver.
    pub host_driver_bin: Option<String>,
    /// Runtime installer executable used by the `command` driver.
    pub runtime_bin: Option<String>,
    /// Whether the host driver can start a stopped machine again.
    #[ortho_config(default = true)]
    pub host_restart_supported: bool,
    /// Deadline applied to each CLI operation, in seconds.
    #[ortho_config(default = 600)]
    pub operation_timeout_secs: u64,
    /// Interval between readiness probes, in milliseconds.
    #[ortho_config(default = 500)]
    pub poll_interval_ms: u64,
    /// Bound on re-probing a node after a cancelled step, in seconds.
    #[ortho_config(default = 10)]
    pub reconcile_timeout_secs: u64,
    /// Exit code of `flotilla status` for a partially running cluster.
    #[ortho_config(default = EXIT_DEGRADED)]
    pub degraded_exit_code: i32,
    /// Exit code of `flotilla status` when no node is fully running.
    #[ortho_config(default = EXIT_UNAVAILABLE)]
    pub unavailable_exit_code: i32,
    /// Default CPU count per node.
    #[ortho_config(default = 2)]
    pub cpus: u32,
    /// Default memory per node in MiB.
    #[ortho_config(default = 2200)]
    pub memory_mb: u32,
    /// Default disk size per node in GB.
    #[ortho_config(default = 20)]
    pub disk_gb: u32,
    /// Default Kubernetes version installed on nodes.
    #[ortho_config(default = "v1.30.0".to_owned())]
    pub kubernetes_version: String,
}

/// Backends selectable through [`FlotillaConfig::driver`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverKind {
    /// In-process simulated machines persisted under the state directory.
    Simulated,
    /// External executables speaking the command driver protocol.
    Command,
}

impl DriverKind {
    /// Configuration label of the driver.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "command" => Ok(Self::Command),
            other => Err(ConfigError::Invalid(format!(
                "unknown driver '{other}': set FLOTILLA_DRIVER or driver in flotilla.toml \
                 to 'simulated' or 'command'"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to flotilla.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, problem: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} {problem}: check {} or {} in flotilla.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const STATE_DIR: FieldMetadata =
    FieldMetadata::new("state directory", "FLOTILLA_STATE_DIR", "state_dir");
const HOST_DRIVER_BIN: FieldMetadata = FieldMetadata::new(
    "host driver executable",
    "FLOTILLA_HOST_DRIVER_BIN",
    "host_driver_bin",
);
const RUNTIME_BIN: FieldMetadata =
    FieldMetadata::new("runtime executable", "FLOTILLA_RUNTIME_BIN", "runtime_bin");
const OPERATION_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "operation timeout",
    "FLOTILLA_OPERATION_TIMEOUT_SECS",
    "operation_timeout_secs",
);
const POLL_INTERVAL: FieldMetadata =
    FieldMetadata::new("poll interval", "FLOTILLA_POLL_INTERVAL_MS", "poll_interval_ms");
const DEGRADED_EXIT_CODE: FieldMetadata = FieldMetadata::new(
    "degraded exit code",
    "FLOTILLA_DEGRADED_EXIT_CODE",
    "degraded_exit_code",
);
const UNAVAILABLE_EXIT_CODE: FieldMetadata = FieldMetadata::new(
    "unavailable exit code",
    "FLOTILLA_UNAVAILABLE_EXIT_CODE",
    "unavailable_exit_code",
);
const KUBERNETES_VERSION: FieldMetadata = FieldMetadata::new(
    "Kubernetes version",
    "FLOTILLA_KUBERNETES_VERSION",
    "kubernetes_version",
);

impl FlotillaConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that set the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dir.trim().is_empty() {
            return Err(STATE_DIR.missing());
        }
        if self.kubernetes_version.trim().is_empty() {
            return Err(KUBERNETES_VERSION.missing());
        }
        if self.driver_kind()? == DriverKind::Command {
            require_optional(self.host_driver_bin.as_deref(), &HOST_DRIVER_BIN)?;
            require_optional(self.runtime_bin.as_deref(), &RUNTIME_BIN)?;
        }
        if self.operation_timeout_secs == 0 {
            return Err(OPERATION_TIMEOUT.invalid("must be at least one second"));
        }
        if self.poll_interval_ms == 0 {
            return Err(POLL_INTERVAL.invalid("must be at least one millisecond"));
        }
        validate_exit_code(self.degraded_exit_code, &DEGRADED_EXIT_CODE)?;
        validate_exit_code(self.unavailable_exit_code, &UNAVAILABLE_EXIT_CODE)?;
        if self.degraded_exit_code == self.unavailable_exit_code {
            return Err(UNAVAILABLE_EXIT_CODE.invalid("must differ from the degraded exit code"));
        }
        self.provision_options().map(drop)
    }

    /// Parsed [`DriverKind`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown driver names.
    pub fn driver_kind(&self) -> Result<DriverKind, ConfigError> {
        self.driver.parse()
    }

    /// State directory with `~/` expanded.
    #[must_use]
    pub fn state_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(self.state_dir.trim()))
    }

    /// Default provisioning options for new nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the options fail validation.
    pub fn provision_options(&self) -> Result<ProvisionOptions, ConfigError> {
        ProvisionOptions::builder()
            .cpus(self.cpus)
            .memory_mb(self.memory_mb)
            .disk_gb(self.disk_gb)
            .kubernetes_version(self.kubernetes_version.trim())
            .build()
            .map_err(|err| {
                ConfigError::Invalid(format!(
                    "{err}: check FLOTILLA_CPUS, FLOTILLA_MEMORY_MB and FLOTILLA_DISK_GB \
                     or the matching keys in flotilla.toml"
                ))
            })
    }

    /// Settings for the `command` driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when either executable is unset.
    pub fn command_driver_config(&self) -> Result<CommandDriverConfig, ConfigError> {
        let host = self
            .host_driver_bin
            .as_deref()
            .ok_or_else(|| HOST_DRIVER_BIN.missing())?;
        let runtime = self
            .runtime_bin
            .as_deref()
            .ok_or_else(|| RUNTIME_BIN.missing())?;
        CommandDriverConfig::new(host, runtime)
            .map(|config| config.with_restart_supported(self.host_restart_supported))
            .map_err(|_| {
                if host.trim().is_empty() {
                    HOST_DRIVER_BIN.missing()
                } else {
                    RUNTIME_BIN.missing()
                }
            })
    }

    /// Exit codes used by `flotilla status`.
    #[must_use]
    pub const fn exit_codes(&self) -> ExitCodes {
        ExitCodes {
            degraded: self.degraded_exit_code,
            unavailable: self.unavailable_exit_code,
        }
    }

    /// Per-operation deadline.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Readiness probe interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on post-cancellation re-probes.
    #[must_use]
    pub const fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }
}

fn require_optional(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(metadata.missing()),
    }
}

fn validate_exit_code(code: i32, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    // 0, 1 and 3 are taken by success, failure and failed restarts.
    if code == 3 || !(2..=255).contains(&code) {
        return Err(metadata.invalid("must be between 2 and 255 and not 3"));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A configured value is out of range or unrecognised.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn defaults() -> FlotillaConfig {
        FlotillaConfig {
            state_dir: DEFAULT_STATE_DIR.to_owned(),
            driver: String::from("simulated"),
            host_driver_bin: None,
            runtime_bin: None,
            host_restart_supported: true,
            operation_timeout_secs: 600,
            poll_interval_ms: 500,
            reconcile_timeout_secs: 10,
            degraded_exit_code: EXIT_DEGRADED,
            unavailable_exit_code: EXIT_UNAVAILABLE,
            cpus: 2,
            memory_mb: 2200,
            disk_gb: 20,
            kubernetes_version: String::from("v1.30.0"),
        }
    }

    #[rstest]
    #[case("simulated", DriverKind::Simulated)]
    #[case(" Command ", DriverKind::Command)]
    fn driver_names_parse(#[case] label: &str, #[case] expected: DriverKind) {
        assert_eq!(label.parse::<DriverKind>(), Ok(expected));
    }

    #[rstest]
    fn defaults_validate(defaults: FlotillaConfig) {
        assert_eq!(defaults.validate(), Ok(()));
        assert_eq!(defaults.exit_codes(), ExitCodes::default());
        assert_eq!(defaults.poll_interval(), Duration::from_millis(500));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(256)]
    fn reserved_exit_codes_are_rejected(defaults: FlotillaConfig, #[case] code: i32) {
        let cfg = FlotillaConfig {
            degraded_exit_code: code,
            ..defaults
        };
        let err = cfg.validate().expect_err("exit code should be rejected");
        assert!(err.to_string().contains("FLOTILLA_DEGRADED_EXIT_CODE"), "{err}");
    }

    #[rstest]
    fn command_driver_requires_both_executables(defaults: FlotillaConfig) {
        let cfg = FlotillaConfig {
            driver: String::from("command"),
            host_driver_bin: Some(String::from("hostctl")),
            ..defaults
        };
        let err = cfg.validate().expect_err("runtime_bin is required");
        assert!(matches!(err, ConfigError::MissingField(_)));
        assert!(err.to_string().contains("FLOTILLA_RUNTIME_BIN"), "{err}");
    }

    #[rstest]
    fn command_driver_config_carries_restart_flag(defaults: FlotillaConfig) {
        let cfg = FlotillaConfig {
            driver: String::from("command"),
            host_driver_bin: Some(String::from("hostctl")),
            runtime_bin: Some(String::from("kubectl-node")),
            host_restart_supported: false,
            ..defaults
        };
        let driver = cfg.command_driver_config().expect("command config");
        assert_eq!(driver.host_bin, "hostctl");
        assert!(!driver.restart_supported);
    }
}
