//! Driver abstractions for the two layers of a node.
//!
//! [`HostDriver`] owns the machine; [`RuntimeInstaller`] owns the workload
//! runtime running on it. The orchestrator is the only caller and serialises
//! access per profile, so implementations need not coordinate with each
//! other.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::node::{HostState, Node, NodeName, NodeRole, RuntimeState};

/// Provisioning options shared by every node of a cluster.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProvisionOptions {
    /// Virtual CPUs per machine.
    pub cpus: u32,
    /// Memory per machine in megabytes.
    pub memory_mb: u32,
    /// Disk size per machine in gigabytes.
    pub disk_gb: u32,
    /// Workload runtime version to install (for example `v1.30.0`).
    pub kubernetes_version: String,
}

impl ProvisionOptions {
    /// Starts a builder for [`ProvisionOptions`].
    #[must_use]
    pub fn builder() -> ProvisionOptionsBuilder {
        ProvisionOptionsBuilder::new()
    }

    /// Validates the options, naming the first offending field.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a count is zero or the
    /// runtime version is blank.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.cpus == 0 {
            return Err(RequestError::Validation("cpus".to_owned()));
        }
        if self.memory_mb == 0 {
            return Err(RequestError::Validation("memory_mb".to_owned()));
        }
        if self.disk_gb == 0 {
            return Err(RequestError::Validation("disk_gb".to_owned()));
        }
        if self.kubernetes_version.is_empty() {
            return Err(RequestError::Validation("kubernetes_version".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`ProvisionOptions`] that trims and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionOptionsBuilder {
    cpus: u32,
    memory_mb: u32,
    disk_gb: u32,
    kubernetes_version: String,
}

impl ProvisionOptionsBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the CPU count.
    #[must_use]
    pub const fn cpus(mut self, value: u32) -> Self {
        self.cpus = value;
        self
    }

    /// Sets the memory size in megabytes.
    #[must_use]
    pub const fn memory_mb(mut self, value: u32) -> Self {
        self.memory_mb = value;
        self
    }

    /// Sets the disk size in gigabytes.
    #[must_use]
    pub const fn disk_gb(mut self, value: u32) -> Self {
        self.disk_gb = value;
        self
    }

    /// Sets the runtime version.
    #[must_use]
    pub fn kubernetes_version(mut self, value: impl Into<String>) -> Self {
        self.kubernetes_version = value.into();
        self
    }

    /// Builds and validates the [`ProvisionOptions`].
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required field is unset.
    pub fn build(self) -> Result<ProvisionOptions, RequestError> {
        let options = ProvisionOptions {
            cpus: self.cpus,
            memory_mb: self.memory_mb,
            disk_gb: self.disk_gb,
            kubernetes_version: self.kubernetes_version.trim().to_owned(),
        };
        options.validate()?;
        Ok(options)
    }
}

/// Errors raised while assembling driver requests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Everything a driver needs to act on one node's machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Machine {
    /// Profile owning the node.
    pub profile: String,
    /// Node name within the profile.
    pub node: NodeName,
    /// Backend-facing machine name.
    pub name: String,
    /// Role of the node.
    pub role: NodeRole,
    /// Options the machine is provisioned with.
    pub options: ProvisionOptions,
}

impl Machine {
    /// Describes the machine backing `node` in `profile`.
    #[must_use]
    pub fn for_node(profile: &str, node: &Node, options: &ProvisionOptions) -> Self {
        Self {
            profile: profile.to_owned(),
            node: node.name.clone(),
            name: node.machine_name(profile),
            role: node.role,
            options: options.clone(),
        }
    }
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Creates, starts, stops, and destroys the machine behind a node.
pub trait HostDriver: Send + Sync {
    /// Driver specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates and boots a new machine.
    fn create<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Boots an existing, stopped machine.
    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Shuts a machine down without destroying it.
    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Destroys the machine and everything on it.
    fn destroy<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Reports the machine's current state.
    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, HostState, Self::Error>;

    /// Whether restarting a stopped machine is reliable on this backend.
    fn supports_restart(&self) -> bool {
        true
    }
}

/// Installs and controls the workload runtime on a running machine.
pub trait RuntimeInstaller: Send + Sync {
    /// Installer specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Installs the runtime on the machine.
    fn install<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Starts the installed runtime.
    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Stops the runtime, quiescing workloads.
    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error>;

    /// Reports the runtime's current state.
    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, RuntimeState, Self::Error>;
}
