//! In-process host driver and runtime installer.
//!
//! [`SimulatedDriver`] keeps machine state in memory, optionally mirrored to a
//! JSON file so successive CLI invocations see the same machines. It follows
//! the same rules a real backend would: the runtime can only be installed or
//! started on a running host, and stopping a host stops its runtime.
//!
//! Failures and latency can be injected per operation, and
//! [`SimulatedDriver::force_state`] simulates out-of-band changes such as a
//! crashed machine.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use crate::driver::{DriverFuture, HostDriver, Machine, RuntimeInstaller};
use crate::node::{HostState, RuntimeState};

/// Operations a [`SimulatedDriver`] performs, used to target faults and
/// latency and to label the call log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SimulatedOp {
    /// `HostDriver::create`.
    HostCreate,
    /// `HostDriver::start`.
    HostStart,
    /// `HostDriver::stop`.
    HostStop,
    /// `HostDriver::destroy`.
    HostDestroy,
    /// `HostDriver::probe`.
    HostProbe,
    /// `RuntimeInstaller::install`.
    RuntimeInstall,
    /// `RuntimeInstaller::start`.
    RuntimeStart,
    /// `RuntimeInstaller::stop`.
    RuntimeStop,
    /// `RuntimeInstaller::probe`.
    RuntimeProbe,
}

const ALL_OPS: [SimulatedOp; 9] = [
    SimulatedOp::HostCreate,
    SimulatedOp::HostStart,
    SimulatedOp::HostStop,
    SimulatedOp::HostDestroy,
    SimulatedOp::HostProbe,
    SimulatedOp::RuntimeInstall,
    SimulatedOp::RuntimeStart,
    SimulatedOp::RuntimeStop,
    SimulatedOp::RuntimeProbe,
];

impl SimulatedOp {
    /// Dotted label such as `host.start`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::HostCreate => "host.create",
            Self::HostStart => "host.start",
            Self::HostStop => "host.stop",
            Self::HostDestroy => "host.destroy",
            Self::HostProbe => "host.probe",
            Self::RuntimeInstall => "runtime.install",
            Self::RuntimeStart => "runtime.start",
            Self::RuntimeStop => "runtime.stop",
            Self::RuntimeProbe => "runtime.probe",
        }
    }

    const fn mutates(self) -> bool {
        !matches!(self, Self::HostProbe | Self::RuntimeProbe)
    }
}

impl fmt::Display for SimulatedOp {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

impl FromStr for SimulatedOp {
    type Err = SimulatedDriverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        ALL_OPS
            .into_iter()
            .find(|op| op.label() == wanted)
            .ok_or_else(|| SimulatedDriverError::UnknownOp {
                label: wanted.to_owned(),
            })
    }
}

/// Layer states of one simulated machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMachine {
    /// Host layer.
    pub host: HostState,
    /// Runtime layer.
    pub runtime: RuntimeState,
}

/// One entry of the call log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimulatedCall {
    /// Operation performed.
    pub op: SimulatedOp,
    /// Machine it targeted.
    pub machine: String,
}

impl fmt::Display for SimulatedCall {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.op, self.machine)
    }
}

/// Errors returned by [`SimulatedDriver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SimulatedDriverError {
    /// Raised when a fault was injected for the operation.
    #[error("injected failure: {op} {machine}")]
    InjectedFault {
        /// Failing operation.
        op: SimulatedOp,
        /// Targeted machine.
        machine: String,
    },
    /// Raised when creating a machine that already exists.
    #[error("machine {machine} already exists")]
    MachineExists {
        /// Existing machine.
        machine: String,
    },
    /// Raised when acting on a machine that does not exist.
    #[error("{op}: machine {machine} does not exist")]
    MachineMissing {
        /// Attempted operation.
        op: SimulatedOp,
        /// Missing machine.
        machine: String,
    },
    /// Raised when a runtime operation needs a running host.
    #[error("{op}: host {machine} is not running")]
    HostNotRunning {
        /// Attempted operation.
        op: SimulatedOp,
        /// Machine whose host is down.
        machine: String,
    },
    /// Raised when starting a runtime that was never installed.
    #[error("runtime is not installed on {machine}")]
    RuntimeNotInstalled {
        /// Machine without a runtime.
        machine: String,
    },
    /// Raised when a fault specification names an unknown operation.
    #[error("unknown simulated operation '{label}'")]
    UnknownOp {
        /// Unrecognised label.
        label: String,
    },
    /// Raised when the state file cannot be read or written.
    #[error("simulated state file {path}: {message}")]
    Persistence {
        /// State file path.
        path: Utf8PathBuf,
        /// Failure description.
        message: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Fault {
    op: SimulatedOp,
    machine: Option<String>,
}

impl Fault {
    fn matches(&self, op: SimulatedOp, machine: &str) -> bool {
        self.op == op && self.machine.as_deref().is_none_or(|name| name == machine)
    }
}

type Machines = BTreeMap<String, SimulatedMachine>;

#[derive(Debug)]
struct Inner {
    machines: Machines,
    faults: Vec<Fault>,
    latency: BTreeMap<SimulatedOp, Duration>,
    calls: Vec<SimulatedCall>,
    restart_supported: bool,
}

/// In-memory host driver and runtime installer.
///
/// Clones share state, so one instance can serve as both the host driver and
/// the runtime installer of an orchestrator while tests keep a handle.
#[derive(Clone, Debug)]
pub struct SimulatedDriver {
    inner: Arc<Mutex<Inner>>,
    state_file: Option<Utf8PathBuf>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// Creates a driver with no machines that keeps state in memory only.
    #[must_use]
    pub fn new() -> Self {
        Self::with_machines(Machines::new(), None)
    }

    /// Creates a driver mirrored to `state_file`, loading existing machines.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatedDriverError::Persistence`] when an existing file
    /// cannot be read or decoded.
    pub fn persistent(state_file: impl Into<Utf8PathBuf>) -> Result<Self, SimulatedDriverError> {
        let path = state_file.into();
        let machines = load_machines(&path)?;
        Ok(Self::with_machines(machines, Some(path)))
    }

    fn with_machines(machines: Machines, state_file: Option<Utf8PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                machines,
                faults: Vec::new(),
                latency: BTreeMap::new(),
                calls: Vec::new(),
                restart_supported: true,
            })),
            state_file,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every future `op` fail.
    pub fn fail(&self, op: SimulatedOp) {
        self.lock().faults.push(Fault { op, machine: None });
    }

    /// Makes future `op` calls against `machine` fail.
    pub fn fail_for(&self, op: SimulatedOp, machine: impl Into<String>) {
        self.lock().faults.push(Fault {
            op,
            machine: Some(machine.into()),
        });
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Applies a comma-separated fault list such as
    /// `host.start,runtime.probe@p-m02`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatedDriverError::UnknownOp`] for unknown labels; no
    /// fault is applied in that case.
    pub fn apply_fault_spec(&self, spec: &str) -> Result<(), SimulatedDriverError> {
        let mut faults = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let fault = match entry.split_once('@') {
                Some((op, machine)) => Fault {
                    op: op.parse()?,
                    machine: Some(machine.trim().to_owned()),
                },
                None => Fault {
                    op: entry.parse()?,
                    machine: None,
                },
            };
            faults.push(fault);
        }
        self.lock().faults.extend(faults);
        Ok(())
    }

    /// Delays every future `op` by `delay`.
    pub fn set_latency(&self, op: SimulatedOp, delay: Duration) {
        self.lock().latency.insert(op, delay);
    }

    /// Declares whether stopped machines can be restarted.
    pub fn set_restart_supported(&self, supported: bool) {
        self.lock().restart_supported = supported;
    }

    /// Overwrites a machine's state as if it changed outside the
    /// orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatedDriverError::Persistence`] when the state file
    /// cannot be written.
    pub fn force_state(
        &self,
        machine: &str,
        host: HostState,
        runtime: RuntimeState,
    ) -> Result<(), SimulatedDriverError> {
        let mut inner = self.lock();
        if host == HostState::Absent {
            inner.machines.remove(machine);
        } else {
            inner
                .machines
                .insert(machine.to_owned(), SimulatedMachine { host, runtime });
        }
        self.save(&inner.machines)
    }

    /// Current state of `machine`, if it exists.
    #[must_use]
    pub fn machine(&self, machine: &str) -> Option<SimulatedMachine> {
        self.lock().machines.get(machine).copied()
    }

    /// Names of all existing machines.
    #[must_use]
    pub fn machines(&self) -> Vec<String> {
        self.lock().machines.keys().cloned().collect()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.lock().calls.clone()
    }

    /// Calls made so far, excluding probes.
    #[must_use]
    pub fn mutations(&self) -> Vec<SimulatedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op.mutates())
            .cloned()
            .collect()
    }

    async fn perform<T, F>(
        &self,
        op: SimulatedOp,
        machine: &Machine,
        apply: F,
    ) -> Result<T, SimulatedDriverError>
    where
        F: FnOnce(&mut Machines, &str) -> Result<T, SimulatedDriverError> + Send,
    {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(SimulatedCall {
                op,
                machine: machine.name.clone(),
            });
            inner.latency.get(&op).copied()
        };
        if let Some(duration) = delay {
            sleep(duration).await;
        }

        let mut inner = self.lock();
        if inner.faults.iter().any(|fault| fault.matches(op, &machine.name)) {
            return Err(SimulatedDriverError::InjectedFault {
                op,
                machine: machine.name.clone(),
            });
        }
        let outcome = apply(&mut inner.machines, &machine.name)?;
        if op.mutates() {
            self.save(&inner.machines)?;
        }
        Ok(outcome)
    }

    fn save(&self, machines: &Machines) -> Result<(), SimulatedDriverError> {
        match &self.state_file {
            Some(path) => save_machines(path, machines),
            None => Ok(()),
        }
    }
}

fn existing<'a>(
    machines: &'a mut Machines,
    op: SimulatedOp,
    name: &str,
) -> Result<&'a mut SimulatedMachine, SimulatedDriverError> {
    machines
        .get_mut(name)
        .ok_or_else(|| SimulatedDriverError::MachineMissing {
            op,
            machine: name.to_owned(),
        })
}

fn running_host<'a>(
    machines: &'a mut Machines,
    op: SimulatedOp,
    name: &str,
) -> Result<&'a mut SimulatedMachine, SimulatedDriverError> {
    let found = existing(machines, op, name)?;
    if found.host != HostState::Running {
        return Err(SimulatedDriverError::HostNotRunning {
            op,
            machine: name.to_owned(),
        });
    }
    Ok(found)
}

fn split_path(path: &Utf8Path) -> (&Utf8Path, &str) {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file = path.file_name().unwrap_or(path.as_str());
    (parent, file)
}

fn persistence_error(path: &Utf8Path, message: impl fmt::Display) -> SimulatedDriverError {
    SimulatedDriverError::Persistence {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn load_machines(path: &Utf8Path) -> Result<Machines, SimulatedDriverError> {
    let (parent, file) = split_path(path);
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Machines::new()),
        Err(err) => return Err(persistence_error(path, err)),
    };
    let contents = match dir.read_to_string(file) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Machines::new()),
        Err(err) => return Err(persistence_error(path, err)),
    };
    serde_json::from_str(&contents).map_err(|err| persistence_error(path, err))
}

fn save_machines(path: &Utf8Path, machines: &Machines) -> Result<(), SimulatedDriverError> {
    let (parent, file) = split_path(path);
    let rendered =
        serde_json::to_string_pretty(machines).map_err(|err| persistence_error(path, err))?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| persistence_error(path, err))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| persistence_error(path, err))?;
    dir.write(file, rendered)
        .map_err(|err| persistence_error(path, err))
}

impl HostDriver for SimulatedDriver {
    type Error = SimulatedDriverError;

    fn create<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::HostCreate, machine, |machines, name| {
            if machines.contains_key(name) {
                return Err(SimulatedDriverError::MachineExists {
                    machine: name.to_owned(),
                });
            }
            machines.insert(
                name.to_owned(),
                SimulatedMachine {
                    host: HostState::Running,
                    runtime: RuntimeState::Absent,
                },
            );
            Ok(())
        }))
    }

    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::HostStart, machine, |machines, name| {
            existing(machines, SimulatedOp::HostStart, name)?.host = HostState::Running;
            Ok(())
        }))
    }

    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::HostStop, machine, |machines, name| {
            let found = existing(machines, SimulatedOp::HostStop, name)?;
            found.host = HostState::Stopped;
            if found.runtime == RuntimeState::Running {
                found.runtime = RuntimeState::Stopped;
            }
            Ok(())
        }))
    }

    fn destroy<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::HostDestroy, machine, |machines, name| {
            machines.remove(name);
            Ok(())
        }))
    }

    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, HostState, Self::Error> {
        Box::pin(self.perform(SimulatedOp::HostProbe, machine, |machines, name| {
            Ok(machines
                .get(name)
                .map_or(HostState::Absent, |found| found.host))
        }))
    }

    fn supports_restart(&self) -> bool {
        self.lock().restart_supported
    }
}

impl RuntimeInstaller for SimulatedDriver {
    type Error = SimulatedDriverError;

    fn install<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::RuntimeInstall, machine, |machines, name| {
            let found = running_host(machines, SimulatedOp::RuntimeInstall, name)?;
            if found.runtime == RuntimeState::Absent {
                found.runtime = RuntimeState::Stopped;
            }
            Ok(())
        }))
    }

    fn start<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::RuntimeStart, machine, |machines, name| {
            let found = running_host(machines, SimulatedOp::RuntimeStart, name)?;
            if found.runtime == RuntimeState::Absent {
                return Err(SimulatedDriverError::RuntimeNotInstalled {
                    machine: name.to_owned(),
                });
            }
            found.runtime = RuntimeState::Running;
            Ok(())
        }))
    }

    fn stop<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.perform(SimulatedOp::RuntimeStop, machine, |machines, name| {
            let found = existing(machines, SimulatedOp::RuntimeStop, name)?;
            if found.runtime == RuntimeState::Running {
                found.runtime = RuntimeState::Stopped;
            }
            Ok(())
        }))
    }

    fn probe<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, RuntimeState, Self::Error> {
        Box::pin(self.perform(SimulatedOp::RuntimeProbe, machine, |machines, name| {
            Ok(machines
                .get(name)
                .map_or(RuntimeState::Absent, |found| found.runtime))
        }))
    }
}
