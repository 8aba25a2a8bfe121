//! Binary entry point for the Flotilla CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flotilla::status::RenderError;
use flotilla::{
    ClusterError, CommandDriver, ConfigError, DriverKind, EXIT_OK, EXIT_UNAVAILABLE, ErrorKind,
    FileProfileStore, FlotillaConfig, HostDriver, Node, OperationContext, Orchestrator,
    OutputFormat, ProvisionOptions, RuntimeInstaller, SimulatedDriver, SimulatedDriverError,
    StartOutcome, StatusReporter, StopOutcome,
};

mod cli;
#[cfg(test)]
mod main_tests;

use cli::{Cli, Command, NodeCommand, OutputArg, ProfileCommand, StartCommand, StatusCommand};

/// Exit code for any failed operation other than `status` and restarts.
const EXIT_FAILURE: i32 = 1;
/// Exit code when a stopped node could not be started again.
const EXIT_RESTART_FAILED: i32 = 3;
/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "FLOTILLA_LOG";
/// Profile records live here beneath the state directory.
const PROFILES_DIR: &str = "profiles";
/// Simulated machines live here beneath the state directory.
const MACHINES_FILE: &str = "machines.json";

type FileOrchestrator<H, R> = Orchestrator<H, R, FileProfileStore>;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("simulated driver: {0}")]
    Simulated(#[from] SimulatedDriverError),
    #[error("failed to render status: {0}")]
    Render(#[from] RenderError),
    #[error("{source}")]
    Status {
        code: i32,
        #[source]
        source: ClusterError,
    },
}

impl CliError {
    /// Process exit code for this failure. `status` failures always map to
    /// an unavailable code.
    const fn exit_code(&self, for_status: bool) -> i32 {
        match self {
            Self::Status { code, .. } => *code,
            _ if for_status => EXIT_UNAVAILABLE,
            Self::Cluster(err)
                if matches!(
                    err.kind(),
                    ErrorKind::RestartUnsupported | ErrorKind::RestartUnreliable
                ) =>
            {
                EXIT_RESTART_FAILED
            }
            _ => EXIT_FAILURE,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let for_status = matches!(cli.command, Command::Status(_));
    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code(for_status)
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    let config = FlotillaConfig::load_without_cli_args()?;
    config.validate()?;
    let state_dir = config.state_dir();
    let store = FileProfileStore::new(state_dir.join(PROFILES_DIR));

    match config.driver_kind()? {
        DriverKind::Simulated => {
            let driver = simulated_driver(&config, state_dir.join(MACHINES_FILE))?;
            let orchestrator = build_orchestrator(driver.clone(), driver, store, &config);
            execute(&orchestrator, &config, command).await
        }
        DriverKind::Command => {
            let driver = CommandDriver::with_process_runner(config.command_driver_config()?);
            let orchestrator = build_orchestrator(driver.clone(), driver, store, &config);
            execute(&orchestrator, &config, command).await
        }
    }
}

fn simulated_driver(
    config: &FlotillaConfig,
    state_file: Utf8PathBuf,
) -> Result<SimulatedDriver, CliError> {
    let driver = SimulatedDriver::persistent(state_file)?;
    driver.set_restart_supported(config.host_restart_supported);
    #[cfg(feature = "test-backdoors")]
    backdoors::apply(&driver)?;
    Ok(driver)
}

fn build_orchestrator<H, R>(
    host: H,
    runtime: R,
    store: FileProfileStore,
    config: &FlotillaConfig,
) -> FileOrchestrator<H, R>
where
    H: HostDriver,
    R: RuntimeInstaller,
{
    Orchestrator::new(host, runtime, store)
        .with_poll_interval(config.poll_interval())
        .with_reconcile_timeout(config.reconcile_timeout())
}

/// Operation context bounded by the configured timeout and cancelled on
/// Ctrl-C.
fn operation_context(config: &FlotillaConfig) -> OperationContext {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    OperationContext::with_timeout(config.operation_timeout()).with_cancellation(token)
}

async fn execute<H, R>(
    orchestrator: &FileOrchestrator<H, R>,
    config: &FlotillaConfig,
    command: Command,
) -> Result<i32, CliError>
where
    H: HostDriver,
    R: RuntimeInstaller,
{
    let ctx = operation_context(config);
    let lines = match command {
        Command::Start(args) => {
            let options = start_options(config, &args)?;
            let profile = args.target.profile;
            let nodes = orchestrator
                .create_cluster(&profile, args.nodes, options, &ctx)
                .await?;
            vec![format!(
                "profile '{profile}' is running {} node(s): {}",
                nodes.len(),
                node_names(&nodes)
            )]
        }
        Command::Status(args) => return status(orchestrator, config, &args, &ctx).await,
        Command::Stop(args) => orchestrator
            .stop_cluster(&args.profile, &ctx)
            .await?
            .into_iter()
            .map(|(name, outcome)| stop_message(name.as_str(), outcome))
            .collect(),
        Command::Delete(args) => {
            orchestrator.delete_cluster(&args.profile, &ctx).await?;
            vec![format!("deleted profile '{}'", args.profile)]
        }
        Command::Profile(ProfileCommand::List) => orchestrator.list_profiles()?,
        Command::Node(node_command) => node(orchestrator, node_command, &ctx).await?,
    };

    let mut stdout = io::stdout();
    for line in lines {
        writeln!(stdout, "{line}").ok();
    }
    Ok(EXIT_OK)
}

async fn node<H, R>(
    orchestrator: &FileOrchestrator<H, R>,
    command: NodeCommand,
    ctx: &OperationContext,
) -> Result<Vec<String>, CliError>
where
    H: HostDriver,
    R: RuntimeInstaller,
{
    let lines = match command {
        NodeCommand::Add(args) => {
            let added = orchestrator.add_node(&args.profile, ctx).await?;
            vec![format!(
                "added node {} ({})",
                added.name,
                added.machine_name(&args.profile)
            )]
        }
        NodeCommand::Stop(args) => {
            let outcome = orchestrator
                .stop_node(&args.target.profile, &args.name, ctx)
                .await?;
            vec![stop_message(&args.name, outcome)]
        }
        NodeCommand::Start(args) => {
            let outcome = orchestrator
                .start_node(&args.target.profile, &args.name, ctx)
                .await?;
            vec![start_message(&args.name, outcome)]
        }
        NodeCommand::Delete(args) => {
            let removed = orchestrator
                .delete_node(&args.target.profile, &args.name, ctx)
                .await?;
            vec![format!("deleted node {}", removed.name)]
        }
        NodeCommand::List(args) => orchestrator
            .list_nodes(&args.profile)?
            .iter()
            .map(|listed| node_line(&args.profile, listed))
            .collect(),
    };
    Ok(lines)
}

async fn status<H, R>(
    orchestrator: &FileOrchestrator<H, R>,
    config: &FlotillaConfig,
    args: &StatusCommand,
    ctx: &OperationContext,
) -> Result<i32, CliError>
where
    H: HostDriver,
    R: RuntimeInstaller,
{
    let reporter = StatusReporter::new(output_format(args.output), config.exit_codes());
    let snapshot = orchestrator
        .status(&args.target.profile, ctx)
        .await
        .map_err(|source| CliError::Status {
            code: reporter.failure_code(),
            source,
        })?;
    let rendered = reporter.render(&snapshot)?;
    write!(io::stdout(), "{rendered}").ok();
    Ok(reporter.exit_code(&snapshot))
}

/// Provisioning options for `start`: configured defaults overridden by flags.
fn start_options(
    config: &FlotillaConfig,
    args: &StartCommand,
) -> Result<ProvisionOptions, CliError> {
    let defaults = config.provision_options()?;
    Ok(ProvisionOptions {
        cpus: args.cpus.unwrap_or(defaults.cpus),
        memory_mb: args.memory_mb.unwrap_or(defaults.memory_mb),
        disk_gb: args.disk_gb.unwrap_or(defaults.disk_gb),
        kubernetes_version: args
            .kubernetes_version
            .clone()
            .unwrap_or(defaults.kubernetes_version),
    })
}

const fn output_format(arg: OutputArg) -> OutputFormat {
    match arg {
        OutputArg::Text => OutputFormat::Text,
        OutputArg::Summary => OutputFormat::Summary,
        OutputArg::Json => OutputFormat::Json,
    }
}

fn node_names(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|listed| listed.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn node_line(profile: &str, listed: &Node) -> String {
    format!(
        "{}\t{}\t{}\thost={}\tkubelet={}",
        listed.name,
        listed.machine_name(profile),
        listed.role,
        listed.state.host(),
        listed.state.runtime()
    )
}

fn stop_message(name: &str, outcome: StopOutcome) -> String {
    match outcome {
        StopOutcome::Stopped => format!("stopped node {name}"),
        StopOutcome::AlreadyStopped => format!("node {name} is already stopped"),
    }
}

fn start_message(name: &str, outcome: StartOutcome) -> String {
    match outcome {
        StartOutcome::Started => format!("started node {name}"),
        StartOutcome::AlreadyRunning => format!("node {name} is already running"),
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(feature = "test-backdoors")]
mod backdoors {
    //! Fault injection for integration tests of the binary.

    use std::env;

    use flotilla::{SimulatedDriver, SimulatedDriverError};

    /// Comma-separated `op[@machine]` faults applied to the simulated driver.
    pub(crate) const FAULTS_ENV: &str = "FLOTILLA_SIMULATED_FAULTS";

    pub(crate) fn apply(driver: &SimulatedDriver) -> Result<(), SimulatedDriverError> {
        match env::var(FAULTS_ENV) {
            Ok(spec) if !spec.trim().is_empty() => driver.apply_fault_spec(&spec),
            _ => Ok(()),
        }
    }
}
