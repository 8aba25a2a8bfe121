//! Command-line interface definitions for the `flotilla` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

/// Profile used when neither `-p` nor `FLOTILLA_PROFILE` is given.
pub(crate) const DEFAULT_PROFILE: &str = "flotilla";

/// Top-level CLI for the `flotilla` binary.
#[derive(Debug, Parser)]
#[command(
    name = "flotilla",
    about = "Create, inspect, and tear down local multi-node clusters",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log more detail to stderr (-v for info, -vv for debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `flotilla`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create a cluster and bring every node up.
    #[command(name = "start")]
    Start(StartCommand),
    /// Probe every node and report host and kubelet state.
    #[command(name = "status")]
    Status(StatusCommand),
    /// Stop every node, control plane last.
    #[command(name = "stop")]
    Stop(ProfileArgs),
    /// Tear down every node and forget the profile.
    #[command(name = "delete")]
    Delete(ProfileArgs),
    /// Inspect stored profiles.
    #[command(name = "profile", subcommand)]
    Profile(ProfileCommand),
    /// Manage individual nodes of a cluster.
    #[command(name = "node", subcommand)]
    Node(NodeCommand),
}

/// Selects the cluster an operation applies to.
#[derive(Debug, Args)]
pub(crate) struct ProfileArgs {
    /// Cluster profile name.
    #[arg(
        short = 'p',
        long,
        env = "FLOTILLA_PROFILE",
        default_value = DEFAULT_PROFILE,
        value_name = "PROFILE"
    )]
    pub(crate) profile: String,
}

/// Arguments for `flotilla start`.
#[derive(Debug, Args)]
pub(crate) struct StartCommand {
    /// Target profile.
    #[command(flatten)]
    pub(crate) target: ProfileArgs,
    /// Number of nodes to create, including the control plane.
    #[arg(short = 'n', long, default_value_t = 1, value_name = "COUNT")]
    pub(crate) nodes: u32,
    /// CPUs per node; overrides the configured default.
    #[arg(long, value_name = "COUNT")]
    pub(crate) cpus: Option<u32>,
    /// Memory per node in MiB; overrides the configured default.
    #[arg(long, value_name = "MIB")]
    pub(crate) memory_mb: Option<u32>,
    /// Disk per node in GB; overrides the configured default.
    #[arg(long, value_name = "GB")]
    pub(crate) disk_gb: Option<u32>,
    /// Kubernetes version to install; overrides the configured default.
    #[arg(long, value_name = "VERSION")]
    pub(crate) kubernetes_version: Option<String>,
}

/// Arguments for `flotilla status`.
#[derive(Debug, Args)]
pub(crate) struct StatusCommand {
    /// Target profile.
    #[command(flatten)]
    pub(crate) target: ProfileArgs,
    /// Report layout.
    #[arg(short, long, value_enum, default_value_t = OutputArg::Text)]
    pub(crate) output: OutputArg,
}

/// Report layouts accepted by `--output`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputArg {
    /// One block per node.
    Text,
    /// One tab-separated line per node.
    Summary,
    /// A JSON document.
    Json,
}

/// `flotilla profile` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ProfileCommand {
    /// List stored profiles.
    #[command(name = "list")]
    List,
}

/// `flotilla node` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum NodeCommand {
    /// Add a worker node.
    #[command(name = "add")]
    Add(ProfileArgs),
    /// Stop the kubelet and host of a node.
    #[command(name = "stop")]
    Stop(NodeArgs),
    /// Start the host and kubelet of a stopped node.
    #[command(name = "start")]
    Start(NodeArgs),
    /// Delete a worker node; its name is never reused.
    #[command(name = "delete")]
    Delete(NodeArgs),
    /// List recorded nodes without probing them.
    #[command(name = "list")]
    List(ProfileArgs),
}

/// Selects one node of a profile.
#[derive(Debug, Args)]
pub(crate) struct NodeArgs {
    /// Target profile.
    #[command(flatten)]
    pub(crate) target: ProfileArgs,
    /// Node name (for example `m02`) or machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}
