//! Command-line interface definitions for the `ballast` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `ballast` binary.
///
/// Connection settings come from `DO_*` environment variables and
/// `ballast.toml`; the flags here only select the operation.
#[derive(Debug, Parser)]
#[command(
    name = "ballast",
    about = "Reconcile cluster datasets against DigitalOcean block storage volumes",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations exposed by the `ballast` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List every dataset that has a volume.
    #[command(name = "list")]
    List,
    /// Ensure a volume exists for a dataset.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Attach a dataset's volume to a node.
    #[command(name = "attach")]
    Attach(AttachCommand),
    /// Detach a dataset's volume from its node.
    #[command(name = "detach")]
    Detach(DatasetArg),
    /// Detach if needed and destroy a dataset's volume.
    #[command(name = "destroy")]
    Destroy(DatasetArg),
    /// Print the block device path of an attached dataset.
    #[command(name = "device-path")]
    DevicePath(DatasetArg),
    /// List the ids of powered-on nodes.
    #[command(name = "nodes")]
    Nodes,
    /// Power on a node and wait until it is running.
    #[command(name = "start-node")]
    StartNode(NodeArg),
    /// Print the identity of the node this command runs on.
    #[command(name = "whoami")]
    Whoami,
}

/// A dataset identifier argument.
#[derive(Debug, Args)]
pub(crate) struct DatasetArg {
    /// Dataset UUID.
    #[arg(value_name = "DATASET_ID")]
    pub(crate) dataset_id: String,
}

/// A node identifier argument.
#[derive(Debug, Args)]
pub(crate) struct NodeArg {
    /// Provider node (droplet) id.
    #[arg(value_name = "NODE_ID")]
    pub(crate) node_id: String,
}

/// Arguments for `ballast create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Dataset UUID.
    #[arg(value_name = "DATASET_ID")]
    pub(crate) dataset_id: String,
    /// Requested size in GiB.
    #[arg(long, value_name = "GIB", default_value_t = 1)]
    pub(crate) size_gib: u64,
}

/// Arguments for `ballast attach`.
#[derive(Debug, Args)]
pub(crate) struct AttachCommand {
    /// Dataset UUID.
    #[arg(value_name = "DATASET_ID")]
    pub(crate) dataset_id: String,
    /// Target node id. Defaults to the node this command runs on.
    #[arg(long, value_name = "NODE_ID")]
    pub(crate) node: Option<String>,
}
