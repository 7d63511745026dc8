//! Command-line interface definitions for the `meshpool` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `meshpool` binary.
#[derive(Debug, Parser)]
#[command(
    name = "meshpool",
    about = "Provision disposable build-agent meshes and hold them until interrupted",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `meshpool`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create one mesh, wait until its agent is ready and hold it until Ctrl-C.
    #[command(name = "up")]
    Up,
    /// Create several meshes under a concurrency limit and hold them until Ctrl-C.
    #[command(name = "batch")]
    Batch(BatchCommand),
}

/// Arguments for the `meshpool batch` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BatchCommand {
    /// Number of meshes to create; overrides `mesh_count` from configuration.
    #[arg(long, value_name = "N")]
    pub(crate) count: Option<usize>,
    /// Maximum number of meshes provisioning at once; overrides `parallelism`.
    #[arg(long, value_name = "K")]
    pub(crate) parallelism: Option<usize>,
    /// Keep healthy meshes when others fail instead of aborting the batch.
    #[arg(long)]
    pub(crate) continue_on_failure: bool,
}
