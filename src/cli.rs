//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kosh incremental static site generator CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// root directory path
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file path related to `root`
    #[arg(short = 'C', long, default_value = "kosh.toml")]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Shared build arguments
#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Demote every cache hit to a miss and re-render everything
    #[arg(long)]
    pub force: bool,

    /// Regenerate every social card
    #[arg(long)]
    pub force_social: bool,

    /// Render pages even when destinations look up to date
    #[arg(long)]
    pub output_missing: bool,

    /// Include draft posts
    #[arg(long)]
    pub drafts: bool,

    /// Watch for changes and rebuild incrementally
    #[arg(short, long)]
    pub watch: bool,

    /// Build only the posts of one version snapshot (e.g. v1.2)
    #[arg(long, value_name = "TAG")]
    pub version_tag: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the site into the output directory
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Cache management commands
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Delete the output directory
    Clean {
        /// Also delete the cache directory
        #[arg(long)]
        cache: bool,
    },
}

/// `kosh cache` subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommands {
    /// Show cache bucket sizes
    Stats,

    /// Reclaim orphaned content blobs and social-card hashes
    Gc {
        /// Report what would be deleted without deleting
        #[arg(long, short = 'n')]
        dry_run: bool,
    },

    /// Delete all cache data
    Clear,
}
