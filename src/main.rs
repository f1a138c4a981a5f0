//! Kosh - an incremental static site generator for Markdown blogs and
//! versioned docs.

mod build;
mod cache;
mod cli;
mod config;
mod hash;
mod logger;
mod markdown;
mod pipeline;
mod render;
mod search;
mod util;
mod watch;

use anyhow::Result;
use build::BuildOptions;
use cache::CacheStore;
use clap::Parser;
use cli::{CacheCommands, Cli, Commands};
use config::SiteConfig;
use render::Services;
use std::{fs, path::Path, process};
use util::CancelToken;

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            crate::log!("error"; "{e:#}");
            process::exit(2);
        }
    };

    if let Err(e) = run(&cli, &config) {
        crate::log!("error"; "{e:#}");
        process::exit(1);
    }
}

/// Load and validate configuration from CLI arguments.
///
/// A missing config file falls back to defaults; validation failures
/// (missing content directory, unparsable TOML) are fatal before any
/// build phase runs.
fn load_config(cli: &Cli) -> Result<SiteConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = if config_path.exists() {
        SiteConfig::from_path(&config_path)?
    } else {
        SiteConfig::default()
    };
    config.set_root(root);
    config.config_path = config_path;

    if !matches!(cli.command, Commands::Clean { .. }) {
        config.validate()?;
    }
    if let Commands::Build { build_args } = &cli.command
        && let Some(tag) = &build_args.version_tag
    {
        config.resolve_version_tag(tag)?;
    }
    Ok(config)
}

fn run(cli: &Cli, config: &SiteConfig) -> Result<()> {
    match &cli.command {
        Commands::Build { build_args } => {
            let opts = BuildOptions {
                force: build_args.force,
                force_social: build_args.force_social,
                output_missing: build_args.output_missing,
                include_drafts: build_args.drafts || config.build.drafts,
                version_tag: build_args
                    .version_tag
                    .as_deref()
                    .map(|tag| config.resolve_version_tag(tag))
                    .transpose()?,
            };
            let cancel = CancelToken::new();
            let services = Services::default();

            // A broken cache degrades to uncached builds, never a
            // failed one
            let cache = match CacheStore::open(&config.cache_dir()) {
                Ok(store) => Some(store),
                Err(e) => {
                    crate::log!("warn"; "cache unavailable, building cold: {e}");
                    None
                }
            };

            build::build_site(config, cache.as_ref(), &services, &opts, &cancel)?;

            if build_args.watch {
                watch::watch_for_changes_blocking(
                    config,
                    cache.as_ref(),
                    &services,
                    &opts,
                    &cancel,
                )?;
            }
            Ok(())
        }

        Commands::Cache { command } => {
            let cache = CacheStore::open(&config.cache_dir())?;
            match command {
                CacheCommands::Stats => {
                    let stats = cache.stats()?;
                    crate::log!("cache"; "posts: {}", stats.posts);
                    crate::log!("cache"; "content blobs: {}", stats.content_blobs);
                    crate::log!("cache"; "search records: {}", stats.search_records);
                    crate::log!("cache"; "dependency records: {}", stats.dependency_records);
                    crate::log!("cache"; "social-card hashes: {}", stats.social_hashes);
                }
                CacheCommands::Gc { dry_run } => {
                    let report = cache.gc(*dry_run)?;
                    let verb = if *dry_run { "would reclaim" } else { "reclaimed" };
                    crate::log!(
                        "cache";
                        "{verb} {} content blobs, {} social-card hashes",
                        report.orphaned_content.len(),
                        report.orphaned_social_cards.len()
                    );
                }
                CacheCommands::Clear => {
                    cache.purge_all()?;
                    crate::log!("cache"; "cleared");
                }
            }
            Ok(())
        }

        Commands::Clean { cache } => {
            let output = config.output_dir();
            if output.exists() {
                fs::remove_dir_all(&output)?;
                crate::log!("clean"; "removed {}", output.display());
            }
            if *cache {
                let cache_dir = config.cache_dir();
                if cache_dir.exists() {
                    fs::remove_dir_all(&cache_dir)?;
                    crate::log!("clean"; "removed {}", cache_dir.display());
                }
            }
            Ok(())
        }
    }
}
