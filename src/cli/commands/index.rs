//! `osgrep index` — sync a repository into its store

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use osgrep::embed::PoolConfig;
use osgrep::sync::{SyncOptions, SyncProgressCallback};
use osgrep::{Chunker, Config, MetaStore, Store, SyncEngine, WorkerPool};

use crate::cli::{interrupt_flag, resolve_root, Cli};

pub fn run(cli: &Cli, dry_run: bool, force: bool, path: Option<&Path>) -> Result<()> {
    let config = Config::load();
    let root = resolve_root(path)?;
    let store_name = config
        .store_name
        .clone()
        .unwrap_or_else(|| osgrep::store_name_for_root(&root));

    if !cli.quiet {
        println!(
            "Indexing {} into store {}{}",
            root.display().to_string().cyan(),
            store_name.bold(),
            if dry_run { " (dry run)".dimmed().to_string() } else { String::new() }
        );
    }

    let store =
        Store::open_or_create(&config.data_dir, &store_name).context("Cannot open store")?;
    let chunker = Chunker::new().context("Cannot initialize chunker")?;
    let pool = WorkerPool::new(PoolConfig::from_config(&config));
    let meta = Mutex::new({
        let mut m = MetaStore::load(&config.meta_path());
        m.set_skip_saves(config.skip_meta_save);
        m
    });

    let engine = SyncEngine::new(&store, &chunker, &pool, &meta, config.sync_concurrency());

    let mut progress: Box<dyn SyncProgressCallback> = if cli.quiet {
        Box::new(())
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Progress template error, using default");
                    ProgressStyle::default_bar()
                }),
        );
        Box::new(bar)
    };

    let started = std::time::Instant::now();
    let outcome = engine.sync(
        &root,
        SyncOptions { dry_run, force },
        interrupt_flag(),
        progress.as_mut(),
    )?;
    if config.profile {
        eprintln!(
            "profile: sync took {:.2}s for {} files",
            started.elapsed().as_secs_f64(),
            outcome.processed
        );
    }

    pool.shutdown();

    if !cli.quiet {
        let verb = if dry_run { "would index" } else { "indexed" };
        println!(
            "{} {} files ({} {}, {} skipped, {} deleted{})",
            "Done:".green().bold(),
            outcome.processed,
            outcome.indexed,
            verb,
            outcome.skipped,
            outcome.deleted,
            if outcome.cancelled { ", cancelled" } else { "" },
        );
    }
    Ok(())
}
