//! `osgrep search` — query the index, auto-indexing on first use

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use osgrep::embed::PoolConfig;
use osgrep::search::{SearchOptions, Searcher};
use osgrep::sync::SyncOptions;
use osgrep::{Chunker, Config, MetaStore, Store, SyncEngine, WorkerPool};

use crate::cli::{interrupt_flag, resolve_root, Cli};

pub fn run(cli: &Cli, query: &str, scope: Option<&Path>) -> Result<()> {
    let config = Config::load();
    let root = resolve_root(None)?;
    let store_name = config
        .store_name
        .clone()
        .unwrap_or_else(|| osgrep::store_name_for_root(&root));

    let store =
        Store::open_or_create(&config.data_dir, &store_name).context("Cannot open store")?;
    let pool = WorkerPool::new(PoolConfig::from_config(&config));

    // Empty store (first run, or the data directory was wiped): run a full
    // sync before answering.
    if store.count()? == 0 {
        if !cli.quiet {
            eprintln!("{}", "Index empty, running initial sync...".dimmed());
        }
        let chunker = Chunker::new().context("Cannot initialize chunker")?;
        let meta = Mutex::new({
            let mut m = MetaStore::load(&config.meta_path());
            m.set_skip_saves(config.skip_meta_save);
            m
        });
        let engine = SyncEngine::new(&store, &chunker, &pool, &meta, config.sync_concurrency());
        let mut noop = |_: osgrep::SyncProgress| {};
        let outcome = engine.sync(&root, SyncOptions::default(), interrupt_flag(), &mut noop)?;
        if !cli.quiet {
            eprintln!("{} {} files indexed", "Synced:".dimmed(), outcome.indexed);
        }
    }

    let path_prefix = match scope {
        Some(dir) => {
            let full = if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                root.join(dir)
            };
            Some(full.to_string_lossy().into_owned())
        }
        None => None,
    };

    let options = SearchOptions {
        top_k: cli.limit,
        path_prefix,
        rerank: !cli.no_rerank,
        per_file: cli.per_file.max(1),
    };

    let searcher = Searcher::new(&store, &pool);
    let hits = searcher.search(query, &options)?;
    pool.shutdown();

    if cli.json {
        let out: Vec<_> = hits
            .iter()
            .map(|hit| {
                json!({
                    "path": hit.path,
                    "score": hit.score,
                    "content": hit.text,
                    "chunk_type": hit.kind.to_string(),
                    "start_line": hit.start_line,
                    "num_lines": hit.end_line.saturating_sub(hit.start_line),
                    "is_anchor": hit.is_anchor,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if hits.is_empty() {
        if !cli.quiet {
            println!("{}", "No results.".dimmed());
        }
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!(
            "{}{}{} {} {}",
            hit.path.cyan().bold(),
            ":".dimmed(),
            // 1-indexed for display
            (hit.start_line + 1).to_string().yellow(),
            format!("({:.3})", hit.score).dimmed(),
            hit.kind.to_string().magenta(),
        );
        if !cli.no_content {
            for line in hit.text.lines().take(12) {
                println!("  {}", line);
            }
            if hit.text.lines().count() > 12 {
                println!("  {}", "...".dimmed());
            }
        }
    }
    Ok(())
}
