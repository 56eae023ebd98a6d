//! `osgrep setup` — fetch model assets and prepare the data directory

use anyhow::{Context, Result};
use colored::Colorize;

use osgrep::embed::session::ensure_models;
use osgrep::Config;

pub fn run() -> Result<()> {
    let config = Config::load();

    std::fs::create_dir_all(config.store_dir()).context("Cannot create data directory")?;
    println!("Data directory: {}", config.data_dir.display().to_string().cyan());

    println!("Fetching model assets (one-time download)...");
    let paths = ensure_models(&config.models_dir()).context("Model download failed")?;
    println!(
        "{} encoder: {}",
        "Ready".green().bold(),
        paths.dense_model.display()
    );
    println!(
        "{} reranker: {}",
        "Ready".green().bold(),
        paths.reranker_model.display()
    );
    println!("Everything runs offline from here.");
    Ok(())
}
