//! `osgrep doctor` — sanity-check the installation

use anyhow::Result;
use colored::Colorize;

use osgrep::{Chunker, Config, Store};

fn report(label: &str, ok: bool, detail: &str) {
    let mark = if ok { "ok".green().bold() } else { "FAIL".red().bold() };
    println!("  [{}] {}: {}", mark, label, detail);
}

pub fn run() -> Result<()> {
    let config = Config::load();
    let mut failures = 0;

    println!("osgrep doctor");

    // Data directory writable
    let data_ok = std::fs::create_dir_all(config.store_dir()).is_ok();
    report(
        "data dir",
        data_ok,
        &config.data_dir.display().to_string(),
    );
    failures += u32::from(!data_ok);

    // Model assets present (no network here; setup downloads them)
    let models_present = config.models_dir().exists()
        && std::fs::read_dir(config.models_dir())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
    report(
        "models",
        models_present,
        if models_present {
            "downloaded"
        } else {
            "missing — run 'osgrep setup'"
        },
    );
    failures += u32::from(!models_present);

    // Grammars compile
    let chunker_ok = Chunker::new().is_ok();
    report("grammars", chunker_ok, "tree-sitter queries compile");
    failures += u32::from(!chunker_ok);

    // Store opens for the current repo
    let root = crate::cli::resolve_root(None)?;
    let store_name = config
        .store_name
        .clone()
        .unwrap_or_else(|| osgrep::store_name_for_root(&root));
    match Store::open_or_create(&config.data_dir, &store_name) {
        Ok(store) => {
            let count = store.count().unwrap_or(0);
            report("store", true, &format!("{} ({} fragments)", store_name, count));
        }
        Err(e) => {
            report("store", false, &e.to_string());
            failures += 1;
        }
    }

    // Git available (walker prefers the tracked-file listing)
    let git_ok = std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    report(
        "git",
        git_ok,
        if git_ok {
            "available (tracked-file walks)"
        } else {
            "missing (directory walks only)"
        },
    );

    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    println!("{}", "All checks passed.".green().bold());
    Ok(())
}
