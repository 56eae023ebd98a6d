//! `osgrep list` — enumerate known stores

use anyhow::Result;
use colored::Colorize;

use osgrep::{Config, Store};

pub fn run() -> Result<()> {
    let config = Config::load();
    let store_dir = config.store_dir();

    let Ok(entries) = std::fs::read_dir(&store_dir) else {
        println!("No stores yet ({}).", store_dir.display());
        return Ok(());
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    if names.is_empty() {
        println!("No stores yet ({}).", store_dir.display());
        return Ok(());
    }

    for name in names {
        match Store::open_or_create(&config.data_dir, &name) {
            Ok(store) => {
                let fragments = store.count().unwrap_or(0);
                let paths = store.list_paths().map(|p| p.len()).unwrap_or(0);
                let size = dir_size(&store_dir.join(&name));
                println!(
                    "{}  {} fragments, {} files, {}",
                    name.cyan().bold(),
                    fragments,
                    paths,
                    human_bytes(size).dimmed(),
                );
            }
            Err(e) => {
                println!("{}  {}", name.cyan().bold(), format!("unreadable: {}", e).red());
            }
        }
    }
    Ok(())
}

fn dir_size(dir: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
