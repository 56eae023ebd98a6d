//! Runtime configuration for osgrep
//!
//! Configuration comes from two layers (later overrides earlier):
//! 1. Built-in defaults (data dir under `~/.osgrep`, timeouts, thresholds)
//! 2. `OSGREP_*` environment variables
//!
//! CLI flags override everything and are applied by the caller.

use std::path::PathBuf;
use std::time::Duration;

/// Default worker request deadline.
const DEFAULT_WORKER_TIMEOUT_MS: u64 = 60_000;

/// Default server memory thresholds in MB.
const DEFAULT_SERVER_WARN_MB: u64 = 2_048;
const DEFAULT_SERVER_RESTART_MB: u64 = 4_096;

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory root (`~/.osgrep` or `OSGREP_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Store name override (`OSGREP_STORE`); derived from the repo root when unset.
    pub store_name: Option<String>,
    /// Per-request worker deadline.
    pub worker_timeout: Duration,
    /// Worker RSS recycle threshold in bytes. `None` = 50% of system RAM.
    pub worker_memory_cap: Option<u64>,
    /// Server memory warning threshold in bytes.
    pub server_memory_warn: u64,
    /// Server memory restart threshold in bytes.
    pub server_memory_restart: u64,
    /// Ingest concurrency override; defaults to `max(1, cpus/2)`.
    pub threads: Option<usize>,
    /// Emit timing spans for profiling runs.
    pub profile: bool,
    /// Disable periodic MetaStore saves (tests and benchmarks).
    pub skip_meta_save: bool,
}

impl Config {
    /// Resolve configuration from defaults and environment variables.
    pub fn load() -> Self {
        let data_dir = std::env::var_os("OSGREP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Config {
            data_dir,
            store_name: env_string("OSGREP_STORE"),
            worker_timeout: Duration::from_millis(
                env_parse("OSGREP_WORKER_TIMEOUT_MS").unwrap_or(DEFAULT_WORKER_TIMEOUT_MS),
            ),
            worker_memory_cap: env_parse::<u64>("OSGREP_WORKER_MEMORY_MB").map(mb_to_bytes),
            server_memory_warn: mb_to_bytes(
                env_parse("OSGREP_SERVER_MEMORY_WARN_MB").unwrap_or(DEFAULT_SERVER_WARN_MB),
            ),
            server_memory_restart: mb_to_bytes(
                env_parse("OSGREP_SERVER_MEMORY_RESTART_MB").unwrap_or(DEFAULT_SERVER_RESTART_MB),
            ),
            threads: env_parse("OSGREP_THREADS"),
            profile: env_flag("OSGREP_PROFILE"),
            skip_meta_save: env_flag("OSGREP_SKIP_META_SAVE"),
        }
    }

    /// Ingest concurrency: explicit override, else `max(1, cpus/2)`.
    pub fn sync_concurrency(&self) -> usize {
        if let Some(n) = self.threads {
            return n.max(1);
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cpus / 2).max(1)
    }

    /// Directory holding per-store index files.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }

    /// Directory holding downloaded model weights.
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    /// Path of the MetaStore JSON file.
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("meta.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            store_name: None,
            worker_timeout: Duration::from_millis(DEFAULT_WORKER_TIMEOUT_MS),
            worker_memory_cap: None,
            server_memory_warn: mb_to_bytes(DEFAULT_SERVER_WARN_MB),
            server_memory_restart: mb_to_bytes(DEFAULT_SERVER_RESTART_MB),
            threads: None,
            profile: false,
            skip_meta_save: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".osgrep")
}

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
