//! `osgrep serve` — watcher + authenticated localhost search server

use std::path::Path;

use anyhow::Result;

use osgrep::server::{self, ServeOptions};
use osgrep::Config;

use crate::cli::resolve_root;

pub fn run(port: u16, parent_pid: Option<u32>, path: Option<&Path>) -> Result<()> {
    let config = Config::load();
    let root = resolve_root(path)?;
    server::run(&config, &root, ServeOptions { port, parent_pid })
}
