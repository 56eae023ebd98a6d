//! CLI implementation for osgrep

mod commands;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

// Exit codes
#[repr(i32)]
#[allow(dead_code)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Interrupted = 130,
}

// Signal handling
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install Ctrl+C handler for graceful shutdown
///
/// First Ctrl+C sets the interrupt flag, letting the current batch finish.
/// Second Ctrl+C force-exits with code 130.
fn setup_signal_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitCode::Interrupted as i32);
        }
        eprintln!("\nInterrupted. Finishing current files...");
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "Could not install Ctrl+C handler");
    }
}

/// Check if the user requested interruption via Ctrl+C
pub(crate) fn interrupt_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

#[derive(Parser)]
#[command(name = "osgrep")]
#[command(about = "Local semantic code search with hybrid dense+keyword retrieval")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query (quote multi-word queries)
    query: Option<String>,

    /// Directory to scope the search to
    scope: Option<PathBuf>,

    /// Max results
    #[arg(short = 'n', long, default_value = "10")]
    limit: usize,

    /// Skip the cross-encoder rerank pass
    #[arg(long)]
    no_rerank: bool,

    /// Matches allowed per file
    #[arg(long, default_value = "1")]
    per_file: usize,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Show only file:line, no content
    #[arg(long)]
    no_content: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the index (also the default when a bare query is given)
    Search {
        /// Search query
        query: String,
        /// Directory to scope the search to
        scope: Option<PathBuf>,
    },
    /// Index a repository
    Index {
        /// Show what would be indexed, don't write
        #[arg(long)]
        dry_run: bool,
        /// Re-index every file, ignoring the hash cache
        #[arg(long)]
        force: bool,
        /// Repository root (defaults to the enclosing repo of the cwd)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Run the watcher + HTTP search server
    Serve {
        /// Port to listen on (127.0.0.1 only)
        #[arg(long, default_value = "7171")]
        port: u16,
        /// Exit when this process dies
        #[arg(long)]
        parent_pid: Option<u32>,
        /// Repository root (defaults to the enclosing repo of the cwd)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Download model assets and prepare the data directory
    Setup,
    /// Check data directory, models, store, and workers
    Doctor,
    /// List known stores
    List,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_signal_handler();

    match cli.command {
        Some(Commands::Search { ref query, ref scope }) => {
            commands::search::run(&cli, query, scope.as_deref())
        }
        None => match cli.query.clone() {
            Some(query) => {
                let scope = cli.scope.clone();
                commands::search::run(&cli, &query, scope.as_deref())
            }
            None => {
                // No subcommand and no query: print help like clap would
                use clap::CommandFactory;
                Cli::command().print_help()?;
                println!();
                Ok(())
            }
        },
        Some(Commands::Index {
            dry_run,
            force,
            ref path,
        }) => commands::index::run(&cli, dry_run, force, path.as_deref()),
        Some(Commands::Serve {
            port,
            parent_pid,
            ref path,
        }) => commands::serve::run(port, parent_pid, path.as_deref()),
        Some(Commands::Setup) => commands::setup::run(),
        Some(Commands::Doctor) => commands::doctor::run(),
        Some(Commands::List) => commands::list::run(),
    }
}

/// Resolve the repository root for a command: explicit flag, else the
/// enclosing repo of the current directory.
pub(crate) fn resolve_root(path: Option<&std::path::Path>) -> Result<PathBuf> {
    let base = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let root = osgrep::find_repo_root(&base);
    Ok(root.canonicalize().unwrap_or(root))
}
