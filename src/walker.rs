//! Candidate file enumeration
//!
//! Prefers the repository's own tracked-file listing (`git ls-files`), which
//! honors the repo's ignore semantics for free; falls back to a recursive
//! walk when the root is not a repository or git is unavailable. Every
//! candidate still passes through the merged [`IgnoreFilter`].

use std::path::{Path, PathBuf};
use std::process::Command;

use ignore::WalkBuilder;

use crate::ignore_rules::{IgnoreFilter, USER_IGNORE_FILE};

/// Files larger than this are never indexed.
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Enumerate absolute candidate paths under `root`.
///
/// Walk errors on individual entries are logged and skipped, never fatal.
pub fn list_files(root: &Path, filter: &IgnoreFilter) -> Vec<PathBuf> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    let mut files = if root.join(".git").exists() {
        match git_tracked_files(&root) {
            Some(files) => files,
            None => walk_files(&root),
        }
    } else {
        walk_files(&root)
    };

    files.retain(|path| {
        if filter.is_ignored(path) {
            return false;
        }
        match path.metadata() {
            Ok(meta) if meta.is_file() => {
                if meta.len() > MAX_FILE_SIZE {
                    tracing::debug!(path = %path.display(), size = meta.len(), "Skipping oversized file");
                    false
                } else {
                    true
                }
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                false
            }
        }
    });

    files.sort();
    tracing::info!(file_count = files.len(), root = %root.display(), "File enumeration complete");
    files
}

/// List tracked + untracked-but-not-ignored files via git.
///
/// Returns `None` when git is missing or exits nonzero, so the caller can
/// fall back to a directory walk.
fn git_tracked_files(root: &Path) -> Option<Vec<PathBuf>> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["ls-files", "-z", "--cached", "--others", "--exclude-standard"])
        .output()
        .map_err(|e| {
            tracing::debug!(error = %e, "git unavailable, falling back to directory walk");
        })
        .ok()?;

    if !output.status.success() {
        tracing::debug!(status = %output.status, "git ls-files failed, falling back to directory walk");
        return None;
    }

    let files = output
        .stdout
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| root.join(String::from_utf8_lossy(chunk).as_ref()))
        .collect();
    Some(files)
}

/// Recursive directory walk honoring gitignore semantics and the user
/// ignore file; hidden entries pruned.
fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .follow_links(false);
    builder.add_custom_ignore_filename(USER_IGNORE_FILE);

    builder
        .build()
        .filter_map(|entry| {
            entry
                .map_err(|e| {
                    tracing::debug!(error = %e, "Failed to read directory entry during walk");
                })
                .ok()
        })
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.into_path())
        .collect()
}
