//! Merged ignore rules for indexing decisions
//!
//! Three sources are merged, in order of precedence: built-in defaults
//! (lockfiles, binary blobs, compiled artifacts, VCS metadata), the repo's
//! `.gitignore`, and a top-level `.osgrepignore`. Hidden path components are
//! always ignored. Filters are memoized per root and pure with respect to
//! their inputs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use once_cell::sync::Lazy;

/// File name of the user-level ignore file (gitignore syntax).
pub const USER_IGNORE_FILE: &str = ".osgrepignore";

/// Built-in patterns that never make sense to index.
const DEFAULT_PATTERNS: &[&str] = &[
    // VCS and tool metadata
    ".git/",
    ".hg/",
    ".svn/",
    ".osgrep/",
    // Dependency and build trees
    "node_modules/",
    "target/",
    "dist/",
    "build/",
    "vendor/",
    "__pycache__/",
    ".venv/",
    "venv/",
    // Lockfiles
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Gemfile.lock",
    "go.sum",
    // Generated / minified
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.ipynb",
    // Compiled artifacts
    "*.pyc",
    "*.o",
    "*.a",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.exe",
    "*.class",
    "*.jar",
    "*.wasm",
    // Binary blobs
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.pdf",
    "*.zip",
    "*.gz",
    "*.tar",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.onnx",
    "*.bin",
    "*.db",
    "*.sqlite",
];

static FILTER_CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<IgnoreFilter>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Per-root ignore filter merging defaults, `.gitignore`, and `.osgrepignore`.
pub struct IgnoreFilter {
    root: PathBuf,
    defaults: Gitignore,
    git: Option<Gitignore>,
    user: Option<Gitignore>,
}

impl IgnoreFilter {
    /// Get (or build) the memoized filter for a root.
    pub fn for_root(root: &Path) -> Arc<IgnoreFilter> {
        let key = root.to_path_buf();
        let mut cache = FILTER_CACHE.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(filter) = cache.get(&key) {
            return Arc::clone(filter);
        }
        let filter = Arc::new(IgnoreFilter::build(root));
        cache.insert(key, Arc::clone(&filter));
        filter
    }

    /// Drop the memoized filter for a root (the watcher calls this when
    /// an ignore file itself changes).
    pub fn invalidate(root: &Path) {
        let mut cache = FILTER_CACHE.lock().unwrap_or_else(|p| p.into_inner());
        cache.remove(root);
    }

    fn build(root: &Path) -> IgnoreFilter {
        // Canonical root so prefix-stripping agrees with canonicalized
        // walk results (the hidden-component check must not see the
        // ancestors of the root itself)
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let root = root.as_path();
        let mut builder = GitignoreBuilder::new(root);
        for pattern in DEFAULT_PATTERNS {
            // Patterns are static and known-valid; a failure here is a bug.
            if let Err(e) = builder.add_line(None, pattern) {
                tracing::warn!(pattern, error = %e, "Skipping bad default ignore pattern");
            }
        }
        let defaults = builder.build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Default ignore set failed to build, using empty");
            Gitignore::empty()
        });

        let git = load_ignore_file(root, &root.join(".gitignore"));
        let user = load_ignore_file(root, &root.join(USER_IGNORE_FILE));

        IgnoreFilter {
            root: root.to_path_buf(),
            defaults,
            git,
            user,
        }
    }

    /// Decide whether `path` is excluded from indexing.
    ///
    /// Precedence: hidden components, then `.osgrepignore`, then
    /// `.gitignore`, then built-in defaults. A whitelist match (`!pattern`)
    /// at a higher-precedence source overrides lower sources.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);

        if has_hidden_component(relative) {
            return true;
        }

        let is_dir = path.is_dir();
        for source in [self.user.as_ref(), self.git.as_ref(), Some(&self.defaults)]
            .into_iter()
            .flatten()
        {
            let m = source.matched_path_or_any_parents(relative, is_dir);
            if m.is_ignore() {
                return true;
            }
            if m.is_whitelist() {
                return false;
            }
        }
        false
    }

    /// Root this filter was built for.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn load_ignore_file(root: &Path, file: &Path) -> Option<Gitignore> {
    if !file.exists() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(e) = builder.add(file) {
        tracing::warn!(file = %file.display(), error = %e, "Failed to parse ignore file");
    }
    match builder.build() {
        Ok(gi) => Some(gi),
        Err(e) => {
            tracing::warn!(file = %file.display(), error = %e, "Ignore file skipped");
            None
        }
    }
}

/// True when any component of the (relative) path starts with a dot.
fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.') && s != "." && s != "..")
            .unwrap_or(false)
    })
}
