//! Structure-aware chunking of source files
//!
//! Splits a file into fragments respecting syntactic structure when a
//! tree-sitter grammar is available, falling back to a line-based sliding
//! window otherwise. Every file additionally gets one synthesized anchor
//! fragment summarizing its header (top docblock, imports, declared names).
//!
//! Split into submodules:
//! - `structural` — declaration extraction from parse trees
//! - `fallback` — line-window splitting
//! - `anchor` — whole-file anchor synthesis

mod anchor;
mod fallback;
mod structural;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::language::{Language, REGISTRY};

/// Maximum fragment height before window slicing.
pub const MAX_LINES: u32 = 120;
/// Overlap between consecutive windows of an oversized fragment.
pub const OVERLAP_LINES: u32 = 20;
/// Fragments shorter than this are merged, never emitted alone.
pub const MIN_LINES: u32 = 3;
/// Upper bound on the context preamble prepended to fragment text.
const MAX_CONTEXT_BYTES: usize = 600;
/// How many import lines the preamble and anchor may carry.
const MAX_IMPORT_LINES: usize = 12;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Query compilation failed for {0}: {1}")]
    QueryCompileFailed(String, String),
    #[error("Parse failed: {0}")]
    ParseFailed(String),
}

/// Kind of code element a fragment represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Standalone function
    Function,
    /// Class-like declaration (class, struct, enum, trait, interface)
    Class,
    /// Function nested in a class/impl body
    Method,
    /// Other declaration (constant, type alias, coalesced small siblings)
    Block,
    /// Whole-file summary fragment
    Anchor,
    /// Line-window slice of an unparsed file
    Fallback,
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentKind::Function => write!(f, "function"),
            FragmentKind::Class => write!(f, "class"),
            FragmentKind::Method => write!(f, "method"),
            FragmentKind::Block => write!(f, "block"),
            FragmentKind::Anchor => write!(f, "anchor"),
            FragmentKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// Error returned when parsing an invalid FragmentKind string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFragmentKindError {
    /// The invalid input string
    pub input: String,
}

impl std::fmt::Display for ParseFragmentKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unknown fragment kind: '{}'. Valid options: function, class, method, block, anchor, fallback",
            self.input
        )
    }
}

impl std::error::Error for ParseFragmentKindError {}

impl std::str::FromStr for FragmentKind {
    type Err = ParseFragmentKindError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "function" => Ok(FragmentKind::Function),
            "class" => Ok(FragmentKind::Class),
            "method" => Ok(FragmentKind::Method),
            "block" => Ok(FragmentKind::Block),
            "anchor" => Ok(FragmentKind::Anchor),
            "fallback" => Ok(FragmentKind::Fallback),
            _ => Err(ParseFragmentKindError {
                input: s.to_string(),
            }),
        }
    }
}

/// A chunked piece of a source file, ready for embedding.
///
/// Line spans are 0-indexed, inclusive start / exclusive end. `text` carries
/// an optional context preamble (imports, enclosing signature); the first
/// `context_len` bytes are the preamble and are stripped for display.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Stable identifier: `path:start_line:text_hash_prefix`
    pub id: String,
    /// Absolute path of the owning file
    pub path: PathBuf,
    /// What the fragment represents
    pub kind: FragmentKind,
    /// First line of the span (0-indexed, inclusive)
    pub start_line: u32,
    /// One past the last line of the span (exclusive)
    pub end_line: u32,
    /// Context preamble + source text (the embedding input)
    pub text: String,
    /// Byte length of the preamble inside `text`
    pub context_len: usize,
    /// True for the one whole-file anchor fragment
    pub is_anchor: bool,
}

impl Fragment {
    /// Fragment text without the context preamble (what users see).
    pub fn display_text(&self) -> &str {
        &self.text[self.context_len.min(self.text.len())..]
    }

    /// Number of lines covered by the span.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }
}

/// Structure-aware chunker with lazily compiled per-language queries.
///
/// Deterministic: identical input bytes and grammar versions produce
/// byte-identical fragment lists.
///
/// # Example
///
/// ```no_run
/// use osgrep::Chunker;
///
/// let chunker = Chunker::new()?;
/// let fragments = chunker.chunk_file(std::path::Path::new("src/main.rs"))?;
/// for frag in fragments {
///     println!("{} [{}, {})", frag.kind, frag.start_line, frag.end_line);
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Chunker {
    /// Lazily compiled chunk queries per language
    queries: HashMap<Language, OnceCell<tree_sitter::Query>>,
    /// Lazily compiled import queries per language
    import_queries: HashMap<Language, OnceCell<tree_sitter::Query>>,
}

impl Chunker {
    /// Create a new chunker (queries are compiled lazily on first use)
    pub fn new() -> Result<Self, ChunkerError> {
        let mut queries = HashMap::new();
        let mut import_queries = HashMap::new();

        for def in REGISTRY.all() {
            let lang: Language = def.name.parse().expect("registry/enum mismatch");
            queries.insert(lang, OnceCell::new());
            if def.import_query.is_some() {
                import_queries.insert(lang, OnceCell::new());
            }
        }

        Ok(Self {
            queries,
            import_queries,
        })
    }

    /// Chunk a file from disk.
    ///
    /// Returns an empty Vec for empty or non-UTF8 files (logged, not fatal).
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Fragment>, ChunkerError> {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!(path = %path.display(), "Skipping non-UTF8 file");
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.chunk_source(path, &source))
    }

    /// Chunk already-read source text.
    ///
    /// Structural chunking when a grammar is available; otherwise the
    /// line-window fallback. The anchor fragment always precedes all others.
    pub fn chunk_source(&self, path: &Path, source: &str) -> Vec<Fragment> {
        let _span = tracing::debug_span!("chunk_source", path = %path.display()).entered();

        // Normalize line endings for consistent hashing across platforms
        let source = source.replace("\r\n", "\n");
        if source.is_empty() {
            return vec![];
        }
        let line_count = count_lines(&source);

        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension);

        let (candidates, imports) = match language {
            Some(lang) => match self.extract(lang, &source) {
                Ok(found) => found,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Structural chunking failed, using fallback");
                    (vec![], vec![])
                }
            },
            None => (vec![], vec![]),
        };

        let mut fragments = if candidates.is_empty() {
            fallback::split(path, &source, line_count)
        } else {
            self.assemble(path, &source, line_count, candidates, &imports)
        };

        let names = structural::top_level_names(&fragments, &source);
        if let Some(anchor) = anchor::build(path, &source, line_count, &imports, &names) {
            fragments.insert(0, anchor);
        }

        // Anchor first, then increasing start_line (stable for equal starts)
        fragments[1..].sort_by_key(|f| (f.start_line, f.end_line));
        fragments
    }

    fn extract(
        &self,
        language: Language,
        source: &str,
    ) -> Result<(Vec<structural::Candidate>, Vec<String>), ChunkerError> {
        let query = self.get_query(language)?;
        let candidates = structural::extract(source, language, query)?;

        let imports = match self.get_import_query(language) {
            Some(Ok(q)) => structural::extract_imports(source, language, q, MAX_IMPORT_LINES),
            Some(Err(e)) => {
                tracing::debug!(language = %language, error = %e, "Import query unavailable");
                vec![]
            }
            None => vec![],
        };

        Ok((candidates, imports))
    }

    /// Get or compile the chunk extraction query for a language
    fn get_query(&self, language: Language) -> Result<&tree_sitter::Query, ChunkerError> {
        let cell = self.queries.get(&language).ok_or_else(|| {
            ChunkerError::QueryCompileFailed(language.to_string(), "not registered".into())
        })?;

        cell.get_or_try_init(|| {
            let grammar = language.grammar();
            tree_sitter::Query::new(&grammar, language.def().chunk_query).map_err(|e| {
                ChunkerError::QueryCompileFailed(language.to_string(), format!("{:?}", e))
            })
        })
    }

    fn get_import_query(
        &self,
        language: Language,
    ) -> Option<Result<&tree_sitter::Query, ChunkerError>> {
        let cell = self.import_queries.get(&language)?;
        Some(cell.get_or_try_init(|| {
            let grammar = language.grammar();
            let pattern = language.def().import_query.unwrap_or("");
            tree_sitter::Query::new(&grammar, pattern).map_err(|e| {
                ChunkerError::QueryCompileFailed(
                    format!("{}_imports", language),
                    format!("{:?}", e),
                )
            })
        }))
    }

    /// Turn structural candidates into decorated, size-bounded fragments.
    fn assemble(
        &self,
        path: &Path,
        source: &str,
        line_count: u32,
        candidates: Vec<structural::Candidate>,
        imports: &[String],
    ) -> Vec<Fragment> {
        let lines: Vec<&str> = source.lines().collect();
        let top_doc = anchor::top_doc_block(&lines);

        let merged = merge_small(candidates, line_count);

        let mut fragments = Vec::with_capacity(merged.len());
        for cand in merged {
            let body = slice_lines(&lines, cand.start_line, cand.end_line);
            let context = build_context(&top_doc, imports, cand.enclosing_signature.as_deref());

            if cand.end_line - cand.start_line > MAX_LINES {
                fragments.extend(window_fragment(path, &lines, &cand, &context));
            } else {
                fragments.push(make_fragment(
                    path,
                    cand.kind,
                    cand.start_line,
                    cand.end_line,
                    &context,
                    &body,
                ));
            }
        }
        fragments
    }
}

/// Slice an oversized candidate into overlapping windows with monotone spans.
fn window_fragment(
    path: &Path,
    lines: &[&str],
    cand: &structural::Candidate,
    context: &str,
) -> Vec<Fragment> {
    let step = (MAX_LINES - OVERLAP_LINES).max(1);
    let mut windows = Vec::new();
    let mut start = cand.start_line;
    loop {
        let end = (start + MAX_LINES).min(cand.end_line);
        let body = slice_lines(lines, start, end);
        // Only the first window keeps the full preamble; later windows carry
        // just the enclosing signature so overlap text stays distinct.
        let ctx = if start == cand.start_line {
            context.to_string()
        } else {
            cand.enclosing_signature
                .as_deref()
                .map(|sig| format!("{}\n", sig))
                .unwrap_or_default()
        };
        windows.push(make_fragment(path, cand.kind, start, end, &ctx, &body));
        if end >= cand.end_line {
            break;
        }
        start += step;
    }
    windows
}

fn make_fragment(
    path: &Path,
    kind: FragmentKind,
    start_line: u32,
    end_line: u32,
    context: &str,
    body: &str,
) -> Fragment {
    let text = format!("{}{}", context, body);
    let hash = blake3::hash(text.as_bytes()).to_hex().to_string();
    let prefix = hash.get(..8).unwrap_or(&hash);
    Fragment {
        id: format!("{}:{}:{}", path.display(), start_line, prefix),
        path: path.to_path_buf(),
        kind,
        start_line,
        end_line,
        text,
        context_len: context.len(),
        is_anchor: false,
    }
}

/// Merge fragments shorter than [`MIN_LINES`] into a sibling; nested
/// too-small candidates are promoted into their parent (dropped as separate
/// rows — the parent's text already contains them).
fn merge_small(
    candidates: Vec<structural::Candidate>,
    line_count: u32,
) -> Vec<structural::Candidate> {
    let mut kept: Vec<structural::Candidate> = Vec::with_capacity(candidates.len());

    for cand in candidates {
        let small = cand.end_line - cand.start_line < MIN_LINES;
        if !small {
            kept.push(cand);
            continue;
        }
        if cand.nested {
            continue;
        }
        match kept.last_mut() {
            // Absorb into the previous top-level sibling
            Some(prev) if !prev.nested => {
                prev.end_line = cand.end_line.max(prev.end_line).min(line_count);
                if prev.end_line - prev.start_line >= MIN_LINES && prev.kind != cand.kind {
                    prev.kind = FragmentKind::Block;
                }
            }
            // No sibling yet: keep as a pending block and let the next
            // absorption grow it past the minimum
            _ => {
                let mut pending = cand;
                pending.kind = FragmentKind::Block;
                kept.push(pending);
            }
        }
    }

    // A lone leading run that never grew past the minimum is dropped
    // (the anchor fragment still covers the file header).
    kept.retain(|c| c.end_line - c.start_line >= MIN_LINES);
    kept
}

/// Bounded context preamble: top doc block, import lines, enclosing signature.
fn build_context(top_doc: &[String], imports: &[String], enclosing: Option<&str>) -> String {
    let mut out = String::new();
    for line in top_doc.iter().take(3) {
        out.push_str(line);
        out.push('\n');
    }
    for line in imports.iter().take(MAX_IMPORT_LINES) {
        if out.len() + line.len() > MAX_CONTEXT_BYTES {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    if let Some(sig) = enclosing {
        if out.len() + sig.len() <= MAX_CONTEXT_BYTES {
            out.push_str(sig);
            out.push('\n');
        }
    }
    out.truncate(MAX_CONTEXT_BYTES);
    out
}

fn slice_lines(lines: &[&str], start: u32, end: u32) -> String {
    let start = start as usize;
    let end = (end as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

pub(crate) fn count_lines(source: &str) -> u32 {
    source.lines().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_SAMPLE: &str = r#"//! Sample module

use std::fmt;

/// Adds two numbers
fn add(a: i32, b: i32) -> i32 {
    let total = a + b;
    total
}

struct Counter {
    value: i32,
    step: i32,
}

impl Counter {
    fn increment(&mut self) {
        self.value += self.step;
        assert!(self.value >= 0);
    }
}
"#;

    #[test]
    fn test_chunk_rust_structural() {
        let chunker = Chunker::new().unwrap();
        let frags = chunker.chunk_source(Path::new("/tmp/sample.rs"), RUST_SAMPLE);

        assert!(frags[0].is_anchor);
        assert_eq!(frags[0].kind, FragmentKind::Anchor);
        assert_eq!(frags.iter().filter(|f| f.is_anchor).count(), 1);

        let func = frags
            .iter()
            .find(|f| f.display_text().contains("fn add"))
            .expect("function fragment");
        assert_eq!(func.kind, FragmentKind::Function);

        let method = frags
            .iter()
            .find(|f| f.display_text().starts_with("fn increment") || f.display_text().contains("fn increment"))
            .expect("method fragment");
        assert_eq!(method.kind, FragmentKind::Method);
    }

    #[test]
    fn test_spans_inside_file() {
        let chunker = Chunker::new().unwrap();
        let frags = chunker.chunk_source(Path::new("/tmp/sample.rs"), RUST_SAMPLE);
        let total = count_lines(RUST_SAMPLE);
        for f in &frags {
            assert!(f.start_line < f.end_line, "{:?}", f.id);
            assert!(f.end_line <= total, "{:?} ends at {} > {}", f.id, f.end_line, total);
        }
    }

    #[test]
    fn test_deterministic() {
        let chunker = Chunker::new().unwrap();
        let a = chunker.chunk_source(Path::new("/tmp/sample.rs"), RUST_SAMPLE);
        let b = chunker.chunk_source(Path::new("/tmp/sample.rs"), RUST_SAMPLE);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
            assert_eq!(x.start_line, y.start_line);
            assert_eq!(x.end_line, y.end_line);
        }
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let chunker = Chunker::new().unwrap();
        assert!(chunker.chunk_source(Path::new("/tmp/e.rs"), "").is_empty());
    }

    #[test]
    fn test_unknown_extension_uses_fallback() {
        let chunker = Chunker::new().unwrap();
        let source = (0..50).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let frags = chunker.chunk_source(Path::new("/tmp/notes.xyz"), &source);
        assert!(frags.iter().any(|f| f.kind == FragmentKind::Fallback));
        assert!(frags[0].is_anchor);
    }

    #[test]
    fn test_oversized_fragment_is_windowed() {
        let mut source = String::from("fn huge() {\n");
        for i in 0..300 {
            source.push_str(&format!("    let x{} = {};\n", i, i));
        }
        source.push_str("}\n");

        let chunker = Chunker::new().unwrap();
        let frags = chunker.chunk_source(Path::new("/tmp/huge.rs"), &source);
        let windows: Vec<_> = frags.iter().filter(|f| f.kind == FragmentKind::Function).collect();
        assert!(windows.len() > 1, "expected multiple windows, got {}", windows.len());
        for f in &windows {
            assert!(f.line_count() <= MAX_LINES);
        }
        // Monotone spans with overlap
        for pair in windows.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[1].start_line < pair[0].end_line, "windows must overlap");
        }
    }

    #[test]
    fn test_tiny_top_level_never_alone() {
        let source = "const A: i32 = 1;\nconst B: i32 = 2;\nconst C: i32 = 3;\nconst D: i32 = 4;\n";
        let chunker = Chunker::new().unwrap();
        let frags = chunker.chunk_source(Path::new("/tmp/consts.rs"), source);
        for f in frags.iter().filter(|f| !f.is_anchor) {
            assert!(f.line_count() >= MIN_LINES, "{} lines in {}", f.line_count(), f.id);
        }
    }

    #[test]
    fn test_context_preamble_stripped_for_display() {
        let chunker = Chunker::new().unwrap();
        let frags = chunker.chunk_source(Path::new("/tmp/sample.rs"), RUST_SAMPLE);
        let method = frags
            .iter()
            .find(|f| f.kind == FragmentKind::Method)
            .expect("method fragment");
        assert!(method.context_len > 0, "nested fragment should carry context");
        assert!(method.text.len() > method.display_text().len());
        assert!(!method.display_text().contains("use std::fmt"));
    }
}
