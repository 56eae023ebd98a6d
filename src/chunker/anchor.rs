//! Anchor fragment synthesis
//!
//! One anchor per file: a coarse whole-file locator built from the top
//! docblock, the import list, and the declared top-level names. Spans the
//! header region `[0, header_end)`.

use std::path::Path;

use super::{Fragment, FragmentKind};

/// Upper bound on the anchor's line span.
const MAX_HEADER_LINES: u32 = 40;

/// Build the anchor fragment, or `None` for an empty file.
pub(crate) fn build(
    path: &Path,
    source: &str,
    line_count: u32,
    imports: &[String],
    names: &[String],
) -> Option<Fragment> {
    if line_count == 0 {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    let doc = top_doc_block(&lines);
    let header_end = header_end(&lines).min(MAX_HEADER_LINES).min(line_count).max(1);

    let mut text = String::new();
    for line in &doc {
        text.push_str(line);
        text.push('\n');
    }
    for import in imports {
        text.push_str(import);
        text.push('\n');
    }
    if !names.is_empty() {
        text.push_str("Declares: ");
        text.push_str(&names.join(", "));
        text.push('\n');
    }
    if text.is_empty() {
        // Nothing recognizable in the header: fall back to the literal head
        for line in lines.iter().take(header_end as usize) {
            text.push_str(line);
            text.push('\n');
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let text = format!("File {}\n{}", file_name, text);

    let hash = blake3::hash(text.as_bytes()).to_hex().to_string();
    let prefix = hash.get(..8).unwrap_or(&hash);

    Some(Fragment {
        id: format!("{}:anchor:{}", path.display(), prefix),
        path: path.to_path_buf(),
        kind: FragmentKind::Anchor,
        start_line: 0,
        end_line: header_end,
        text,
        context_len: 0,
        is_anchor: true,
    })
}

/// Leading comment block of the file (consecutive comment-looking lines).
pub(crate) fn top_doc_block(lines: &[&str]) -> Vec<String> {
    let mut doc = Vec::new();
    for line in lines.iter().take(12) {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
            || trimmed.starts_with("\"\"\"")
        {
            doc.push(trimmed.to_string());
        } else if trimmed.is_empty() && !doc.is_empty() {
            break;
        } else if !trimmed.is_empty() {
            break;
        }
    }
    doc
}

/// End of the header region: past leading comments, blanks, and import-ish
/// lines, at least one line.
fn header_end(lines: &[&str]) -> u32 {
    let mut end = 0u32;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let header_like = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
            || trimmed.starts_with("use ")
            || trimmed.starts_with("import ")
            || trimmed.starts_with("from ")
            || trimmed.starts_with("package ")
            || trimmed.starts_with("extern ")
            || trimmed.starts_with("mod ")
            || trimmed.starts_with("pub mod ")
            || trimmed.starts_with("const ")
            || trimmed.starts_with("require(");
        if header_like {
            end = i as u32 + 1;
        } else {
            break;
        }
    }
    end.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_spans_header() {
        let source = "//! Module docs\n\nuse std::io;\nuse std::fmt;\n\nfn main() {\n    body();\n}\n";
        let lines: Vec<&str> = source.lines().collect();
        let anchor = build(
            Path::new("/tmp/main.rs"),
            source,
            lines.len() as u32,
            &["use std::io;".into(), "use std::fmt;".into()],
            &["main".into()],
        )
        .unwrap();

        assert!(anchor.is_anchor);
        assert_eq!(anchor.kind, FragmentKind::Anchor);
        assert_eq!(anchor.start_line, 0);
        assert!(anchor.end_line >= 4 && anchor.end_line <= lines.len() as u32);
        assert!(anchor.text.contains("Module docs"));
        assert!(anchor.text.contains("Declares: main"));
    }

    #[test]
    fn test_anchor_none_for_empty() {
        assert!(build(Path::new("/tmp/e.rs"), "", 0, &[], &[]).is_none());
    }

    #[test]
    fn test_anchor_for_headerless_file() {
        let source = "x = 1\ny = 2\n";
        let anchor = build(Path::new("/tmp/data.py"), source, 2, &[], &[]).unwrap();
        assert_eq!(anchor.start_line, 0);
        assert!(anchor.end_line >= 1);
        assert!(anchor.text.contains("data.py"));
    }

    #[test]
    fn test_top_doc_block_stops_at_code() {
        let lines = vec!["// a", "// b", "fn main() {}", "// not header"];
        let doc = top_doc_block(&lines);
        assert_eq!(doc, vec!["// a".to_string(), "// b".to_string()]);
    }
}
