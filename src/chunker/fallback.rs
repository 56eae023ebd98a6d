//! Line-window fallback splitter
//!
//! Used when the file type is unsupported or structural parsing fails.
//! Produces overlapping windows with the same bounds as structural slicing.

use std::path::Path;

use super::{Fragment, FragmentKind, MAX_LINES, OVERLAP_LINES};

/// Split a file into overlapping line windows with `kind = Fallback`.
pub(crate) fn split(path: &Path, source: &str, line_count: u32) -> Vec<Fragment> {
    if line_count == 0 {
        return vec![];
    }
    let lines: Vec<&str> = source.lines().collect();
    let step = (MAX_LINES - OVERLAP_LINES).max(1);

    let mut fragments = Vec::new();
    let mut start: u32 = 0;
    loop {
        let end = (start + MAX_LINES).min(line_count);
        let body = lines[start as usize..end as usize].join("\n");
        let hash = blake3::hash(body.as_bytes()).to_hex().to_string();
        let prefix = hash.get(..8).unwrap_or(&hash);
        fragments.push(Fragment {
            id: format!("{}:{}:{}", path.display(), start, prefix),
            path: path.to_path_buf(),
            kind: FragmentKind::Fallback,
            start_line: start,
            end_line: end,
            text: body,
            context_len: 0,
            is_anchor: false,
        });
        if end >= line_count {
            break;
        }
        start += step;
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_short_file_single_window() {
        let source = numbered(10);
        let frags = split(Path::new("/tmp/a.txt"), &source, 10);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].start_line, 0);
        assert_eq!(frags[0].end_line, 10);
        assert_eq!(frags[0].kind, FragmentKind::Fallback);
    }

    #[test]
    fn test_windows_overlap_and_cover() {
        let total = 400u32;
        let source = numbered(total as usize);
        let frags = split(Path::new("/tmp/a.txt"), &source, total);
        assert!(frags.len() > 1);

        assert_eq!(frags[0].start_line, 0);
        assert_eq!(frags.last().unwrap().end_line, total);
        for pair in frags.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].start_line + (MAX_LINES - OVERLAP_LINES));
            assert!(pair[1].start_line < pair[0].end_line);
        }
        for f in &frags {
            assert!(f.line_count() <= MAX_LINES);
        }
    }

    #[test]
    fn test_empty_yields_nothing() {
        assert!(split(Path::new("/tmp/a.txt"), "", 0).is_empty());
    }
}
