//! Chunker integration tests over real files on disk.

mod common;

use common::write_file;
use osgrep::{Chunker, FragmentKind};
use tempfile::TempDir;

#[test]
fn test_chunk_file_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "sample.rs",
        "/// Entry point\nfn main() {\n    let app = build();\n    app.run();\n}\n",
    );

    let chunker = Chunker::new().unwrap();
    let fragments = chunker.chunk_file(&path).unwrap();
    assert!(fragments[0].is_anchor);
    assert!(fragments
        .iter()
        .any(|f| f.kind == FragmentKind::Function && f.display_text().contains("fn main")));
}

#[test]
fn test_non_utf8_file_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bin.rs");
    std::fs::write(&path, [0xffu8, 0xfe, 0x00, 0x80, 0x81]).unwrap();

    let chunker = Chunker::new().unwrap();
    assert!(chunker.chunk_file(&path).unwrap().is_empty());
}

#[test]
fn test_crlf_and_lf_chunk_identically() {
    let lf = "fn alpha() {\n    let x = 1;\n    let y = 2;\n}\n";
    let crlf = lf.replace('\n', "\r\n");
    let dir = TempDir::new().unwrap();
    let lf_path = write_file(dir.path(), "lf.rs", lf);
    let crlf_path = write_file(dir.path(), "crlf.rs", &crlf);

    let chunker = Chunker::new().unwrap();
    let a = chunker.chunk_file(&lf_path).unwrap();
    let b = chunker.chunk_file(&crlf_path).unwrap();

    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.text, y.text);
        assert_eq!(x.start_line, y.start_line);
        assert_eq!(x.end_line, y.end_line);
    }
}

#[cfg(feature = "lang-typescript")]
#[test]
fn test_typescript_structure() {
    let source = r#"import { request } from "./http";

export class ApiClient {
    private base: string;

    fetchUsers(): Promise<User[]> {
        const url = this.base + "/users";
        return request(url);
    }
}

export function helper(input: string): string {
    const trimmed = input.trim();
    return trimmed;
}
"#;
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "client.ts", source);

    let chunker = Chunker::new().unwrap();
    let fragments = chunker.chunk_file(&path).unwrap();

    let class = fragments
        .iter()
        .find(|f| f.display_text().contains("class ApiClient"))
        .expect("class fragment");
    assert_eq!(class.kind, FragmentKind::Class);

    let method = fragments
        .iter()
        .find(|f| f.display_text().starts_with("fetchUsers"))
        .expect("method fragment");
    assert_eq!(method.kind, FragmentKind::Method);

    let func = fragments
        .iter()
        .find(|f| f.display_text().contains("function helper"))
        .expect("function fragment");
    assert_eq!(func.kind, FragmentKind::Function);

    // Anchor carries the import line
    assert!(fragments[0].is_anchor);
    assert!(fragments[0].text.contains("import { request }"));
}

#[test]
fn test_anchor_precedes_and_is_unique() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "multi.py",
        "import os\n\n\ndef first(a):\n    out = a\n    return out\n\n\ndef second(b):\n    out = b\n    return out\n",
    );

    let chunker = Chunker::new().unwrap();
    let fragments = chunker.chunk_file(&path).unwrap();
    assert!(fragments[0].is_anchor);
    assert_eq!(fragments.iter().filter(|f| f.is_anchor).count(), 1);

    // Remaining fragments sorted by start line
    let starts: Vec<u32> = fragments[1..].iter().map(|f| f.start_line).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);
}
