//! Source location tracking for error reporting.
//!
//! # Design
//!
//! - `Span` — compact source location (file id + byte range + cached line)
//! - `SourceMap` — manages all source files and provides lookup operations
//! - `SourceFile` — single source file with line indexing
//!
//! Synthesized AST nodes (produced by the normalizer or the NN decoder) use
//! [`Span::SYNTH_FILE`] as their file id; such spans never resolve against a
//! `SourceMap`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Compact source location reference.
///
/// Points to a byte range in a source file with a cached line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Index into `SourceMap::files`, or [`Span::SYNTH_FILE`].
    pub file_id: u16,
    /// Byte offset of start position.
    pub start: u32,
    /// Byte offset of end position (exclusive).
    pub end: u32,
    /// Cached line number (1-based) for the start position.
    pub start_line: u16,
}

impl Span {
    /// File id marking spans of synthesized nodes.
    pub const SYNTH_FILE: u16 = u16::MAX;

    /// Create a new span.
    pub fn new(file_id: u16, start: u32, end: u32, start_line: u16) -> Self {
        Self {
            file_id,
            start,
            end,
            start_line,
        }
    }

    /// A span for nodes created by a rewrite rather than by parsing.
    pub fn synthesized() -> Self {
        Self::new(Self::SYNTH_FILE, 0, 0, 0)
    }

    /// True for spans produced by [`Span::synthesized`].
    pub fn is_synthesized(&self) -> bool {
        self.file_id == Self::SYNTH_FILE
    }

    /// Zero-length span at the start of a file.
    pub fn zero(file_id: u16) -> Self {
        Self::new(file_id, 0, 0, 1)
    }

    /// Merge two spans (returns span covering both).
    ///
    /// If either side is synthesized the other side wins.
    pub fn merge(&self, other: &Span) -> Span {
        if self.is_synthesized() {
            return *other;
        }
        if other.is_synthesized() {
            return *self;
        }
        debug_assert_eq!(self.file_id, other.file_id);
        Span {
            file_id: self.file_id,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            start_line: self.start_line.min(other.start_line),
        }
    }
}

/// Collection of all source files in a toolchain run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

/// A single source file with line indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path (or synthetic name such as `<input>`).
    pub path: PathBuf,
    /// Original source text.
    pub source: String,
    /// Byte offsets of each line start; last entry is the EOF sentinel.
    pub line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a source file and return its id.
    pub fn add_file(&mut self, path: PathBuf, source: String) -> u16 {
        let file_id = self.files.len();
        assert!(
            file_id < Span::SYNTH_FILE as usize,
            "too many source files"
        );
        self.files.push(SourceFile::new(path, source));
        file_id as u16
    }

    pub fn file(&self, span: &Span) -> Option<&SourceFile> {
        if span.is_synthesized() {
            return None;
        }
        self.files.get(span.file_id as usize)
    }

    pub fn file_path(&self, span: &Span) -> Option<&Path> {
        self.file(span).map(|f| f.path.as_path())
    }

    /// Source text covered by a span.
    pub fn snippet(&self, span: &Span) -> Option<&str> {
        let file = self.file(span)?;
        file.source.get(span.start as usize..span.end as usize)
    }

    /// (line, column) of the span start, both 1-based.
    pub fn line_col(&self, span: &Span) -> Option<(u32, u32)> {
        self.file(span).map(|f| f.line_col(span.start))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl SourceFile {
    pub fn new(path: PathBuf, source: String) -> Self {
        let line_starts = compute_line_starts(&source);
        Self {
            path,
            source,
            line_starts,
        }
    }

    /// (line, column) for a byte offset, both 1-based.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        let line = (line_idx + 1) as u32;
        let col = (offset - self.line_starts[line_idx]) + 1;
        (line, col)
    }

    /// Text of a specific line (1-based), including the trailing newline.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 || line as usize >= self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[(line - 1) as usize] as usize;
        let end = self.line_starts[line as usize] as usize;
        self.source.get(start..end)
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut line_starts = vec![0];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push((idx + 1) as u32);
        }
    }
    if line_starts.last() != Some(&(source.len() as u32)) {
        line_starts.push(source.len() as u32);
    }
    line_starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(0, 10, 20, 1);
        let b = Span::new(0, 15, 30, 1);
        let merged = a.merge(&b);
        assert_eq!(merged.start, 10);
        assert_eq!(merged.end, 30);
    }

    #[test]
    fn span_merge_ignores_synthesized() {
        let a = Span::new(0, 10, 20, 1);
        let s = Span::synthesized();
        assert_eq!(a.merge(&s), a);
        assert_eq!(s.merge(&a), a);
    }

    #[test]
    fn line_col_lookup() {
        let file = SourceFile::new(PathBuf::from("test.tt"), "hello\nworld\n".to_string());
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(6), (2, 1));
        assert_eq!(file.line_text(2), Some("world\n"));
        assert_eq!(file.line_text(3), None);
    }

    #[test]
    fn source_map_snippet() {
        let mut map = SourceMap::new();
        let id = map.add_file(
            PathBuf::from("test.tt"),
            "now => @com.xkcd.get_comic() => notify;".to_string(),
        );
        let span = Span::new(id, 7, 26, 1);
        assert_eq!(map.snippet(&span), Some("@com.xkcd.get_comic"));
        assert_eq!(map.line_col(&span), Some((1, 8)));
    }
}
