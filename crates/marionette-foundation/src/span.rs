//! Source location tracking for diagnostics and catalog output.
//!
//! Every declaration that ends up in a catalog remembers where in the
//! manifests it came from. Deferred work (overrides, relationships,
//! collectors) is resolved long after the statement that recorded it was
//! evaluated, so spans are stored eagerly and carried through the whole
//! compile.
//!
//! - `Span` — compact byte range with cached line number
//! - `SourceMap` — all manifest files of one compile, with line indexing

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A byte range in a manifest file.
///
/// The starting line is cached so diagnostics and catalog output can
/// report it without consulting the [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Index of the file in the [`SourceMap`].
    pub file: u32,
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
    /// 1-based line number of `start`.
    pub line: u32,
}

impl Span {
    pub fn new(file: u32, start: u32, end: u32, line: u32) -> Self {
        Self {
            file,
            start,
            end,
            line,
        }
    }

    /// A zero-length span at the start of a file.
    pub fn zero(file: u32) -> Self {
        Self::new(file, 0, 0, 1)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// The smallest span covering both `self` and `other`.
    ///
    /// # Panics
    /// Panics if the spans belong to different files.
    pub fn merge(&self, other: &Span) -> Span {
        assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
        }
    }
}

/// All manifest files loaded for one compile.
///
/// Files are registered once and addressed by the `file` index stored in
/// each [`Span`]. The map never drops a file, so spans stay valid for the
/// lifetime of the compile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

/// A single manifest file with precomputed line starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
    /// Byte offset of each line start, with an EOF sentinel at the end.
    line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file and return its index for use in spans.
    pub fn add_file(&mut self, path: PathBuf, source: String) -> u32 {
        let file = self.files.len() as u32;
        self.files.push(SourceFile::new(path, source));
        file
    }

    pub fn file(&self, span: &Span) -> &SourceFile {
        &self.files[span.file as usize]
    }

    pub fn path(&self, span: &Span) -> &Path {
        &self.files[span.file as usize].path
    }

    /// The source text covered by a span.
    pub fn snippet(&self, span: &Span) -> &str {
        let file = &self.files[span.file as usize];
        &file.source[span.start as usize..span.end as usize]
    }

    /// 1-based (line, column) of a span's start.
    pub fn line_col(&self, span: &Span) -> (u32, u32) {
        self.files[span.file as usize].line_col(span.start)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl SourceFile {
    pub fn new(path: PathBuf, source: String) -> Self {
        let line_starts = line_starts(&source);
        Self {
            path,
            source,
            line_starts,
        }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        let line = (idx + 1) as u32;
        let col = offset - self.line_starts[idx] + 1;
        (line, col)
    }

    /// The text of a 1-based line, including its terminator.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 || line as usize >= self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[(line - 1) as usize] as usize;
        let end = self.line_starts[line as usize] as usize;
        Some(&self.source[start..end])
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }
}

fn line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            starts.push((idx + 1) as u32);
        }
    }
    if starts.last() != Some(&(source.len() as u32)) {
        starts.push(source.len() as u32);
    }
    starts
}
