//! Context packing: bundle workspace files into a bounded system message

use std::path::Path;

use anyhow::Context;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

const DEFAULT_CONTEXT_MAX_BYTES: usize = 64 * 1024;
const DEFAULT_CONTEXT_MAX_FILES: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedFile {
    pub path: String,
    pub bytes: usize,
}

/// Files selected for an invocation, plus their rendered text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackedContext {
    pub files: Vec<PackedFile>,
    /// Sum of packed file contents in bytes
    pub total_bytes: usize,
    pub rendered: String,
}

impl PackedContext {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Greedy packer bounded by total bytes and file count
#[derive(Debug, Clone)]
pub struct ContextPacker {
    max_bytes: usize,
    max_files: usize,
}

impl Default for ContextPacker {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_MAX_BYTES, DEFAULT_CONTEXT_MAX_FILES)
    }
}

impl ContextPacker {
    pub fn new(max_bytes: usize, max_files: usize) -> Self {
        Self {
            max_bytes,
            max_files,
        }
    }

    /// Pack `(path, content)` pairs in order; entries that would exceed the
    /// byte budget are skipped, never truncated
    pub fn pack_entries<I, P, C>(&self, entries: I) -> PackedContext
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: AsRef<str>,
    {
        let mut packed = PackedContext::default();
        for (path, content) in entries {
            if packed.files.len() >= self.max_files {
                break;
            }
            let path = path.into();
            let content = content.as_ref();
            if packed.total_bytes + content.len() > self.max_bytes {
                tracing::debug!(path = %path, bytes = content.len(), "Context file over budget, skipped");
                continue;
            }

            packed.rendered.push_str(&format!(
                "[FILE - {}]\n\n{}\n\n[END FILE]\n\n",
                path, content
            ));
            packed.total_bytes += content.len();
            packed.files.push(PackedFile {
                path,
                bytes: content.len(),
            });
        }
        packed.rendered.truncate(packed.rendered.trim_end().len());
        packed
    }

    /// Walk `root` honoring ignore files and pack text files in path order
    pub fn pack_directory(&self, root: &Path) -> anyhow::Result<PackedContext> {
        let mut paths = Vec::new();
        for entry in WalkBuilder::new(root).build() {
            let entry = entry.with_context(|| format!("walk {}", root.display()))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let entries = paths.into_iter().filter_map(|path| {
            // Non-UTF-8 files are not packable
            let content = std::fs::read_to_string(&path).ok()?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            Some((relative, content))
        });
        Ok(self.pack_entries(entries))
    }
}
