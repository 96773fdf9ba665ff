//! Fenced code block scanner.

use std::collections::{BTreeMap, btree_map::Entry};
use std::fs;
use std::path::{Path, PathBuf};

use super::types::{CodeBlock, Document, ScanError, ScanOutcome, SourceSpan};
use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// Scans document corpora for fenced code blocks.
pub struct Scanner<'a> {
    config: &'a ScanConfig,
    fence_char: char,
    fence_len: usize,
}

/// A block that has been opened but not yet closed.
struct OpenFence<'s> {
    start: usize,
    run: usize,
    indent: usize,
    info: &'s str,
    lines: Vec<&'s str>,
}

impl<'a> Scanner<'a> {
    /// Create a scanner for the configured fence syntax.
    pub fn new(config: &'a ScanConfig) -> Self {
        let fence_char = config.fence.chars().next().unwrap_or('`');
        let fence_len = config.fence.chars().count().max(1);
        Self {
            config,
            fence_char,
            fence_len,
        }
    }

    /// Scan a corpus directory (recursively) or a single document.
    ///
    /// Structural problems are collected per document; only a missing or
    /// unreadable corpus root is an `Err`.
    pub fn scan_corpus(&self, root: &Path) -> Result<ScanOutcome> {
        let files = if root.is_file() {
            vec![root.to_path_buf()]
        } else if root.is_dir() {
            let mut files = Vec::new();
            self.collect_documents(root, &mut files)?;
            files
        } else {
            return Err(Error::file_io(
                "read corpus",
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
            ));
        };

        let mut by_id: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for file in files {
            by_id.entry(self.chapter_id(root, &file)).or_default().push(file);
        }

        let mut outcome = ScanOutcome::default();
        for (id, paths) in by_id {
            if paths.len() > 1 {
                for path in &paths {
                    outcome.errors.push(ScanError {
                        document: id.clone(),
                        path: path.clone(),
                        line: None,
                        message: format!(
                            "chapter id `{id}` is derived from {} documents",
                            paths.len()
                        ),
                    });
                }
                continue;
            }

            let path = &paths[0];
            let scanned = fs::read(path)
                .map_err(|e| format!("unreadable document: {e}"))
                .and_then(|bytes| {
                    String::from_utf8(bytes).map_err(|_| "document is not valid UTF-8".to_string())
                });

            match scanned {
                Ok(source) => match self.scan_str(&id, path, &source) {
                    Ok(document) => {
                        tracing::debug!("Scanned {} ({} blocks)", id, document.blocks.len());
                        outcome.documents.push(document);
                    }
                    Err(err) => {
                        tracing::warn!("Excluding {}: {}", id, err);
                        outcome.errors.push(err);
                    }
                },
                Err(message) => {
                    tracing::warn!("Excluding {}: {}", id, message);
                    outcome.errors.push(ScanError {
                        document: id,
                        path: path.clone(),
                        line: None,
                        message,
                    });
                }
            }
        }

        tracing::info!(
            "Scanned {} documents ({} excluded)",
            outcome.documents.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Scan one document's text.
    pub fn scan_str(
        &self,
        id: &str,
        path: &Path,
        source: &str,
    ) -> std::result::Result<Document, ScanError> {
        let lines: Vec<&str> = source.lines().collect();
        let mut blocks = Vec::new();
        let mut open: Option<OpenFence<'_>> = None;

        let structural = |line: usize, message: String| ScanError {
            document: id.to_string(),
            path: path.to_path_buf(),
            line: Some(line),
            message,
        };

        for (idx, &line) in lines.iter().enumerate() {
            let number = idx + 1;

            if let Some(mut fence) = open.take() {
                if self.is_closing_fence(line, fence.run) {
                    let block = self.finish_block(id, fence, number, &lines, blocks.len() + 1);
                    blocks.push(block);
                } else if self
                    .opening_fence(line)
                    .is_some_and(|(run, info)| run == fence.run && !info.is_empty())
                {
                    return Err(structural(
                        number,
                        format!(
                            "fence opened while the block opened at line {} is still open",
                            fence.start
                        ),
                    ));
                } else {
                    fence.lines.push(strip_indent(line, fence.indent));
                    open = Some(fence);
                }
            } else if let Some((run, info)) = self.opening_fence(line) {
                open = Some(OpenFence {
                    start: number,
                    run,
                    indent: line.len() - line.trim_start().len(),
                    info,
                    lines: Vec::new(),
                });
            }
        }

        if let Some(fence) = open {
            return Err(structural(
                fence.start,
                "unterminated fence at end of document".to_string(),
            ));
        }

        Ok(Document {
            id: id.to_string(),
            path: path.to_path_buf(),
            blocks,
        })
    }

    /// Derive the chapter id of a document.
    ///
    /// The path relative to the corpus root loses its extension and a
    /// trailing index-name component; remaining components join with `__`.
    pub fn chapter_id(&self, root: &Path, path: &Path) -> String {
        let relative = path
            .strip_prefix(root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty());

        let mut parts: Vec<String> = match relative {
            Some(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect(),
            None => vec![
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ],
        };

        if let Some(last) = parts.last_mut() {
            if let Some((stem, _)) = last.rsplit_once('.') {
                *last = stem.to_string();
            }
        }

        let is_index = parts.last().is_some_and(|last| self.is_index_name(last));
        if is_index && parts.len() > 1 {
            parts.pop();
        } else if is_index {
            let dir = if relative.is_some() { Some(root) } else { path.parent() };
            if let Some(name) = dir.and_then(Path::file_name) {
                parts[0] = name.to_string_lossy().into_owned();
            }
        }

        parts.join("__")
    }

    fn is_index_name(&self, stem: &str) -> bool {
        self.config
            .index_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(stem))
    }

    fn collect_documents(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| Error::file_io("read", dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                self.collect_documents(&path, out)?;
            } else if self.is_document(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    fn is_document(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| {
            let ext = ext.to_string_lossy();
            self.config
                .extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&ext))
        })
    }

    /// Parse an opening fence: the run length and the info string.
    fn opening_fence<'s>(&self, line: &'s str) -> Option<(usize, &'s str)> {
        let trimmed = line.trim_start();
        let run = trimmed.chars().take_while(|&c| c == self.fence_char).count();
        if run < self.fence_len {
            return None;
        }
        let rest = &trimmed[run * self.fence_char.len_utf8()..];
        // A backtick inside the info string means this is inline code.
        if self.fence_char == '`' && rest.contains('`') {
            return None;
        }
        Some((run, rest.trim()))
    }

    fn is_closing_fence(&self, line: &str, run: usize) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && trimmed.chars().all(|c| c == self.fence_char)
            && trimmed.chars().count() >= run
    }

    fn finish_block(
        &self,
        id: &str,
        fence: OpenFence<'_>,
        close_line: usize,
        lines: &[&str],
        ordinal: usize,
    ) -> CodeBlock {
        let (language, attributes) = parse_info(fence.info);
        let title = attributes
            .get("title")
            .filter(|t| !t.is_empty())
            .cloned()
            .or_else(|| self.find_title(lines, fence.start));

        CodeBlock {
            document: id.to_string(),
            ordinal,
            span: SourceSpan {
                start_line: fence.start,
                end_line: close_line,
            },
            language,
            attributes,
            text: fence.lines.join("\n"),
            title,
        }
    }

    /// Nearest `### Example N: Title` or `### Title` heading above a fence.
    fn find_title(&self, lines: &[&str], fence_line: usize) -> Option<String> {
        let end = fence_line.saturating_sub(1);
        let start = end.saturating_sub(self.config.title_lookback);
        lines[start..end]
            .iter()
            .rev()
            .take_while(|line| self.opening_fence(line).is_none() && !self.is_closing_fence(line, 1))
            .find_map(|line| heading_title(line))
    }
}

fn heading_title(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("### ")?.trim();
    if let Some(after) = rest.strip_prefix("Example ") {
        let (number, title) = after.split_once(':')?;
        let numbered = !number.trim().is_empty() && number.trim().chars().all(|c| c.is_ascii_digit());
        return (numbered && !title.trim().is_empty()).then(|| title.trim().to_string());
    }
    (!rest.is_empty()).then(|| rest.to_string())
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let removable = line
        .char_indices()
        .take(indent)
        .take_while(|(_, c)| c.is_whitespace())
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &line[removable..]
}

/// Split an info string into the language tag and `key=value` attributes.
///
/// Accepts `zig title="A title" role=test` as well as `zig {role=test, module=shapes}`.
fn parse_info(info: &str) -> (String, BTreeMap<String, String>) {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in info.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() || matches!(c, ',' | '{' | '}') => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let mut language = String::new();
    let mut attributes = BTreeMap::new();
    for (idx, token) in tokens.into_iter().enumerate() {
        match token.split_once('=') {
            Some((key, value)) => {
                if let Entry::Vacant(slot) = attributes.entry(key.trim().to_string()) {
                    slot.insert(value.trim().to_string());
                }
            }
            None if idx == 0 => language = token.to_ascii_lowercase(),
            None => {
                attributes.entry(token).or_insert_with(String::new);
            }
        }
    }
    (language, attributes)
}
