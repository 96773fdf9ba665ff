//! Per-chapter overview of extracted units (`<out>/<chapter>/README.md`).

use std::fmt::Write;

use super::index::{ChapterIndex, EntryKind};

/// File name of the chapter overview.
pub const README_FILE: &str = "README.md";

/// Render the overview table for one chapter.
pub fn chapter_readme(chapter: &str, entry: &ChapterIndex) -> String {
    let mut out = format!("# {chapter} - Examples\n\n");
    let _ = writeln!(
        out,
        "Extracted from `{}`. Generated by `quire extract`; edits are overwritten.\n",
        entry.document.display()
    );

    if entry.units.is_empty() {
        out.push_str("No runnable examples.\n");
        return out;
    }

    out.push_str("| File | Title | Role | Entry | Lines | Source |\n");
    out.push_str("|------|-------|------|-------|-------|--------|\n");
    for unit in &entry.units {
        let title = unit.title.as_deref().map(escape_cell).unwrap_or_else(|| "(untitled)".to_string());
        let entry_kind = match unit.entry {
            EntryKind::Executable => "executable",
            EntryKind::Test => "test",
            EntryKind::Library => "library",
        };
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} | Lines {}-{} |",
            unit.file_name(),
            title,
            unit.role,
            entry_kind,
            unit.text.lines().count(),
            unit.content_start(),
            unit.span.end_line.saturating_sub(1).max(unit.content_start()),
        );
    }
    out
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Role;
    use crate::extract::ExtractedUnit;
    use crate::scan::SourceSpan;

    fn unit(sequence: usize, title: Option<&str>, entry: EntryKind, text: &str) -> ExtractedUnit {
        ExtractedUnit {
            id: format!("03_lists/{sequence:03}"),
            chapter: "03_lists".to_string(),
            sequence,
            path: format!("03_lists/{sequence:03}.zig"),
            document: "03_lists/content.md".into(),
            span: SourceSpan {
                start_line: 5,
                end_line: 5 + text.lines().count() + 1,
            },
            role: Role::Runnable,
            entry,
            title: title.map(str::to_string),
            module: None,
            hash: String::new(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_readme_lists_units() {
        let entry = ChapterIndex {
            document: "03_lists/content.md".into(),
            units: vec![
                unit(1, Some("Appending | growing"), EntryKind::Executable, "a\nb\nc\n"),
                unit(4, None, EntryKind::Library, "x\n"),
            ],
        };
        let readme = chapter_readme("03_lists", &entry);

        assert!(readme.starts_with("# 03_lists - Examples\n"));
        assert!(readme.contains("`03_lists/content.md`"));
        assert!(readme.contains("| `001.zig` | Appending \\| growing | runnable | executable | 3 | Lines 6-8 |"));
        assert!(readme.contains("| `004.zig` | (untitled) | runnable | library | 1 | Lines 6-6 |"));
    }

    #[test]
    fn test_readme_for_empty_chapter() {
        let entry = ChapterIndex::default();
        let readme = chapter_readme("09_empty", &entry);
        assert!(readme.contains("No runnable examples."));
        assert!(!readme.contains("| File |"));
    }
}
