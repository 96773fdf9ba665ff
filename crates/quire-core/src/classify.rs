//! Block classification.
//!
//! Every block gets exactly one [`Role`] from a strict precedence chain:
//! caption override, content heuristic, language-tag default, fallback.

use serde::{Deserialize, Serialize};

use crate::config::{ClassifyPolicy, ConfigSyntax};
use crate::scan::CodeBlock;

/// What a fenced block is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A complete program or module that must compile.
    Runnable,
    /// A unit whose purpose is its tests.
    TestOnly,
    /// Terminal session or program output.
    Transcript,
    /// Configuration fragment.
    Config,
    /// Anything else, including partial snippets.
    Ignored,
}

impl Role {
    /// Roles that are materialized as units.
    pub fn is_extractable(self) -> bool {
        matches!(self, Role::Runnable | Role::TestOnly)
    }

    /// Parse a `role=` caption value.
    pub fn from_caption(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "runnable" | "run" => Some(Role::Runnable),
            "test" | "test_only" | "test-only" => Some(Role::TestOnly),
            "transcript" | "output" => Some(Role::Transcript),
            "config" => Some(Role::Config),
            "ignore" | "ignored" => Some(Role::Ignored),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Runnable => "runnable",
            Role::TestOnly => "test_only",
            Role::Transcript => "transcript",
            Role::Config => "config",
            Role::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule of the precedence chain decided the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Override,
    Heuristic,
    TagDefault,
    Fallback,
}

/// Role plus the content facts later stages need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub role: Role,
    pub source: RoleSource,
    /// The block contains a test idiom.
    pub test_idiom: bool,
    /// The block contains an entry point.
    pub entry_point: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// `role=` value not understood.
    UnknownRole,
    /// Target-language block that is not a complete unit.
    Snippet,
    /// No rule applied.
    Ambiguous,
}

/// Non-fatal classification finding, carrying the block location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationWarning {
    pub document: String,
    pub ordinal: usize,
    pub line: usize,
    pub kind: WarningKind,
    pub message: String,
}

impl std::fmt::Display for ClassificationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} (line {}): {}",
            self.document, self.ordinal, self.line, self.message
        )
    }
}

/// Applies a [`ClassifyPolicy`] to blocks.
pub struct Classifier<'a> {
    policy: &'a ClassifyPolicy,
    target_tag: &'a str,
}

impl<'a> Classifier<'a> {
    pub fn new(policy: &'a ClassifyPolicy, target_tag: &'a str) -> Self {
        Self { policy, target_tag }
    }

    /// Classify one block, appending any warnings.
    pub fn classify(
        &self,
        block: &CodeBlock,
        warnings: &mut Vec<ClassificationWarning>,
    ) -> Classification {
        let test_idiom = self.has_test_idiom(&block.text);
        let entry_point = self.has_entry_point(&block.text);
        let decided = |role, source| Classification {
            role,
            source,
            test_idiom,
            entry_point,
        };
        let mut warn = |kind, message: String| {
            warnings.push(ClassificationWarning {
                document: block.document.clone(),
                ordinal: block.ordinal,
                line: block.span.start_line,
                kind,
                message,
            })
        };

        if let Some(value) = block.attribute("role") {
            match Role::from_caption(value) {
                Some(role) => return decided(role, RoleSource::Override),
                None => warn(
                    WarningKind::UnknownRole,
                    format!("unknown role `{value}`, falling back to heuristics"),
                ),
            }
        }

        let tag = block.language.as_str();
        let untagged = tag.is_empty();
        let target = tag.eq_ignore_ascii_case(self.target_tag);

        if test_idiom && (target || untagged) {
            return decided(Role::TestOnly, RoleSource::Heuristic);
        }
        if untagged && self.looks_like_transcript(&block.text) {
            return decided(Role::Transcript, RoleSource::Heuristic);
        }
        if untagged && self.looks_like_config(&block.text) {
            return decided(Role::Config, RoleSource::Heuristic);
        }

        if target {
            if !self.policy.require_complete_unit || entry_point || self.has_import(&block.text) {
                return decided(Role::Runnable, RoleSource::TagDefault);
            }
            warn(
                WarningKind::Snippet,
                "snippet without import or entry point, not extracted".to_string(),
            );
            return decided(Role::Ignored, RoleSource::TagDefault);
        }
        if contains_tag(&self.policy.transcript_tags, tag) {
            return decided(Role::Transcript, RoleSource::TagDefault);
        }
        if contains_tag(&self.policy.config_tags, tag) {
            return decided(Role::Config, RoleSource::TagDefault);
        }

        let described = if untagged { "untagged".to_string() } else { format!("`{tag}`") };
        warn(
            WarningKind::Ambiguous,
            format!("{described} block matched no classification rule"),
        );
        decided(Role::Ignored, RoleSource::Fallback)
    }

    fn has_test_idiom(&self, text: &str) -> bool {
        text.lines().any(|line| {
            let line = line.trim_start();
            self.policy.test_markers.iter().any(|m| line.starts_with(m.as_str()))
        })
    }

    fn has_entry_point(&self, text: &str) -> bool {
        text.lines().any(|line| {
            let line = line.trim_start();
            !line.starts_with("//")
                && self.policy.entry_markers.iter().any(|m| line.contains(m.as_str()))
        })
    }

    fn has_import(&self, text: &str) -> bool {
        text.lines().any(|line| {
            let line = line.trim_start();
            !line.starts_with("//")
                && self.policy.import_markers.iter().any(|m| line.contains(m.as_str()))
        })
    }

    fn looks_like_config(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.policy.config_syntaxes.iter().any(|syntax| match syntax {
            ConfigSyntax::Toml => looks_like_toml(trimmed),
            ConfigSyntax::Json => {
                trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.contains("\":")
            }
            ConfigSyntax::Literal => {
                trimmed.ends_with('}')
                    && self
                        .policy
                        .literal_openers
                        .iter()
                        .any(|o| !o.is_empty() && trimmed.starts_with(o.as_str()))
            }
        })
    }

    fn looks_like_transcript(&self, text: &str) -> bool {
        text.lines()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|first| {
                let first = first.trim_start();
                self.policy
                    .prompt_prefixes
                    .iter()
                    .any(|p| first.starts_with(p.as_str()))
            })
    }
}

fn contains_tag(tags: &[String], tag: &str) -> bool {
    !tag.is_empty() && tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

fn looks_like_toml(text: &str) -> bool {
    let mut table = false;
    let mut assignment = false;
    for line in text.lines().map(str::trim) {
        if line.len() > 2 && line.starts_with('[') && line.ends_with(']') && !line.contains(' ') {
            table = true;
        } else if let Some((key, _)) = line.split_once(" = ") {
            assignment |= !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '"'));
        }
    }
    table && assignment
}
