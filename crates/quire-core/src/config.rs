//! Pipeline configuration.
//!
//! Configuration lives in `quire.toml`. Lookup order: an explicit `--config`
//! path, then `quire.toml` in each candidate directory (corpus, then output
//! directory), then built-in defaults. CLI flags override file values.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "quire.toml";

/// Top-level configuration, deserialized from `quire.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuireConfig {
    /// Document scanning.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Target language of the book's examples.
    #[serde(default)]
    pub language: LanguageConfig,

    /// Block classification policy.
    #[serde(default)]
    pub classify: ClassifyPolicy,

    /// Matrix run defaults.
    #[serde(default)]
    pub validate: ValidateConfig,

    /// Configured toolchain versions.
    #[serde(default)]
    pub toolchains: Vec<ToolchainConfig>,

    /// Per-chapter overrides, keyed by chapter id.
    #[serde(default)]
    pub chapters: BTreeMap<String, ChapterConfig>,
}

/// `[scan]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Fence marker; a run of one repeated character.
    #[serde(default = "default_fence")]
    pub fence: String,

    /// File extensions treated as documents.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// File stems that stand for their parent directory in chapter ids.
    #[serde(default = "default_index_names")]
    pub index_names: Vec<String>,

    /// How many lines above a fence to search for a title heading.
    #[serde(default = "default_title_lookback")]
    pub title_lookback: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fence: default_fence(),
            extensions: default_extensions(),
            index_names: default_index_names(),
            title_lookback: default_title_lookback(),
        }
    }
}

fn default_fence() -> String {
    "```".into()
}
fn default_extensions() -> Vec<String> {
    vec!["md".into(), "markdown".into()]
}
fn default_index_names() -> Vec<String> {
    vec!["content".into(), "index".into(), "README".into()]
}
fn default_title_lookback() -> usize {
    10
}

/// `[language]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Dialect used for import scanning, stubs and command expansion.
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Fence language tag of extractable blocks.
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Extension of extracted unit files.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Module names provided by the toolchain itself.
    #[serde(default = "default_stdlib")]
    pub stdlib: Vec<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            tag: default_tag(),
            extension: default_extension(),
            stdlib: default_stdlib(),
        }
    }
}

fn default_dialect() -> String {
    "zig".into()
}
fn default_tag() -> String {
    "zig".into()
}
fn default_extension() -> String {
    "zig".into()
}
fn default_stdlib() -> Vec<String> {
    vec!["std".into(), "builtin".into(), "root".into()]
}

/// `[classify]` section: the heuristic policy behind block roles.
///
/// Precedence is fixed: caption override, then content heuristics, then the
/// language-tag default, then `Ignored`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyPolicy {
    /// Substrings marking a test idiom.
    #[serde(default = "default_test_markers")]
    pub test_markers: Vec<String>,

    /// Substrings marking an executable entry point.
    #[serde(default = "default_entry_markers")]
    pub entry_markers: Vec<String>,

    /// Substrings marking an import; a target-language block needs one (or an
    /// entry point) to count as a complete unit.
    #[serde(default = "default_import_markers")]
    pub import_markers: Vec<String>,

    /// Shell prompt prefixes identifying transcripts in untagged blocks.
    #[serde(default = "default_prompt_prefixes")]
    pub prompt_prefixes: Vec<String>,

    /// Language tags that default to `Transcript`.
    #[serde(default = "default_transcript_tags")]
    pub transcript_tags: Vec<String>,

    /// Language tags that default to `Config`.
    #[serde(default = "default_config_tags")]
    pub config_tags: Vec<String>,

    /// Config syntaxes recognized in untagged blocks.
    #[serde(default = "default_config_syntaxes")]
    pub config_syntaxes: Vec<ConfigSyntax>,

    /// Openers of `literal` config blocks; the block must end with `}`.
    #[serde(default = "default_literal_openers")]
    pub literal_openers: Vec<String>,

    /// Treat target-language blocks without import or entry point as snippets.
    #[serde(default = "default_true")]
    pub require_complete_unit: bool,
}

/// Shape of an untagged config block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSyntax {
    /// A `[table]` header plus a `key = value` line.
    Toml,
    /// A `{ "key": ... }` object.
    Json,
    /// An object literal starting with one of `literal_openers`.
    Literal,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            test_markers: default_test_markers(),
            entry_markers: default_entry_markers(),
            import_markers: default_import_markers(),
            prompt_prefixes: default_prompt_prefixes(),
            transcript_tags: default_transcript_tags(),
            config_tags: default_config_tags(),
            config_syntaxes: default_config_syntaxes(),
            literal_openers: default_literal_openers(),
            require_complete_unit: true,
        }
    }
}

fn default_test_markers() -> Vec<String> {
    vec!["test \"".into(), "test {".into()]
}
fn default_entry_markers() -> Vec<String> {
    vec!["pub fn main(".into()]
}
fn default_import_markers() -> Vec<String> {
    vec!["@import(".into()]
}
fn default_prompt_prefixes() -> Vec<String> {
    vec!["$ ".into(), "% ".into(), "> ".into(), "# ".into()]
}
fn default_transcript_tags() -> Vec<String> {
    ["sh", "bash", "console", "shell", "shell-session", "text", "txt", "output", "terminal"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_config_tags() -> Vec<String> {
    ["toml", "json", "yaml", "yml", "zon", "ini"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_config_syntaxes() -> Vec<ConfigSyntax> {
    vec![ConfigSyntax::Toml, ConfigSyntax::Json, ConfigSyntax::Literal]
}
fn default_literal_openers() -> Vec<String> {
    vec![".{".into()]
}
fn default_true() -> bool {
    true
}

/// `[validate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Worker pool size; `None` means available parallelism.
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Wall-clock timeout per invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts granted to a timed-out invocation.
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,

    /// How long a killed subprocess may take to be reaped.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Binary for toolchains named on the command line but not configured.
    /// `{version}` is replaced by the toolchain name.
    #[serde(default = "default_bin")]
    pub default_bin: String,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            timeout_secs: default_timeout_secs(),
            timeout_retries: default_timeout_retries(),
            grace_ms: default_grace_ms(),
            default_bin: default_bin(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_timeout_retries() -> u32 {
    1
}
fn default_grace_ms() -> u64 {
    5000
}
fn default_bin() -> String {
    "zig-{version}".into()
}

/// One `[[toolchains]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Version name, as passed to `--toolchains`.
    pub name: String,

    /// Binary to invoke; defaults to `[validate] default_bin`.
    #[serde(default)]
    pub bin: Option<String>,

    /// Whether failures under this version gate the verdict.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Command templates; missing entries use the dialect defaults.
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Per-target-kind command templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub build_check: Option<String>,
}

/// `[chapters.<id>]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterConfig {
    /// Toolchain versions whose failures do not gate this chapter.
    #[serde(default)]
    pub advisory: Vec<String>,
}

impl QuireConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::file_io("read", path, e))?;
        Self::parse(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: QuireConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for a command.
    ///
    /// `explicit` wins; otherwise the first `quire.toml` found in
    /// `candidates` is used; otherwise defaults.
    pub fn discover(explicit: Option<&Path>, candidates: &[&Path]) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!("Loading config from {}", path.display());
            return Self::load(path);
        }

        for dir in candidates {
            let path = if dir.is_file() {
                dir.parent().map(|p| p.join(CONFIG_FILE_NAME))
            } else {
                Some(dir.join(CONFIG_FILE_NAME))
            };
            if let Some(path) = path.filter(|p| p.is_file()) {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }

    /// Advisory toolchain versions for a chapter.
    pub fn advisory_for(&self, chapter: &str) -> Vec<String> {
        self.chapters
            .get(chapter)
            .map(|c| c.advisory.clone())
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        let mut chars = self.scan.fence.chars();
        let Some(first) = chars.next() else {
            return Err(Error::Config("[scan] fence must not be empty".into()));
        };
        if chars.any(|c| c != first) || first.is_alphanumeric() || first.is_whitespace() {
            return Err(Error::Config(format!(
                "[scan] fence must repeat one punctuation character, got {:?}",
                self.scan.fence
            )));
        }
        if self.language.tag.trim().is_empty() || self.language.extension.trim().is_empty() {
            return Err(Error::Config(
                "[language] tag and extension must not be empty".into(),
            ));
        }
        if self.validate.parallelism == Some(0) {
            return Err(Error::Config("[validate] parallelism must be at least 1".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for toolchain in &self.toolchains {
            if !seen.insert(toolchain.name.as_str()) {
                return Err(Error::Config(format!(
                    "toolchain {} is configured twice",
                    toolchain.name
                )));
            }
        }
        Ok(())
    }
}
