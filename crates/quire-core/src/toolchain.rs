//! Toolchain versions and command templates.

use std::path::{Path, PathBuf};

use crate::config::QuireConfig;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::manifest::TargetKind;

/// Command templates per target kind, defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub executable: String,
    pub test: String,
    pub build_check: String,
}

impl Templates {
    pub fn for_kind(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::Executable => &self.executable,
            TargetKind::Test => &self.test,
            TargetKind::BuildCheck => &self.build_check,
        }
    }
}

/// One toolchain version of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainVersion {
    pub name: String,
    /// Binary as configured.
    pub bin: String,
    /// Binary as found on disk; set by [`ToolchainVersion::locate`].
    pub program: Option<PathBuf>,
    /// Failures gate the verdict.
    pub required: bool,
    pub templates: Templates,
}

impl ToolchainVersion {
    /// Find the binary. A missing binary is fatal for the whole run.
    pub fn locate(&mut self) -> Result<&Path> {
        let found = which::which(&self.bin).map_err(|_| {
            Error::Toolchain(format!(
                "binary `{}` for toolchain {} not found",
                self.bin, self.name
            ))
        })?;
        tracing::debug!("Toolchain {} -> {}", self.name, found.display());
        Ok(self.program.insert(found).as_path())
    }

    /// What `{bin}` expands to.
    pub fn program_str(&self) -> String {
        self.program
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.bin.clone())
    }
}

/// Build the toolchain list for a run.
///
/// Requested names keep their order; names without a `[[toolchains]]` entry
/// get the default binary and the dialect's templates. With no names, every
/// configured toolchain is used.
pub fn select_toolchains(
    config: &QuireConfig,
    requested: &[String],
    dialect: &dyn Dialect,
) -> Result<Vec<ToolchainVersion>> {
    let names: Vec<String> = if requested.is_empty() {
        config.toolchains.iter().map(|t| t.name.clone()).collect()
    } else {
        requested.to_vec()
    };
    if names.is_empty() {
        return Err(Error::Toolchain(
            "no toolchain versions given; pass --toolchains or add [[toolchains]] to quire.toml"
                .to_string(),
        ));
    }

    let default = |kind| dialect.default_template(kind).to_string();
    let mut selected: Vec<ToolchainVersion> = Vec::new();
    for name in names {
        if selected.iter().any(|t| t.name == name) {
            continue;
        }
        let configured = config.toolchains.iter().find(|t| t.name == name);
        let bin = configured
            .and_then(|t| t.bin.clone())
            .unwrap_or_else(|| config.validate.default_bin.replace("{version}", &name));
        let templates = configured.map(|t| &t.templates);
        let pick = |value: Option<&String>, kind| value.cloned().unwrap_or_else(|| default(kind));

        selected.push(ToolchainVersion {
            required: configured.is_none_or(|t| t.required),
            templates: Templates {
                executable: pick(
                    templates.and_then(|t| t.executable.as_ref()),
                    TargetKind::Executable,
                ),
                test: pick(templates.and_then(|t| t.test.as_ref()), TargetKind::Test),
                build_check: pick(
                    templates.and_then(|t| t.build_check.as_ref()),
                    TargetKind::BuildCheck,
                ),
            },
            name,
            bin,
            program: None,
        });
    }
    Ok(selected)
}

/// Values substituted into a command template.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub bin: &'a str,
    pub unit: &'a Path,
    pub name: &'a str,
    pub chapter_dir: &'a Path,
    pub scratch: &'a Path,
    pub version: &'a str,
    pub modules: &'a [String],
}

/// Split a template into words; `"` and `'` group words.
pub fn split_template(template: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Expand a template into argv. A word that is exactly `{modules}` becomes
/// one argument per module argument.
pub fn expand(template: &str, vars: &TemplateVars<'_>) -> Vec<String> {
    let mut argv = Vec::new();
    for word in split_template(template) {
        if word == "{modules}" {
            argv.extend(vars.modules.iter().cloned());
            continue;
        }
        let expanded = word
            .replace("{bin}", vars.bin)
            .replace("{unit}", &vars.unit.display().to_string())
            .replace("{name}", vars.name)
            .replace("{chapter_dir}", &vars.chapter_dir.display().to_string())
            .replace("{scratch}", &vars.scratch.display().to_string())
            .replace("{version}", vars.version)
            .replace("{modules}", &vars.modules.join(" "));
        argv.push(expanded);
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::ZigDialect;

    fn vars<'a>(modules: &'a [String]) -> TemplateVars<'a> {
        TemplateVars {
            bin: "/usr/bin/zig",
            unit: Path::new("/out/ch 1/001.zig"),
            name: "001",
            chapter_dir: Path::new("/out/ch 1"),
            scratch: Path::new("/out/.quire/scratch/0.15.2/ch 1/001"),
            version: "0.15.2",
            modules,
        }
    }

    #[test]
    fn test_split_template_quotes() {
        assert_eq!(
            split_template("sh -c 'echo {name} && exit 1'  \"a b\" ''"),
            vec!["sh", "-c", "echo {name} && exit 1", "a b", ""]
        );
    }

    #[test]
    fn test_expand_placeholders() {
        let modules = vec!["--dep".to_string(), "m".to_string(), "-Mroot=/x".to_string()];
        let argv = expand("{bin} test {modules} --cache-dir {scratch}", &vars(&modules));
        assert_eq!(
            argv,
            vec![
                "/usr/bin/zig",
                "test",
                "--dep",
                "m",
                "-Mroot=/x",
                "--cache-dir",
                "/out/.quire/scratch/0.15.2/ch 1/001"
            ]
        );

        let argv = expand("echo {version}:{name} {unit}", &vars(&[]));
        assert_eq!(argv, vec!["echo", "0.15.2:001", "/out/ch 1/001.zig"]);
    }

    #[test]
    fn test_select_defaults_and_configured() {
        let config = QuireConfig::parse(
            r#"
[[toolchains]]
name = "0.14.1"
bin = "true"
required = false
templates = { test = "{bin} check" }
"#,
        )
        .unwrap();
        let dialect = ZigDialect::new().unwrap();

        let selected = select_toolchains(
            &config,
            &["0.15.2".to_string(), "0.14.1".to_string(), "0.15.2".to_string()],
            &dialect,
        )
        .unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].bin, "zig-0.15.2");
        assert!(selected[0].required);
        assert_eq!(selected[0].templates.test, "{bin} test {modules}");
        assert_eq!(selected[1].bin, "true");
        assert!(!selected[1].required);
        assert_eq!(selected[1].templates.for_kind(TargetKind::Test), "{bin} check");
        assert_eq!(
            selected[1].templates.executable,
            dialect.default_template(TargetKind::Executable)
        );

        let all = select_toolchains(&config, &[], &dialect).unwrap();
        assert_eq!(all.len(), 1);

        let none = select_toolchains(&QuireConfig::default(), &[], &dialect);
        assert!(matches!(none, Err(Error::Toolchain(_))));
    }

    #[test]
    fn test_locate_missing_binary() {
        let mut toolchain = ToolchainVersion {
            name: "9.9.9".to_string(),
            bin: "quire-definitely-missing-binary".to_string(),
            program: None,
            required: true,
            templates: Templates {
                executable: String::new(),
                test: String::new(),
                build_check: String::new(),
            },
        };
        let err = toolchain.locate().unwrap_err();
        assert!(err.to_string().contains("quire-definitely-missing-binary"));
        assert_eq!(toolchain.program_str(), "quire-definitely-missing-binary");
    }
}
