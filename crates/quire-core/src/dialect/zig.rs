//! Zig dialect.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use regex::Regex;

use super::{
    Dialect, ImportRef, MemberUse, ModuleArg, RawDiagnostic, ReturnUse, Severity, SymbolShape,
};
use crate::error::Result;
use crate::manifest::{ChapterManifest, TargetKind};
use crate::stubs::STUB_MARKER;

/// Zig: `@import("name")` imports, `zig` toolchain commands, `build.zig`.
pub struct ZigDialect {
    import_re: Regex,
    binding_re: Regex,
    direct_re: Regex,
    diagnostic_re: Regex,
}

impl ZigDialect {
    pub fn new() -> Result<Self> {
        Ok(Self {
            import_re: Regex::new(r#"@import\(\s*"([^"]+)"\s*\)"#)?,
            binding_re: Regex::new(
                r#"\bconst\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*@import\(\s*"([^"]+)"\s*\)\s*;"#,
            )?,
            direct_re: Regex::new(r#"@import\(\s*"([^"]+)"\s*\)\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)"#)?,
            diagnostic_re: Regex::new(r"(?m)^(.+?):(\d+):(\d+): (error|note): (.*)$")?,
        })
    }
}

impl Dialect for ZigDialect {
    fn name(&self) -> &'static str {
        "zig"
    }

    fn scan_imports(&self, source: &str) -> Vec<ImportRef> {
        let code = mask(source, false);
        let bare = mask(source, true);
        let bytes = bare.as_bytes();
        let mut imports: Vec<ImportRef> = Vec::new();

        for cap in self.import_re.captures_iter(&code) {
            let (Some(whole), Some(module)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            if !imports.iter().any(|i| i.module == module.as_str()) {
                imports.push(ImportRef {
                    module: module.as_str().to_string(),
                    line: line_of(bytes, whole.start()),
                    members: Vec::new(),
                });
            }
        }

        let mut uses: Vec<(String, MemberUse)> = Vec::new();

        for cap in self.direct_re.captures_iter(&code) {
            let (Some(whole), Some(module), Some(name)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            uses.push((
                module.as_str().to_string(),
                MemberUse {
                    name: name.as_str().to_string(),
                    shape: shape_at(bytes, whole.start(), name.as_str(), name.end()),
                    line: line_of(bytes, whole.start()),
                },
            ));
        }

        for cap in self.binding_re.captures_iter(&code) {
            let (Some(alias), Some(module)) = (cap.get(1), cap.get(2)) else {
                continue;
            };
            for (start, name, end) in alias_members(bytes, alias.as_str()) {
                uses.push((
                    module.as_str().to_string(),
                    MemberUse {
                        shape: shape_at(bytes, start, name, end),
                        name: name.to_string(),
                        line: line_of(bytes, start),
                    },
                ));
            }
        }

        uses.sort_by_key(|(_, u)| u.line);
        for (module, member) in uses {
            if let Some(import) = imports.iter_mut().find(|i| i.module == module) {
                let seen = import
                    .members
                    .iter()
                    .any(|m| m.name == member.name && m.shape == member.shape);
                if !seen {
                    import.members.push(member);
                }
            }
        }

        imports
    }

    fn is_file_import(&self, module: &str) -> bool {
        module.ends_with(".zig") || module.contains('/')
    }

    fn render_stub(&self, module: &str, surface: &BTreeMap<String, SymbolShape>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "// {STUB_MARKER}: placeholder for module `{module}`");
        let _ = writeln!(out, "// Regenerated by `quire resolve`; edits are overwritten.");
        out.push('\n');

        for (name, shape) in surface {
            match shape {
                SymbolShape::Function {
                    arity,
                    returns,
                    fallible,
                } => {
                    let params = vec!["_: anytype"; *arity].join(", ");
                    let ret = match (returns, fallible) {
                        (ReturnUse::Discarded, false) => "void {}".to_string(),
                        (ReturnUse::Discarded, true) => "anyerror!void {}".to_string(),
                        (ReturnUse::Value, false) => "i64 {\n    return 0;\n}".to_string(),
                        (ReturnUse::Value, true) => "anyerror!i64 {\n    return 0;\n}".to_string(),
                    };
                    let _ = writeln!(out, "pub fn {name}({params}) {ret}");
                }
                SymbolShape::Constant => {
                    let _ = writeln!(out, "pub const {name} = 0;");
                }
                SymbolShape::Type => {
                    let _ = writeln!(out, "pub const {name} = struct {{}};");
                }
            }
        }
        out
    }

    fn default_template(&self, kind: TargetKind) -> &'static str {
        match kind {
            TargetKind::Executable => "{bin} run {modules}",
            TargetKind::Test => "{bin} test {modules}",
            TargetKind::BuildCheck => "{bin} build-obj -fno-emit-bin {modules}",
        }
    }

    fn module_args(&self, root: &Path, root_deps: &[String], modules: &[ModuleArg]) -> Vec<String> {
        if root_deps.is_empty() && modules.is_empty() {
            return vec![root.display().to_string()];
        }

        let mut args = Vec::new();
        for dep in root_deps {
            args.push("--dep".to_string());
            args.push(dep.clone());
        }
        args.push(format!("-Mroot={}", root.display()));
        for module in modules {
            for dep in &module.deps {
                args.push("--dep".to_string());
                args.push(dep.clone());
            }
            args.push(format!("-M{}={}", module.name, module.path.display()));
        }
        args
    }

    fn parse_diagnostics(&self, output: &str) -> Vec<RawDiagnostic> {
        self.diagnostic_re
            .captures_iter(output)
            .filter_map(|cap| {
                Some(RawDiagnostic {
                    file: cap.get(1)?.as_str().to_string(),
                    line: cap.get(2)?.as_str().parse().ok()?,
                    column: cap.get(3)?.as_str().parse().ok()?,
                    severity: match cap.get(4)?.as_str() {
                        "error" => Severity::Error,
                        _ => Severity::Note,
                    },
                    message: cap.get(5)?.as_str().trim_end().to_string(),
                })
            })
            .collect()
    }

    fn build_script(&self, manifest: &ChapterManifest) -> Option<(&'static str, String)> {
        if manifest.units.is_empty() {
            return None;
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "// Generated by `quire validate` for chapter `{}`; edits are overwritten.",
            manifest.chapter
        );
        out.push_str("const std = @import(\"std\");\n\n");
        out.push_str("pub fn build(b: *std.Build) void {\n");
        out.push_str("    const target = b.standardTargetOptions(.{});\n");
        out.push_str("    const optimize = b.standardOptimizeOption(.{});\n");

        for module in &manifest.modules {
            let _ = write!(
                out,
                "\n    const {} = b.createModule(.{{\n        .root_source_file = b.path(\"{}\"),\n        .target = target,\n        .optimize = optimize,\n    }});\n",
                module_ident(&module.name),
                module.path
            );
        }
        for module in &manifest.modules {
            for dep in &module.deps {
                let _ = writeln!(
                    out,
                    "    {}.addImport(\"{dep}\", {});",
                    module_ident(&module.name),
                    module_ident(dep)
                );
            }
        }

        for unit in &manifest.units {
            let stem = unit.file.trim_end_matches(".zig");
            let ident = format!("unit_{}", ident_fragment(stem));
            out.push('\n');
            let _ = writeln!(out, "    // {}", unit.id);

            let root = match &unit.module {
                Some(module) => module_ident(module),
                None => {
                    let _ = write!(
                        out,
                        "    const {ident} = b.createModule(.{{\n        .root_source_file = b.path(\"{}\"),\n        .target = target,\n        .optimize = optimize,\n    }});\n",
                        unit.file
                    );
                    for import in unit.imports.iter().filter(|i| !i.source.is_std()) {
                        let _ = writeln!(
                            out,
                            "    {ident}.addImport(\"{}\", {});",
                            import.module,
                            module_ident(&import.module)
                        );
                    }
                    ident.clone()
                }
            };

            match unit.target {
                TargetKind::Executable => {
                    let _ = writeln!(
                        out,
                        "    const exe_{s} = b.addExecutable(.{{ .name = \"{stem}\", .root_module = {root} }});",
                        s = ident_fragment(stem)
                    );
                    let _ = writeln!(
                        out,
                        "    const run_{s} = b.addRunArtifact(exe_{s});",
                        s = ident_fragment(stem)
                    );
                    let _ = writeln!(
                        out,
                        "    b.step(\"run-{stem}\", \"Run {}\").dependOn(&run_{}.step);",
                        unit.file,
                        ident_fragment(stem)
                    );
                }
                TargetKind::Test => {
                    let _ = writeln!(
                        out,
                        "    const test_{s} = b.addTest(.{{ .root_module = {root} }});",
                        s = ident_fragment(stem)
                    );
                    let _ = writeln!(
                        out,
                        "    const run_test_{s} = b.addRunArtifact(test_{s});",
                        s = ident_fragment(stem)
                    );
                    let _ = writeln!(
                        out,
                        "    b.step(\"test-{stem}\", \"Test {}\").dependOn(&run_test_{}.step);",
                        unit.file,
                        ident_fragment(stem)
                    );
                }
                TargetKind::BuildCheck => {
                    let _ = writeln!(
                        out,
                        "    const obj_{s} = b.addObject(.{{ .name = \"{stem}\", .root_module = {root} }});",
                        s = ident_fragment(stem)
                    );
                    let _ = writeln!(
                        out,
                        "    b.step(\"check-{stem}\", \"Check {}\").dependOn(&obj_{}.step);",
                        unit.file,
                        ident_fragment(stem)
                    );
                }
            }
        }

        out.push_str("}\n");
        Some(("build.zig", out))
    }
}

fn module_ident(name: &str) -> String {
    format!("mod_{}", ident_fragment(name))
}

fn ident_fragment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Blank out comments and multiline string lines (and, with `strings`, the
/// contents of string and character literals). Byte offsets are preserved.
fn mask(source: &str, strings: bool) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        Str(u8),
    }

    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Code => {
                let next = bytes.get(i + 1).copied();
                if (b == b'/' && next == Some(b'/')) || (b == b'\\' && next == Some(b'\\')) {
                    state = State::LineComment;
                    out[i] = b' ';
                } else if b == b'"' || b == b'\'' {
                    state = State::Str(b);
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                } else {
                    out[i] = b' ';
                }
            }
            State::Str(quote) => {
                if b == b'\n' {
                    state = State::Code;
                } else if b == quote {
                    state = State::Code;
                } else if b == b'\\' && bytes.get(i + 1).is_some_and(|&n| n != b'\n') {
                    if strings {
                        out[i] = b' ';
                        out[i + 1] = b' ';
                    }
                    i += 2;
                    continue;
                } else if strings {
                    out[i] = b' ';
                }
            }
        }
        i += 1;
    }

    // Only whole multibyte sequences are replaced, so this stays valid UTF-8.
    String::from_utf8_lossy(&out).into_owned()
}

fn line_of(bytes: &[u8], offset: usize) -> usize {
    bytes[..offset.min(bytes.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Every `alias.member` occurrence: (start of alias, member name, end of member).
fn alias_members<'s>(bytes: &'s [u8], alias: &str) -> Vec<(usize, &'s str, usize)> {
    let needle = alias.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i + needle.len() < bytes.len() {
        if &bytes[i..i + needle.len()] != needle {
            i += 1;
            continue;
        }
        let before_ok = i == 0 || {
            let prev = bytes[i - 1];
            !is_ident_byte(prev) && prev != b'.' && prev != b'@'
        };
        let dot = i + needle.len();
        let name_start = dot + 1;
        if before_ok
            && bytes[dot] == b'.'
            && bytes
                .get(name_start)
                .is_some_and(|&b| b.is_ascii_alphabetic() || b == b'_')
        {
            let name_end = bytes[name_start..]
                .iter()
                .position(|&b| !is_ident_byte(b))
                .map_or(bytes.len(), |p| name_start + p);
            if let Ok(name) = std::str::from_utf8(&bytes[name_start..name_end]) {
                found.push((i, name, name_end));
            }
            i = name_end;
        } else {
            i += 1;
        }
    }
    found
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        i += 1;
    }
    i
}

/// Argument count of the call whose `(` is at `open`, and the index of its `)`.
fn count_args(bytes: &[u8], open: usize) -> (usize, usize) {
    let mut depth = 0usize;
    let mut args = 0;
    let mut pending = false;

    for (j, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' | b'[' | b'{' => {
                if depth >= 1 {
                    pending = true;
                }
                depth += 1;
            }
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if pending {
                        args += 1;
                    }
                    return (args, j);
                }
                pending = true;
            }
            b',' if depth == 1 => {
                if pending {
                    args += 1;
                }
                pending = false;
            }
            b if !b.is_ascii_whitespace() => pending = true,
            _ => {}
        }
    }
    (args, bytes.len())
}

/// Text between the previous statement boundary and `start`, trimmed.
fn statement_prefix(bytes: &[u8], start: usize) -> &str {
    let from = bytes[..start]
        .iter()
        .rposition(|&b| matches!(b, b'\n' | b';' | b'{' | b'}'))
        .map_or(0, |p| p + 1);
    std::str::from_utf8(&bytes[from..start]).unwrap_or("").trim()
}

fn shape_at(bytes: &[u8], start: usize, name: &str, end: usize) -> SymbolShape {
    let open = skip_ws(bytes, end);
    if bytes.get(open) != Some(&b'(') {
        return if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            SymbolShape::Type
        } else {
            SymbolShape::Constant
        };
    }

    let (arity, close) = count_args(bytes, open);
    let after = skip_ws(bytes, close + 1);
    let rest = bytes.get(after..).unwrap_or(&[]);
    let catches = rest.starts_with(b"catch") && !rest.get(5).is_some_and(|&b| is_ident_byte(b));
    let terminated = rest.first() == Some(&b';') || catches;

    let prefix = statement_prefix(bytes, start);
    let last_word = prefix
        .rsplit(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("");
    let tried = last_word == "try";
    let statement = matches!(
        prefix,
        "" | "try" | "defer" | "errdefer" | "defer try" | "errdefer try"
    );

    SymbolShape::Function {
        arity,
        returns: if statement && terminated {
            ReturnUse::Discarded
        } else {
            ReturnUse::Value
        },
        fallible: tried || catches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildUnit, ManifestModule, ModuleProvenance};
    use crate::resolve::{ImportSource, ResolvedImport};

    fn dialect() -> ZigDialect {
        ZigDialect::new().unwrap()
    }

    fn function(arity: usize, returns: ReturnUse, fallible: bool) -> SymbolShape {
        SymbolShape::Function {
            arity,
            returns,
            fallible,
        }
    }

    #[test]
    fn test_scan_imports_and_members() {
        let source = r#"const std = @import("std");
const shapes = @import("shapes");

pub fn main() !void {
    shapes.draw(1, 2);
    const area = shapes.area(.{ 1, 2 }, 3);
    try shapes.save("out, file");
    _ = shapes.count();
    var c: shapes.Circle = undefined;
    _ = shapes.pi;
    std.debug.print("{d}\n", .{area});
}
"#;
        let imports = dialect().scan_imports(source);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].module, "std");
        assert_eq!(imports[1].module, "shapes");
        assert_eq!(imports[1].line, 2);

        let members: Vec<(&str, SymbolShape)> = imports[1]
            .members
            .iter()
            .map(|m| (m.name.as_str(), m.shape))
            .collect();
        assert_eq!(
            members,
            vec![
                ("draw", function(2, ReturnUse::Discarded, false)),
                ("area", function(2, ReturnUse::Value, false)),
                ("save", function(1, ReturnUse::Discarded, true)),
                ("count", function(0, ReturnUse::Value, false)),
                ("Circle", SymbolShape::Type),
                ("pi", SymbolShape::Constant),
            ]
        );
    }

    #[test]
    fn test_comments_and_strings_are_ignored() {
        let source = r#"// const old = @import("legacy");
const m = @import("m");
const text = "m.fake(1)";
const doc =
    \\m.other()
;
pub fn main() void {
    m.real(); // m.commented()
}
"#;
        let imports = dialect().scan_imports(source);
        assert_eq!(imports.len(), 1);
        let names: Vec<&str> = imports[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["real"]);
        assert_eq!(imports[0].members[0].line, 8);
    }

    #[test]
    fn test_direct_import_use_and_catch() {
        let source = "pub fn main() void {\n    @import(\"net\").connect(\"host\", 80) catch {};\n}\n";
        let imports = dialect().scan_imports(source);
        assert_eq!(imports[0].module, "net");
        assert_eq!(
            imports[0].members[0].shape,
            function(2, ReturnUse::Discarded, true)
        );
    }

    #[test]
    fn test_trailing_comma_arity() {
        let source = "const m = @import(\"m\");\ntest \"x\" {\n    m.f(\n        1,\n        2,\n    );\n}\n";
        let imports = dialect().scan_imports(source);
        assert_eq!(
            imports[0].members[0].shape,
            function(2, ReturnUse::Discarded, false)
        );
    }

    #[test]
    fn test_file_imports() {
        let d = dialect();
        assert!(d.is_file_import("util.zig"));
        assert!(d.is_file_import("lib/util"));
        assert!(!d.is_file_import("util"));
    }

    #[test]
    fn test_render_stub() {
        let mut surface = BTreeMap::new();
        surface.insert("draw".to_string(), function(2, ReturnUse::Discarded, false));
        surface.insert("load".to_string(), function(1, ReturnUse::Value, true));
        surface.insert("Circle".to_string(), SymbolShape::Type);
        surface.insert("pi".to_string(), SymbolShape::Constant);

        let stub = dialect().render_stub("shapes", &surface);
        assert!(stub.starts_with(&format!("// {STUB_MARKER}")));
        assert!(stub.contains("pub fn draw(_: anytype, _: anytype) void {}"));
        assert!(stub.contains("pub fn load(_: anytype) anyerror!i64 {\n    return 0;\n}"));
        assert!(stub.contains("pub const Circle = struct {};"));
        assert!(stub.contains("pub const pi = 0;"));
    }

    #[test]
    fn test_module_args() {
        let d = dialect();
        assert_eq!(
            d.module_args(Path::new("/o/c/001.zig"), &[], &[]),
            vec!["/o/c/001.zig"]
        );

        let args = d.module_args(
            Path::new("/o/c/001.zig"),
            &["shapes".to_string()],
            &[ModuleArg {
                name: "shapes".to_string(),
                path: "/o/c/002.zig".into(),
                deps: vec!["widgets".to_string()],
            }],
        );
        assert_eq!(
            args,
            vec![
                "--dep",
                "shapes",
                "-Mroot=/o/c/001.zig",
                "--dep",
                "widgets",
                "-Mshapes=/o/c/002.zig"
            ]
        );
    }

    #[test]
    fn test_parse_diagnostics() {
        let output = "/out/ch01/001.zig:4:5: error: use of undeclared identifier 'x'\n    x += 1;\n    ^\n/out/ch01/001.zig:2:1: note: declared here\nerror: the following command failed\n";
        let diags = dialect().parse_diagnostics(output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].file, "/out/ch01/001.zig");
        assert_eq!(diags[0].line, 4);
        assert_eq!(diags[0].column, 5);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[1].severity, Severity::Note);
    }

    #[test]
    fn test_build_script() {
        let manifest = ChapterManifest {
            chapter: "ch01".to_string(),
            extension: "zig".to_string(),
            units: vec![
                BuildUnit {
                    id: "ch01/001".to_string(),
                    path: "ch01/001.zig".to_string(),
                    file: "001.zig".to_string(),
                    target: TargetKind::Executable,
                    module: None,
                    imports: vec![
                        ResolvedImport {
                            module: "std".to_string(),
                            source: ImportSource::Std,
                        },
                        ResolvedImport {
                            module: "widgets".to_string(),
                            source: ImportSource::Stub,
                        },
                    ],
                },
                BuildUnit {
                    id: "ch01/002".to_string(),
                    path: "ch01/002.zig".to_string(),
                    file: "002.zig".to_string(),
                    target: TargetKind::Test,
                    module: None,
                    imports: Vec::new(),
                },
            ],
            modules: vec![ManifestModule {
                name: "widgets".to_string(),
                path: "stubs/widgets.zig".to_string(),
                provenance: ModuleProvenance::Stub,
                deps: Vec::new(),
            }],
            advisory: Vec::new(),
        };

        let (name, script) = dialect().build_script(&manifest).unwrap();
        assert_eq!(name, "build.zig");
        assert!(script.contains("const mod_widgets = b.createModule"));
        assert!(script.contains("unit_001.addImport(\"widgets\", mod_widgets);"));
        assert!(script.contains("b.step(\"run-001\""));
        assert!(script.contains("b.step(\"test-002\""));
        assert!(!script.contains("addImport(\"std\""));
    }
}
