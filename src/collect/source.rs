//! Source-context collection: the method under analysis with a line window,
//! plus the definitions of classes the constraints mention.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::config::SourceContextConfig;
use crate::error::CollectError;
use crate::explorer::Explorer;
use crate::expr::Expr;
use crate::vm::class::{simple_name, ClassDef, ClassRegistry, MethodDecl};
use crate::vm::ThreadInfo;

const RELATED_CLASS_LINE_CAP: usize = 200;
const TRUNCATION_MARKER: &str = "\n... (truncated)";

#[derive(Debug, Clone, Serialize)]
pub struct LineNumbers {
    pub method_start: u32,
    pub method_end: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceContext {
    pub method_name: String,
    pub method_signature: String,
    pub method_full_name: String,
    pub class_name: String,
    pub class_simple_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_source: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub related_classes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_numbers: Option<LineNumbers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// Collects annotated source excerpts. Keeps a local cache of extracted
/// class definitions so repeated solves do not re-read files.
#[derive(Debug, Default)]
pub struct SourceContextCollector {
    cfg: SourceContextConfig,
    source_roots: Vec<PathBuf>,
    cache: HashMap<String, String>,
}

impl SourceContextCollector {
    pub fn new(cfg: SourceContextConfig) -> Self {
        Self { cfg, source_roots: Vec::new(), cache: HashMap::new() }
    }

    pub fn from_env() -> Self {
        Self::new(SourceContextConfig::from_env())
    }

    /// Adds a directory to search when a class carries no source path of its
    /// own (the sourcepath analogue).
    pub fn add_source_root(&mut self, root: impl Into<PathBuf>) {
        self.source_roots.push(root.into());
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Collects the source context, preferring the method under analysis and
    /// falling back to the top stack frame.
    pub fn collect(
        &mut self,
        thread: &ThreadInfo,
        explorer: Option<&dyn Explorer>,
        registry: &ClassRegistry,
        hl_constraints: &[Expr],
        parameter_types: &BTreeMap<String, String>,
    ) -> Result<SourceContext, CollectError> {
        let (class_name, method_name, method_signature) =
            match explorer.and_then(|e| e.method_under_analysis()) {
                Some(m) => (m.class_name.clone(), m.method_name.clone(), m.signature.clone()),
                None => {
                    let frame = thread.top_frame().ok_or(CollectError::NoMethod)?;
                    (
                        frame.class_name.clone(),
                        frame.method_name.clone(),
                        frame.method_signature.clone(),
                    )
                }
            };

        let class_def = registry.get(&class_name);
        let method_decl =
            class_def.and_then(|def| def.declared_method(&method_name, &method_signature));

        let mut ctx = SourceContext {
            method_full_name: format!("{class_name}.{method_name}{method_signature}"),
            method_name,
            method_signature,
            class_simple_name: simple_name(&class_name).to_string(),
            class_name: class_name.clone(),
            method_source: None,
            class_source: None,
            related_classes: BTreeMap::new(),
            line_numbers: None,
            source_file: None,
        };

        if let (Some(def), Some(decl)) = (class_def, method_decl) {
            ctx.method_source = self.extract_method_source(def, decl);
            if decl.start_line > 0 && decl.end_line > 0 && self.cfg.include_line_numbers {
                ctx.line_numbers =
                    Some(LineNumbers { method_start: decl.start_line, method_end: decl.end_line });
            }
        }
        if let Some(def) = class_def {
            ctx.source_file = def
                .source_file
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned());
            if self.cfg.include_full_class {
                ctx.class_source = self.extract_class_source(def);
            }
        }

        ctx.related_classes =
            self.collect_related_classes(&class_name, registry, hl_constraints, parameter_types);
        Ok(ctx)
    }

    fn resolve_path(&self, path: &Path) -> Option<PathBuf> {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        self.source_roots
            .iter()
            .map(|root| root.join(path))
            .find(|candidate| candidate.exists())
    }

    fn read_lines(&self, def: &ClassDef) -> Option<Vec<String>> {
        let declared = def.source_file.as_ref()?;
        let path = self.resolve_path(declared)?;
        let text = fs::read_to_string(path).ok()?;
        Some(text.lines().map(str::to_string).collect())
    }

    fn extract_method_source(&self, def: &ClassDef, decl: &MethodDecl) -> Option<String> {
        if decl.start_line == 0 || decl.end_line == 0 {
            return None;
        }
        let lines = self.read_lines(def)?;
        let start = (decl.start_line as usize).saturating_sub(self.cfg.context_lines).max(1);
        let end = (decl.end_line as usize + self.cfg.context_lines).min(lines.len());
        let mut out = String::new();
        for lineno in start..=end {
            let Some(line) = lines.get(lineno - 1) else { break };
            if self.cfg.include_line_numbers {
                out.push_str(&format!("{lineno:4}: {line}\n"));
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        Some(truncate_with_marker(out, self.cfg.max_method_source_length))
    }

    fn extract_class_source(&mut self, def: &ClassDef) -> Option<String> {
        if let Some(cached) = self.cache.get(&def.name) {
            return Some(cached.clone());
        }
        let lines = self.read_lines(def)?;
        let mut out = String::new();
        for (idx, line) in lines.iter().enumerate() {
            if self.cfg.include_line_numbers {
                out.push_str(&format!("{:4}: {line}\n", idx + 1));
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        let rendered = truncate_with_marker(out, self.cfg.max_class_source_length);
        self.cache.insert(def.name.clone(), rendered.clone());
        Some(rendered)
    }

    /// Classes referenced by the constraints (JVM descriptor tokens) or by
    /// the declared parameter types, rendered as definition blocks.
    fn collect_related_classes(
        &mut self,
        current_class: &str,
        registry: &ClassRegistry,
        hl_constraints: &[Expr],
        parameter_types: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut tokens = BTreeSet::new();
        for expr in hl_constraints {
            scan_descriptor_tokens(&expr.to_string(), &mut tokens);
        }
        for declared in parameter_types.values() {
            if !declared.is_empty() {
                tokens.insert(to_jvm_descriptor(declared));
            }
        }

        let mut related = BTreeMap::new();
        for token in tokens {
            let Some(class_name) = descriptor_to_class_name(&token) else { continue };
            if class_name == current_class {
                continue;
            }
            if let Some(source) = self.resolve_class_definition(registry, &class_name) {
                let capped = truncate_with_marker(source, self.cfg.max_related_class_length);
                related.insert(class_name, capped);
            }
        }
        related
    }

    fn resolve_class_definition(
        &mut self,
        registry: &ClassRegistry,
        class_name: &str,
    ) -> Option<String> {
        if let Some(cached) = self.cache.get(class_name) {
            return Some(cached.clone());
        }

        let simple = simple_name(class_name).to_string();
        let mut lines = registry
            .get(class_name)
            .or_else(|| registry.get_by_simple_name(&simple))
            .and_then(|def| self.read_lines(def));

        // Fallback: locate the file by simple or package-qualified name.
        if lines.is_none() {
            let candidates = [
                PathBuf::from(format!("{simple}.java")),
                PathBuf::from(format!("{}.java", class_name.replace('.', "/"))),
            ];
            for candidate in candidates {
                if let Some(path) = self.resolve_path(&candidate) {
                    if let Ok(text) = fs::read_to_string(path) {
                        lines = Some(text.lines().map(str::to_string).collect());
                        break;
                    }
                }
            }
        }

        let rendered = extract_class_definition(&lines?, &simple)?;
        self.cache.insert(class_name.to_string(), rendered.clone());
        debug!(class = class_name, "collected related class definition");
        Some(rendered)
    }
}

/// Renders the class-definition block: from the `class Name` line to its
/// matching closing brace, numbered, capped at 200 lines.
fn extract_class_definition(lines: &[String], simple: &str) -> Option<String> {
    let start = lines
        .iter()
        .position(|line| is_class_declaration(line, simple))?;

    let mut out = String::new();
    let mut brace_depth: i64 = 0;
    let mut saw_open = false;
    let end_cap = (start + RELATED_CLASS_LINE_CAP).min(lines.len());
    for (idx, line) in lines.iter().enumerate().take(end_cap).skip(start) {
        out.push_str(&format!("{:4}: {line}\n", idx + 1));
        for c in line.chars() {
            match c {
                '{' => {
                    brace_depth += 1;
                    saw_open = true;
                }
                '}' => brace_depth -= 1,
                _ => {}
            }
        }
        if saw_open && brace_depth == 0 {
            break;
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn is_class_declaration(line: &str, simple: &str) -> bool {
    let Some(pos) = line.find("class ") else { return false };
    let rest = line[pos + "class ".len()..].trim_start();
    rest.starts_with(simple)
        && rest[simple.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true)
}

/// Scans JVM descriptor tokens of the form `L<word or / or $>+;`.
fn scan_descriptor_tokens(rendered: &str, out: &mut BTreeSet<String>) {
    let bytes = rendered.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'L' {
            let mut end = i + 1;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric()
                    || bytes[end] == b'_'
                    || bytes[end] == b'/'
                    || bytes[end] == b'$')
            {
                end += 1;
            }
            if end > i + 1 && end < bytes.len() && bytes[end] == b';' {
                out.insert(rendered[i..=end].to_string());
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
}

fn descriptor_to_class_name(token: &str) -> Option<String> {
    let inner = token.strip_prefix('L')?.strip_suffix(';')?;
    if inner.is_empty() {
        return None;
    }
    Some(inner.replace('/', "."))
}

fn to_jvm_descriptor(class_name: &str) -> String {
    if class_name.starts_with('L') && class_name.ends_with(';') {
        return class_name.to_string();
    }
    format!("L{};", class_name.replace('.', "/"))
}

fn truncate_with_marker(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = s[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_scan() {
        let mut out = BTreeSet::new();
        scan_descriptor_tokens("IsExactType(x(ref), LDog;) && (a instanceof Lcom/foo/Bar;)", &mut out);
        assert!(out.contains("LDog;"));
        assert!(out.contains("Lcom/foo/Bar;"));
        assert_eq!(descriptor_to_class_name("Lcom/foo/Bar;").as_deref(), Some("com.foo.Bar"));
    }

    #[test]
    fn test_descriptor_round_trip() {
        assert_eq!(to_jvm_descriptor("com.foo.Bar"), "Lcom/foo/Bar;");
        assert_eq!(to_jvm_descriptor("LDog;"), "LDog;");
    }

    #[test]
    fn test_class_declaration_matching() {
        assert!(is_class_declaration("public class Dog extends Animal {", "Dog"));
        assert!(is_class_declaration("class Dog{", "Dog"));
        assert!(!is_class_declaration("class DogHouse {", "Dog"));
        assert!(!is_class_declaration("// class Dogx", "Dog"));
    }

    #[test]
    fn test_class_definition_block_extraction() {
        let lines: Vec<String> = [
            "package demo;",
            "",
            "class Dog implements IAnimal {",
            "    void makeSound() {",
            "        bark();",
            "    }",
            "}",
            "class Cat {}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let block = extract_class_definition(&lines, "Dog").expect("block");
        assert!(block.contains("class Dog"));
        assert!(block.contains("bark();"));
        assert!(!block.contains("class Cat"));
        // Lines are numbered starting from the declaration line.
        assert!(block.starts_with("   3: "));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let s = "é".repeat(100);
        let out = truncate_with_marker(s, 33);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() <= 33 + TRUNCATION_MARKER.len());
    }
}
