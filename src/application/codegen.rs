//! Code generator: turns a validated program and its bootstrap state into a
//! standalone Cargo project that links the runtime.
//!
//! Each rule becomes a `fn rule_N() -> CompiledRule` that rebuilds the rule's
//! conditions and wraps all of its code fragments, in order, in one closure
//! over a `Scope`, so locals carry from one `<` line to the next. Fragment
//! references `$Name` become `scope.node("Name")`; `exit!(status)` stops the
//! program without running the rest of the rule's code.

use std::fmt::Write as _;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::application::engine::bootstrap_rule;
use crate::domain::{Condition, Forest, Multiplicity, Program, Rule, Value};

const FINGERPRINT_PREFIX: &str = "// fingerprint: ";
const INDENT: &str = "    ";
const EXIT_MACRO: &str = "#[allow(unused_macros)]\n\
    macro_rules! exit { ($status:expr) => {{ scope.exit($status); return; }}; }";

/// Where generated programs find the runtime crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeDependency {
    Path(PathBuf),
    Version(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Cargo package name of the generated project
    pub package: String,
    /// Name of the rule file, mentioned in the header
    pub source_name: String,
    pub runtime: RuntimeDependency,
    pub annotate: bool,
    pub allow_lints: Vec<String>,
}

/// Sources of a generated project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProject {
    pub cargo_toml: String,
    pub main_rs: String,
    /// SHA-256 of the generated body, recorded in the `main.rs` header
    pub fingerprint: String,
}

/// Generate the project for `program`, whose state starts as `state`.
#[instrument(level = "debug", skip_all, fields(package = %options.package, rules = program.rules.len()))]
pub fn generate(program: &Program, state: &Forest, options: &CodegenOptions) -> GeneratedProject {
    let body = render_body(program, state, options);
    let fingerprint = hex::encode(Sha256::digest(body.as_bytes()));

    let mut main_rs = String::new();
    let _ = writeln!(
        main_rs,
        "// Generated by bonsai {} from {}. Do not edit.",
        env!("CARGO_PKG_VERSION"),
        options.source_name
    );
    let _ = writeln!(main_rs, "{FINGERPRINT_PREFIX}{fingerprint}");
    main_rs.push_str(&body);

    debug!(%fingerprint, "Generated program");
    GeneratedProject {
        cargo_toml: render_cargo_toml(options),
        main_rs,
        fingerprint,
    }
}

/// Fingerprint recorded in the header of a previously generated `main.rs`.
pub fn read_fingerprint(main_rs: &str) -> Option<&str> {
    main_rs
        .lines()
        .take(2)
        .find_map(|line| line.strip_prefix(FINGERPRINT_PREFIX))
        .map(str::trim)
}

fn render_cargo_toml(options: &CodegenOptions) -> String {
    let dependency = match &options.runtime {
        RuntimeDependency::Path(path) => format!("{{ path = {} }}", toml_string(&path.to_string_lossy())),
        RuntimeDependency::Version(version) => toml_string(version),
    };
    format!(
        "[package]\n\
         name = {}\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\
         publish = false\n\
         \n\
         [dependencies]\n\
         bonsai = {dependency}\n\
         \n\
         # Keep the generated project out of any enclosing workspace\n\
         [workspace]\n",
        toml_string(&options.package)
    )
}

fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn render_body(program: &Program, state: &Forest, options: &CodegenOptions) -> String {
    let mut out = String::new();
    if !options.allow_lints.is_empty() {
        let _ = writeln!(out, "#![allow({})]", options.allow_lints.join(", "));
    }
    out.push_str("\nuse bonsai::prelude::*;\n");

    if let Some(preamble) = &program.preamble {
        out.push('\n');
        out.push_str(preamble);
    }

    let bootstrap = bootstrap_rule(state);
    let rules: Vec<&Rule> = std::iter::once(&bootstrap).chain(&program.rules).collect();
    for (index, rule) in rules.iter().enumerate() {
        out.push('\n');
        if options.annotate {
            let _ = writeln!(out, "/* {} */", annotation(rule, index == 0));
        }
        render_rule(&mut out, index, rule);
    }

    out.push_str("\nfn main() {\n");
    out.push_str(INDENT);
    out.push_str("let rules = vec![");
    let calls: Vec<String> = (0..rules.len()).map(|i| format!("rule_{i}()")).collect();
    out.push_str(&calls.join(", "));
    out.push_str("];\n");
    out.push_str(INDENT);
    out.push_str("std::process::exit(Engine::new(rules).execute());\n}\n");
    out
}

fn annotation(rule: &Rule, bootstrap: bool) -> String {
    if bootstrap {
        return "bootstrap".to_string();
    }
    let head = match rule.conditions.first() {
        Some(c) if rule.anchored => format!("^: {}{}:", c.kind.prefix(), c.label),
        Some(c) => format!("{}{}:", c.kind.prefix(), c.label),
        None => "<code>".to_string(),
    };
    // Block comments nest in Rust
    let head = head.replace("/*", "/ *").replace("*/", "* /");
    format!("{head} (line {})", rule.line)
}

fn render_rule(out: &mut String, index: usize, rule: &Rule) {
    let _ = writeln!(out, "fn rule_{index}() -> CompiledRule {{");
    let _ = write!(out, "{INDENT}let rule = Rule::new(");
    render_conditions(out, &rule.conditions, 1);
    out.push(')');
    if rule.anchored {
        out.push_str(".anchored()");
    }
    if rule.ordered {
        out.push_str(".ordered()");
    }
    if rule.exhaustive {
        out.push_str(".exhaustive()");
    }
    let _ = writeln!(out, ".at_line({});", rule.line);

    let _ = write!(out, "{INDENT}CompiledRule::new(rule)");
    if rule.has_code() {
        let body = INDENT.repeat(3);
        let _ = write!(out, "\n{INDENT}{INDENT}.with_action(|scope| {{");
        for line in EXIT_MACRO.lines() {
            let _ = write!(out, "\n{body}{}", line.trim_start());
        }
        for fragment in &rule.code {
            let source = fragment.rewrite(|name| format!("scope.node({name:?})"));
            let _ = write!(out, "\n{body}{source}");
        }
        let _ = write!(out, "\n{INDENT}{INDENT}}})");
    }
    out.push_str("\n}\n");
}

fn render_conditions(out: &mut String, conditions: &[Condition], depth: usize) {
    if conditions.is_empty() {
        out.push_str("Vec::new()");
        return;
    }
    out.push_str("vec![");
    for condition in conditions {
        out.push('\n');
        out.push_str(&INDENT.repeat(depth + 1));
        render_condition(out, condition, depth + 1);
        out.push(',');
    }
    out.push('\n');
    out.push_str(&INDENT.repeat(depth));
    out.push(']');
}

fn render_condition(out: &mut String, condition: &Condition, depth: usize) {
    let _ = write!(
        out,
        "Condition::new(ConditionKind::{:?}, {:?})",
        condition.kind, condition.label
    );
    if let Some(variable) = &condition.variable {
        let _ = write!(out, ".with_variable({variable:?})");
    }
    if let Some(value) = condition.value {
        let _ = write!(out, ".with_value({})", value_literal(value));
    }
    if condition.ordered {
        out.push_str(".ordered()");
    }
    if condition.exhaustive {
        out.push_str(".exhaustive()");
    }
    if condition.multiplicity == Multiplicity::Many {
        out.push_str(".many()");
    }
    if condition.line > 0 {
        let _ = write!(out, ".at_line({})", condition.line);
    }
    if !condition.children.is_empty() {
        out.push_str(".with_children(");
        render_conditions(out, &condition.children, depth);
        out.push(')');
    }
}

fn value_literal(value: Value) -> String {
    match value {
        Value::Integer(i) => format!("Value::Integer({i})"),
        Value::Decimal(d) => format!("Value::Decimal({d:?})"),
    }
}
