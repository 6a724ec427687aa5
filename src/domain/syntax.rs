//! Parser for the indentation-based rule syntax.
//!
//! A rule file is an optional `%{ ... %}` preamble followed by rules separated
//! by blank lines. Each rule line is either a condition
//! (`[-+!]Label:[:][=][*] [operand]`) or a code fragment (`< code`).
//! Nesting is two spaces per level, relative to the first condition of a rule.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, instrument};

use crate::domain::condition::{CodeFragment, Condition, ConditionKind, Program, Rule};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::state::{parse_value, split_indent};

/// Label of the pseudo-root anchor.
pub const ROOT_LABEL: &str = "^";

const PREAMBLE_OPEN: &str = "%{";
const PREAMBLE_CLOSE: &str = "%}";

fn condition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<prefix>[-+!])?(?P<label>[^:]+):(?P<ordered>:)?(?P<exhaustive>=)?(?P<many>\*)?(?:\s+(?P<operand>\S+))?$",
        )
        .expect("static regex")
    })
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Parse a whole rule file.
#[instrument(level = "debug", skip(text), fields(len = text.len()))]
pub fn parse_program(text: &str) -> DomainResult<Program> {
    let mut program = Program::default();
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l)).peekable();

    // Preamble, only before the first rule
    while let Some((_, line)) = lines.peek() {
        if !line.trim().is_empty() {
            break;
        }
        lines.next();
    }
    if let Some(&(open_line, line)) = lines.peek() {
        if line.trim() == PREAMBLE_OPEN {
            lines.next();
            let mut body = Vec::new();
            let mut closed = false;
            for (_, line) in lines.by_ref() {
                if line.trim() == PREAMBLE_CLOSE {
                    closed = true;
                    break;
                }
                body.push(line);
            }
            if !closed {
                return Err(DomainError::syntax(open_line, "unterminated '%{' preamble"));
            }
            let mut preamble = body.join("\n");
            preamble.push('\n');
            program.preamble = Some(preamble);
        }
    }

    let mut current: Option<RuleBuilder> = None;
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            if let Some(builder) = current.take() {
                program.rules.push(builder.finish()?);
            }
            continue;
        }
        let builder = current.get_or_insert_with(|| RuleBuilder::new(line_no));
        builder.feed(line_no, line)?;
    }
    if let Some(builder) = current.take() {
        program.rules.push(builder.finish()?);
    }

    debug!(rules = program.rules.len(), "Parsed program");
    Ok(program)
}

/// Parse the operand of a condition line: a literal first, then a variable.
fn apply_operand(line_no: usize, condition: &mut Condition, operand: &str) -> DomainResult<()> {
    if let Some(value) = parse_value(operand) {
        condition.value = Some(value);
    } else if identifier_pattern().is_match(operand) {
        condition.variable = Some(operand.to_string());
    } else {
        return Err(DomainError::syntax(
            line_no,
            format!("'{operand}' is neither a value nor a variable name"),
        ));
    }
    Ok(())
}

fn parse_condition(line_no: usize, text: &str) -> DomainResult<Condition> {
    let captures = condition_pattern()
        .captures(text)
        .ok_or_else(|| DomainError::syntax(line_no, format!("unrecognised line '{text}'")))?;

    let prefix = captures.name("prefix").and_then(|m| m.as_str().chars().next());
    let kind = ConditionKind::from_prefix(prefix)
        .ok_or_else(|| DomainError::syntax(line_no, "unknown condition prefix"))?;

    let label = captures.name("label").map_or("", |m| m.as_str()).trim();
    if label.is_empty() {
        return Err(DomainError::syntax(line_no, "empty label"));
    }
    if label.starts_with(['-', '+', '!', '<']) {
        return Err(DomainError::syntax(
            line_no,
            format!("label '{label}' starts with a reserved symbol"),
        ));
    }

    let mut condition = Condition::new(kind, label).at_line(line_no);
    condition.ordered = captures.name("ordered").is_some();
    condition.exhaustive = captures.name("exhaustive").is_some();
    if captures.name("many").is_some() {
        if !kind.consumes() {
            return Err(DomainError::syntax(
                line_no,
                "'*' only applies to matching and removing conditions",
            ));
        }
        condition = condition.many();
    }
    if let Some(operand) = captures.name("operand") {
        apply_operand(line_no, &mut condition, operand.as_str())?;
    }
    if condition.ordered && condition.value.is_some() {
        return Err(DomainError::syntax(
            line_no,
            "an ordered condition cannot carry a value",
        ));
    }
    Ok(condition)
}

/// Accumulates the lines of one rule.
struct RuleBuilder {
    line: usize,
    /// Indentation width of the rule's first condition
    base: Option<usize>,
    /// Open conditions, one per nesting level
    stack: Vec<Condition>,
    top: Vec<Condition>,
    code: Vec<CodeFragment>,
}

impl RuleBuilder {
    fn new(line: usize) -> Self {
        Self {
            line,
            base: None,
            stack: Vec::new(),
            top: Vec::new(),
            code: Vec::new(),
        }
    }

    fn feed(&mut self, line_no: usize, raw: &str) -> DomainResult<()> {
        let trimmed = raw.trim_start();
        if let Some(code) = trimmed.strip_prefix('<') {
            let code = code.strip_prefix(' ').unwrap_or(code).trim_end();
            self.code.push(CodeFragment::new(code, line_no));
            return Ok(());
        }

        let line = split_indent(line_no, raw)?;
        let base = *self.base.get_or_insert(line.depth);
        if line.depth < base {
            return Err(DomainError::syntax(
                line_no,
                "condition is indented less than the first condition of its rule",
            ));
        }
        let depth = line.depth - base;
        if depth > self.stack.len() {
            return Err(DomainError::syntax(
                line_no,
                format!("indented {} levels below its parent", depth - self.stack.len()),
            ));
        }

        let condition = parse_condition(line_no, line.text)?;
        while self.stack.len() > depth {
            self.close();
        }
        if let Some(parent) = self.stack.last() {
            if parent.value.is_some() {
                return Err(DomainError::syntax(
                    line_no,
                    format!("'{}' carries a value and cannot have nested conditions", parent.label),
                ));
            }
        }
        let under_prevent = self.stack.iter().any(|c| c.kind == ConditionKind::Prevent);
        if under_prevent && matches!(condition.kind, ConditionKind::Create | ConditionKind::Remove) {
            return Err(DomainError::syntax(
                line_no,
                "creating and removing conditions cannot be nested under a preventing condition",
            ));
        }
        self.stack.push(condition);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(condition) = self.stack.pop() {
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(condition),
                None => self.top.push(condition),
            }
        }
    }

    fn finish(mut self) -> DomainResult<Rule> {
        while !self.stack.is_empty() {
            self.close();
        }
        let mut rule = Rule {
            line: self.line,
            code: self.code,
            ..Default::default()
        };

        let anchors = self.top.first().is_some_and(is_anchor);
        if anchors {
            let mut conditions = self.top.into_iter();
            if let Some(root) = conditions.next() {
                if let Some(extra) = conditions.next() {
                    return Err(DomainError::syntax(
                        extra.line,
                        "conditions of an anchored rule must be nested under '^:'",
                    ));
                }
                rule.anchored = true;
                rule.ordered = root.ordered;
                rule.exhaustive = root.exhaustive;
                rule.conditions = root.children;
            }
        } else {
            rule.conditions = self.top;
        }
        Ok(rule)
    }
}

fn is_anchor(condition: &Condition) -> bool {
    condition.label == ROOT_LABEL
        && condition.kind == ConditionKind::Match
        && condition.variable.is_none()
        && condition.value.is_none()
        && !condition.is_many()
}
