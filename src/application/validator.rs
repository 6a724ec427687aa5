//! Static checks run on a parsed program before it is interpreted or compiled.

use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::application::engine::MARKER_LABEL;
use crate::application::error::{CompileError, CompileResult};
use crate::domain::{Condition, ConditionKind, Forest, Program, Rule, ROOT_LABEL};

/// Every rule of the program must pass [`validate_rule`].
#[instrument(level = "debug", skip_all, fields(rules = program.rules.len()))]
pub fn validate_program(program: &Program) -> CompileResult<()> {
    for rule in &program.rules {
        validate_rule(rule)?;
    }
    debug!("Program is valid");
    Ok(())
}

/// Rule-local checks: reserved labels, anchor placement, variable scoping.
pub fn validate_rule(rule: &Rule) -> CompileResult<()> {
    check_reserved_labels(rule)?;
    check_root_placement(rule)?;
    check_bindings(rule)
}

/// The one-shot bootstrap marker may not appear in user rules.
pub fn check_reserved_labels(rule: &Rule) -> CompileResult<()> {
    match rule.flatten().into_iter().find(|c| c.label == MARKER_LABEL) {
        Some(condition) => Err(CompileError::ReservedLabel {
            label: condition.label.clone(),
            line: condition.line,
        }),
        None => Ok(()),
    }
}

/// The bootstrap marker may not appear in an initial state either.
///
/// States have one node per line, so the pre-order position gives the line.
pub fn check_state_labels(state: &Forest) -> CompileResult<()> {
    match state
        .iter()
        .enumerate()
        .find(|(_, (_, node))| node.label() == MARKER_LABEL)
    {
        Some((position, (_, node))) => Err(CompileError::ReservedLabel {
            label: node.label().to_string(),
            line: position + 1,
        }),
        None => Ok(()),
    }
}

/// A pseudo-root that survived parsing is not at the top of its rule.
fn check_root_placement(rule: &Rule) -> CompileResult<()> {
    match rule.flatten().into_iter().find(|c| c.label == ROOT_LABEL) {
        Some(condition) => Err(CompileError::MisplacedRoot {
            line: condition.line,
        }),
        None => Ok(()),
    }
}

/// Variables read by creating or preventing conditions or by code must be
/// bound by a matching or removing condition of the same rule.
pub fn check_bindings(rule: &Rule) -> CompileResult<()> {
    let mut bound = HashSet::new();
    let mut uses = Vec::new();
    for condition in &rule.conditions {
        collect(condition, false, &mut bound, &mut uses);
    }
    for fragment in &rule.code {
        uses.extend(fragment.variables().map(|name| (name, fragment.line)));
    }

    match uses.into_iter().find(|(name, _)| !bound.contains(name)) {
        Some((name, line)) => Err(CompileError::UnboundVariable {
            variable: name.to_string(),
            line,
        }),
        None => Ok(()),
    }
}

fn collect<'a>(
    condition: &'a Condition,
    inside_use: bool,
    bound: &mut HashSet<&'a str>,
    uses: &mut Vec<(&'a str, usize)>,
) {
    let inside_use = inside_use || !condition.kind.consumes();
    if let Some(variable) = condition.variable.as_deref() {
        if inside_use {
            uses.push((variable, condition.line));
        } else {
            bound.insert(variable);
        }
    }
    for child in &condition.children {
        collect(child, inside_use, bound, uses);
    }
}
