//! Rewrite engine: applies the first matching rule until none matches or
//! embedded code asks to exit.

use std::fmt;
use tracing::{debug, info, instrument, trace};

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::matcher::find_match;
use crate::application::transformer::{apply, Action, Scope};
use crate::domain::{Condition, ConditionKind, DomainResult, Forest, NodeId, Rule, StateView};
use crate::exitcode;

/// Label of the one-shot marker planted by the bootstrap rule.
pub const MARKER_LABEL: &str = "Started";

/// First line of the diagnostic written when the program halts without a match.
pub const NO_RULES_MESSAGE: &str = "No rules to apply!";

/// A rule together with the compiled form of its code fragments.
pub struct CompiledRule {
    rule: Rule,
    actions: Vec<Action>,
}

impl CompiledRule {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule,
            actions: Vec::new(),
        }
    }

    /// Append the compiled form of the next code fragment.
    pub fn with_action(mut self, action: impl Fn(&Scope<'_>) + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Wrap a rule for in-process use; rules with code need compiling.
    pub fn interpreted(rule: Rule) -> ApplicationResult<Self> {
        if rule.has_code() {
            return Err(ApplicationError::EmbeddedCode { line: rule.line });
        }
        Ok(Self::new(rule))
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("rule", &self.rule)
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// No rule matched anywhere
    NoMatch,
    /// Embedded code requested an exit
    Exit(i32),
}

impl Halt {
    pub fn status(self) -> i32 {
        match self {
            Halt::NoMatch => exitcode::NO_RULES,
            Halt::Exit(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The rule at this index was applied
    Applied { rule: usize },
    Halted(Halt),
}

pub struct Engine {
    rules: Vec<CompiledRule>,
    forest: Forest,
    steps: u64,
}

impl Engine {
    /// Engine over an empty forest; the first rule is expected to bootstrap it.
    pub fn new(rules: Vec<CompiledRule>) -> Self {
        Self::with_forest(rules, Forest::new())
    }

    pub fn with_forest(rules: Vec<CompiledRule>, forest: Forest) -> Self {
        Self {
            rules,
            forest,
            steps: 0,
        }
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Number of rule applications so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Apply the first rule, in declaration order, that matches anywhere.
    /// A match that would neither change the forest nor run code does not count.
    #[instrument(level = "trace", skip(self), fields(step = self.steps))]
    pub fn step(&mut self) -> DomainResult<Step> {
        for (index, compiled) in self.rules.iter().enumerate() {
            let Some(found) = find_match(&self.forest, &compiled.rule) else {
                continue;
            };
            if found.effects.is_empty() && compiled.actions.is_empty() {
                trace!(rule = index, "Matched without any effect, skipping");
                continue;
            }
            let status = apply(&mut self.forest, &found, &compiled.actions)?;
            self.steps += 1;
            debug!(rule = index, line = compiled.rule.line, step = self.steps, "Applied rule");
            return Ok(match status {
                Some(code) => Step::Halted(Halt::Exit(code)),
                None => Step::Applied { rule: index },
            });
        }
        Ok(Step::Halted(Halt::NoMatch))
    }

    /// Step until the program halts.
    pub fn run(&mut self) -> DomainResult<Halt> {
        loop {
            if let Step::Halted(halt) = self.step()? {
                info!(steps = self.steps, ?halt, "Program halted");
                return Ok(halt);
            }
        }
    }

    /// Like [`Engine::run`], giving up with `None` after `max_steps` applications.
    pub fn run_limited(&mut self, max_steps: u64) -> DomainResult<Option<Halt>> {
        while self.steps < max_steps {
            if let Step::Halted(halt) = self.step()? {
                return Ok(Some(halt));
            }
        }
        Ok(None)
    }

    /// `No rules to apply!` followed by the state, bootstrap marker omitted.
    pub fn diagnostic(&self) -> String {
        format!(
            "{NO_RULES_MESSAGE}\n{}",
            StateView::new(&self.forest).hiding(MARKER_LABEL)
        )
    }

    /// Entry point of generated programs: run to completion and return the
    /// process exit status. The no-match diagnostic goes to stderr.
    pub fn execute(mut self) -> i32 {
        match self.run() {
            Ok(Halt::NoMatch) => {
                eprint!("{}", self.diagnostic());
                exitcode::NO_RULES
            }
            Ok(Halt::Exit(code)) => code,
            Err(e) => {
                eprintln!("runtime error: {e}");
                exitcode::SOFTWARE
            }
        }
    }
}

/// The anchored rule that fires once and plants the initial state:
/// `^:` / `!Started:` / `+Started:` / `+<state nodes>`.
pub fn bootstrap_rule(state: &Forest) -> Rule {
    let mut conditions = vec![
        Condition::new(ConditionKind::Prevent, MARKER_LABEL),
        Condition::new(ConditionKind::Create, MARKER_LABEL),
    ];
    conditions.extend(
        state
            .roots()
            .iter()
            .filter_map(|root| create_condition(state, *root)),
    );
    Rule::new(conditions).anchored()
}

fn create_condition(state: &Forest, id: NodeId) -> Option<Condition> {
    let node = state.get_node(id)?;
    let mut condition = Condition::new(ConditionKind::Create, node.label());
    condition.ordered = node.is_ordered();
    condition.value = node.value();
    condition.children = node
        .children()
        .iter()
        .filter_map(|child| create_condition(state, *child))
        .collect();
    Some(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{parse_program, parse_state};

    fn engine(rules: &str, state: &str) -> Engine {
        let state = parse_state(state).unwrap();
        let mut compiled = vec![CompiledRule::new(bootstrap_rule(&state))];
        for rule in parse_program(rules).unwrap().rules {
            compiled.push(CompiledRule::interpreted(rule).unwrap());
        }
        Engine::new(compiled)
    }

    #[test]
    fn given_bootstrap_when_stepping_then_it_fires_exactly_once() {
        let mut engine = engine("", "Foo:\n  Bar: 5");

        assert_eq!(engine.step().unwrap(), Step::Applied { rule: 0 });
        assert_eq!(engine.step().unwrap(), Step::Halted(Halt::NoMatch));
        assert_eq!(engine.diagnostic(), "No rules to apply!\nFoo:\n  Bar: 5\n");
    }

    #[test]
    fn given_rule_without_effects_when_stepping_then_program_halts() {
        let mut engine = engine("Foo:", "Foo:");

        assert_eq!(engine.run().unwrap(), Halt::NoMatch);
        assert_eq!(engine.steps(), 1);
        assert_eq!(engine.diagnostic(), "No rules to apply!\nFoo:\n");
    }

    #[test]
    fn given_rule_with_code_when_interpreting_then_rejected() {
        let rule = parse_program("Foo:\n< scope.exit(0);").unwrap().rules.remove(0);

        let result = CompiledRule::interpreted(rule);

        assert!(matches!(result, Err(ApplicationError::EmbeddedCode { line: 1 })));
    }

    #[test]
    fn given_action_requesting_exit_when_running_then_later_actions_are_skipped() {
        let rule = parse_program("Foo:").unwrap().rules.remove(0);
        let compiled = CompiledRule::new(rule)
            .with_action(|scope| scope.exit(3))
            .with_action(|_| panic!("must not run"));
        let mut engine = Engine::with_forest(vec![compiled], parse_state("Foo:").unwrap());

        assert_eq!(engine.run().unwrap(), Halt::Exit(3));
    }

    #[test]
    fn given_non_terminating_program_when_running_limited_then_gives_up() {
        let mut engine = engine("Foo:\n  +Bar:", "Foo:");

        assert_eq!(engine.run_limited(10).unwrap(), None);
        assert_eq!(engine.steps(), 10);
    }
}
