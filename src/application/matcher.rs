//! Pattern matcher: decides whether a rule's conditions hold somewhere in the
//! forest and, if so, describes what the rule binds, consumes and changes.
//!
//! The search is a backtracking solver over a stack of goals. Each goal
//! either expands into further goals (a nested condition set) or narrows the
//! search state (bindings and consumed children). Choices are only made for
//! exactly-one conditions; zero-or-more conditions are assigned greedily and
//! never revisited.

use std::collections::BTreeMap;
use std::ptr;
use tracing::{instrument, trace};

use crate::application::engine::MARKER_LABEL;
use crate::domain::{Condition, ConditionKind, Context, Forest, NodeId, Rule};

/// A change requested by a matched rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect<'r> {
    Remove { context: Context, node: NodeId },
    Create { context: Context, condition: &'r Condition },
}

/// A successful match of a rule.
///
/// Node handles stay valid only until the forest is mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'r> {
    /// Context the rule's top-level set matched against
    pub context: Context,
    pub bindings: BTreeMap<String, NodeId>,
    /// Children taken by matching and removing conditions, with their context
    pub consumed: Vec<(Context, NodeId)>,
    /// Removals and creations in declaration order
    pub effects: Vec<Effect<'r>>,
}

impl Match<'_> {
    pub fn binding(&self, variable: &str) -> Option<NodeId> {
        self.bindings.get(variable).copied()
    }
}

/// Find the first context where `rule` matches.
///
/// Unanchored rules try the root context, then every node in pre-order;
/// anchored rules only the root.
#[instrument(level = "trace", skip_all, fields(rule = rule.line))]
pub fn find_match<'r>(forest: &Forest, rule: &'r Rule) -> Option<Match<'r>> {
    let matcher = Matcher::new(forest, rule);
    if rule.anchored {
        return matcher.match_at(Context::Root);
    }
    forest.contexts().find_map(|context| matcher.match_at(context))
}

/// Match `rule` against one specific context.
pub fn match_at<'r>(forest: &Forest, rule: &'r Rule, context: Context) -> Option<Match<'r>> {
    Matcher::new(forest, rule).match_at(context)
}

#[derive(Debug, Clone, Copy)]
enum Goal<'r> {
    /// Match a sibling set against the children of a context
    Set {
        context: Context,
        conditions: &'r [Condition],
        ordered: bool,
        exhaustive: bool,
    },
    /// Ordered prefix matching, one consuming condition at a time
    Sequence {
        context: Context,
        conditions: &'r [Condition],
        index: usize,
        position: usize,
        exhaustive: bool,
    },
    /// Injective placement of exactly-one conditions among unordered children
    Place {
        context: Context,
        conditions: &'r [Condition],
        index: usize,
    },
    /// Greedy assignment of leftover children to zero-or-more conditions
    Spread {
        context: Context,
        conditions: &'r [Condition],
        exhaustive: bool,
    },
    /// Fail if any deferred preventing condition is satisfied
    Prevents,
}

#[derive(Debug, Clone)]
struct Pending<'r> {
    order: usize,
    effect: Effect<'r>,
}

#[derive(Debug, Clone, Default)]
struct Search<'r> {
    bindings: Vec<(&'r str, NodeId)>,
    taken: Vec<(Context, NodeId)>,
    prevents: Vec<(Context, &'r Condition)>,
    effects: Vec<Pending<'r>>,
}

impl<'r> Search<'r> {
    fn binding(&self, variable: &str) -> Option<NodeId> {
        self.bindings
            .iter()
            .find(|(name, _)| *name == variable)
            .map(|(_, id)| *id)
    }

    fn is_taken(&self, node: NodeId) -> bool {
        self.taken.iter().any(|(_, taken)| *taken == node)
    }

    /// Fresh state for probing a preventing condition: same bindings, nothing taken.
    fn probe(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
            ..Default::default()
        }
    }
}

struct Matcher<'f, 'r> {
    forest: &'f Forest,
    rule: &'r Rule,
    /// Conditions in declaration order, used to order effects
    order: Vec<&'r Condition>,
}

impl<'f, 'r> Matcher<'f, 'r> {
    fn new(forest: &'f Forest, rule: &'r Rule) -> Self {
        Self {
            forest,
            rule,
            order: rule.flatten(),
        }
    }

    fn match_at(&self, context: Context) -> Option<Match<'r>> {
        let goals = vec![
            Goal::Prevents,
            Goal::Set {
                context,
                conditions: &self.rule.conditions,
                ordered: self.rule.ordered,
                exhaustive: self.rule.exhaustive,
            },
        ];
        let mut state = self.solve(goals, Search::default())?;
        trace!(?context, bindings = state.bindings.len(), "Rule matched");

        state.effects.sort_by_key(|pending| pending.order);
        Some(Match {
            context,
            bindings: state
                .bindings
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect(),
            consumed: state.taken,
            effects: state.effects.into_iter().map(|p| p.effect).collect(),
        })
    }

    /// The bootstrap marker at the root is invisible to exhaustive sets.
    fn is_marker(&self, context: Context, node: NodeId) -> bool {
        context == Context::Root && self.forest.label(node) == Some(MARKER_LABEL)
    }

    fn order_of(&self, condition: &Condition) -> usize {
        self.order
            .iter()
            .position(|c| ptr::eq(*c, condition))
            .unwrap_or(usize::MAX)
    }

    /// Run goals from the top of the stack; the first complete solution wins.
    fn solve(&self, mut goals: Vec<Goal<'r>>, state: Search<'r>) -> Option<Search<'r>> {
        let Some(goal) = goals.pop() else {
            return Some(state);
        };
        match goal {
            Goal::Set {
                context,
                conditions,
                ordered,
                exhaustive,
            } => {
                let mut state = state;
                for condition in conditions {
                    match condition.kind {
                        ConditionKind::Prevent => state.prevents.push((context, condition)),
                        ConditionKind::Create => state.effects.push(Pending {
                            order: self.order_of(condition),
                            effect: Effect::Create { context, condition },
                        }),
                        ConditionKind::Match | ConditionKind::Remove => {}
                    }
                }
                if ordered {
                    if !self.forest.is_ordered(context) {
                        return None;
                    }
                    goals.push(Goal::Sequence {
                        context,
                        conditions,
                        index: 0,
                        position: 0,
                        exhaustive,
                    });
                } else {
                    goals.push(Goal::Spread {
                        context,
                        conditions,
                        exhaustive,
                    });
                    goals.push(Goal::Place {
                        context,
                        conditions,
                        index: 0,
                    });
                }
                self.solve(goals, state)
            }

            Goal::Sequence {
                context,
                conditions,
                index,
                position,
                exhaustive,
            } => {
                let children = self.forest.children(context);
                let Some(offset) = conditions[index..].iter().position(|c| c.kind.consumes())
                else {
                    if exhaustive && position != children.len() {
                        return None;
                    }
                    return self.solve(goals, state);
                };
                let index = index + offset;
                let condition = &conditions[index];

                if condition.is_many() {
                    let mut state = state;
                    let mut position = position;
                    while let Some(&child) = children.get(position) {
                        match self.commit(condition, context, child, &state) {
                            Some(next) => {
                                state = next;
                                position += 1;
                            }
                            None => break,
                        }
                    }
                    goals.push(Goal::Sequence {
                        context,
                        conditions,
                        index: index + 1,
                        position,
                        exhaustive,
                    });
                    return self.solve(goals, state);
                }

                let child = *children.get(position)?;
                let (next, nested) = self.take(condition, context, child, &state)?;
                goals.push(Goal::Sequence {
                    context,
                    conditions,
                    index: index + 1,
                    position: position + 1,
                    exhaustive,
                });
                goals.extend(nested);
                self.solve(goals, next)
            }

            Goal::Place {
                context,
                conditions,
                index,
            } => {
                let Some(offset) = conditions[index..]
                    .iter()
                    .position(|c| c.kind.consumes() && !c.is_many())
                else {
                    return self.solve(goals, state);
                };
                let index = index + offset;
                let condition = &conditions[index];
                goals.push(Goal::Place {
                    context,
                    conditions,
                    index: index + 1,
                });

                for &child in self.forest.children(context) {
                    if state.is_taken(child) {
                        continue;
                    }
                    let Some((next, nested)) = self.take(condition, context, child, &state) else {
                        continue;
                    };
                    let mut branch = goals.clone();
                    branch.extend(nested);
                    if let Some(solution) = self.solve(branch, next) {
                        return Some(solution);
                    }
                }
                None
            }

            Goal::Spread {
                context,
                conditions,
                exhaustive,
            } => {
                let many: Vec<&Condition> = conditions
                    .iter()
                    .filter(|c| c.kind.consumes() && c.is_many())
                    .collect();
                let children = self.forest.children(context);
                let mut state = state;
                for &child in children {
                    if state.is_taken(child) {
                        continue;
                    }
                    if let Some(next) = many
                        .iter()
                        .find_map(|&condition| self.commit(condition, context, child, &state))
                    {
                        state = next;
                    }
                }
                if exhaustive
                    && children
                        .iter()
                        .any(|child| !state.is_taken(*child) && !self.is_marker(context, *child))
                {
                    return None;
                }
                self.solve(goals, state)
            }

            Goal::Prevents => {
                for &(context, condition) in &state.prevents {
                    for &child in self.forest.children(context) {
                        if self.satisfies(condition, context, child, &state) {
                            trace!(label = %condition.label, "Match prevented");
                            return None;
                        }
                    }
                }
                self.solve(goals, state)
            }
        }
    }

    /// Whether `child` satisfies a preventing condition under the current bindings.
    fn satisfies(
        &self,
        condition: &'r Condition,
        context: Context,
        child: NodeId,
        state: &Search<'r>,
    ) -> bool {
        let Some((probe, nested)) = self.take(condition, context, child, &state.probe()) else {
            return false;
        };
        let mut goals = vec![Goal::Prevents];
        goals.extend(nested);
        self.solve(goals, probe).is_some()
    }

    /// Take `child` for a zero-or-more condition, resolving its nested set
    /// immediately; the choice is never revisited.
    fn commit(
        &self,
        condition: &'r Condition,
        context: Context,
        child: NodeId,
        state: &Search<'r>,
    ) -> Option<Search<'r>> {
        let (next, nested) = self.take(condition, context, child, state)?;
        match nested {
            Some(goal) => self.solve(vec![goal], next),
            None => Some(next),
        }
    }

    /// Check `child` against a single condition without looking at its
    /// children; a nested set comes back as a goal to be solved.
    fn take(
        &self,
        condition: &'r Condition,
        context: Context,
        child: NodeId,
        state: &Search<'r>,
    ) -> Option<(Search<'r>, Option<Goal<'r>>)> {
        let node = self.forest.get_node(child)?;
        if node.label() != condition.label {
            return None;
        }
        if let Some(expected) = condition.value {
            if !node.value().is_some_and(|v| v.strictly_equals(&expected)) {
                return None;
            }
        } else if !condition.children.is_empty() {
            if node.value().is_some() {
                return None;
            }
        } else if condition.is_plain_leaf() && !node.children().is_empty() {
            return None;
        }

        let mut next = state.clone();
        if let Some(variable) = condition.variable.as_deref() {
            match next.binding(variable) {
                Some(bound) => {
                    if !self.forest.same_content(bound, child) {
                        return None;
                    }
                }
                None => next.bindings.push((variable, child)),
            }
        }
        if condition.kind.consumes() {
            next.taken.push((context, child));
        }
        if condition.kind == ConditionKind::Remove {
            next.effects.push(Pending {
                order: self.order_of(condition),
                effect: Effect::Remove {
                    context,
                    node: child,
                },
            });
        }

        let nested = (!condition.children.is_empty()).then_some(Goal::Set {
            context: Context::Node(child),
            conditions: &condition.children,
            ordered: condition.ordered,
            exhaustive: condition.exhaustive,
        });
        Some((next, nested))
    }
}
