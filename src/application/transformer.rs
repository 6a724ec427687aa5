//! Rule transformer: applies the effects of a match to the forest and runs
//! the rule's embedded code against a [`Scope`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{instrument, trace};

use crate::application::matcher::{Effect, Match};
use crate::domain::{
    Condition, Context, DomainError, DomainResult, Forest, Node, NodeId, StateView, Value,
};

/// Compiled form of a rule's code fragments.
pub type Action = Box<dyn Fn(&Scope<'_>)>;

/// What embedded code can see and touch while a rule is being applied.
///
/// Bound variables resolve to [`NodeHandle`]s. Nodes removed by the rule are
/// still readable here; they are released after the last fragment ran.
pub struct Scope<'a> {
    forest: RefCell<&'a mut Forest>,
    bindings: &'a BTreeMap<String, NodeId>,
    exit: Cell<Option<i32>>,
}

impl<'a> Scope<'a> {
    pub fn new(forest: &'a mut Forest, bindings: &'a BTreeMap<String, NodeId>) -> Self {
        Self {
            forest: RefCell::new(forest),
            bindings,
            exit: Cell::new(None),
        }
    }

    /// Handle of the node bound to `name`.
    pub fn node(&self, name: &str) -> NodeHandle<'_, 'a> {
        NodeHandle {
            scope: self,
            id: self.bindings.get(name).copied(),
        }
    }

    /// Stop the program with `status` once this fragment returns.
    /// Later fragments of the rule do not run.
    pub fn exit(&self, status: i32) {
        self.exit.set(Some(status));
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit.get()
    }

    /// Current state in the text format.
    pub fn state(&self) -> String {
        StateView::new(&self.forest.borrow()).to_string()
    }

    fn read<T>(&self, id: Option<NodeId>, f: impl FnOnce(&Node) -> T) -> Option<T> {
        let forest = self.forest.borrow();
        let result = id.and_then(|id| forest.get_node(id)).map(f);
        result
    }
}

/// A node as seen from embedded code.
#[derive(Clone, Copy)]
pub struct NodeHandle<'s, 'a> {
    scope: &'s Scope<'a>,
    id: Option<NodeId>,
}

impl<'s, 'a> NodeHandle<'s, 'a> {
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    /// False for unbound names and released nodes.
    pub fn exists(&self) -> bool {
        self.scope.read(self.id, |_| ()).is_some()
    }

    pub fn label(&self) -> String {
        self.scope
            .read(self.id, |n| n.label().to_string())
            .unwrap_or_default()
    }

    pub fn value(&self) -> Option<Value> {
        self.scope.read(self.id, Node::value).flatten()
    }

    pub fn integer(&self) -> Option<i64> {
        match self.value() {
            Some(Value::Integer(i)) => Some(i),
            _ => None,
        }
    }

    pub fn decimal(&self) -> Option<f64> {
        match self.value() {
            Some(Value::Decimal(d)) => Some(d),
            _ => None,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.scope.read(self.id, Node::is_ordered).unwrap_or(false)
    }

    pub fn children(&self) -> Vec<NodeHandle<'s, 'a>> {
        self.scope
            .read(self.id, |n| n.children().to_vec())
            .unwrap_or_default()
            .into_iter()
            .map(|id| NodeHandle {
                scope: self.scope,
                id: Some(id),
            })
            .collect()
    }

    /// First child carrying `label`.
    pub fn child(&self, label: &str) -> Option<NodeHandle<'s, 'a>> {
        self.children().into_iter().find(|c| c.label() == label)
    }

    fn require(&self) -> DomainResult<NodeId> {
        let id = self.id.ok_or(DomainError::UnboundHandle)?;
        if self.exists() {
            Ok(id)
        } else {
            Err(DomainError::StaleNode(id))
        }
    }

    pub fn set_value(&self, value: Option<Value>) -> DomainResult<()> {
        let id = self.require()?;
        self.scope.forest.borrow_mut().set_value(id, value)
    }

    pub fn set_integer(&self, value: i64) -> DomainResult<()> {
        self.set_value(Some(Value::Integer(value)))
    }

    pub fn set_decimal(&self, value: f64) -> DomainResult<()> {
        self.set_value(Some(Value::Decimal(value)))
    }

    /// Append a new leaf child.
    pub fn append(&self, label: &str) -> DomainResult<NodeHandle<'s, 'a>> {
        self.append_node(Node::new(label, false))
    }

    /// Append a new value-holding child.
    pub fn append_value(&self, label: &str, value: Value) -> DomainResult<NodeHandle<'s, 'a>> {
        self.append_node(Node::with_value(label, value))
    }

    fn append_node(&self, node: Node) -> DomainResult<NodeHandle<'s, 'a>> {
        let parent = self.require()?;
        let id = self
            .scope
            .forest
            .borrow_mut()
            .insert_node(Context::Node(parent), node)?;
        Ok(NodeHandle {
            scope: self.scope,
            id: Some(id),
        })
    }

    /// Detach and free `child` if it is a child of this node.
    pub fn remove_child(&self, child: &NodeHandle<'_, '_>) -> DomainResult<bool> {
        let parent = self.require()?;
        let Some(child) = child.id else {
            return Ok(false);
        };
        Ok(self
            .scope
            .forest
            .borrow_mut()
            .remove(Context::Node(parent), child))
    }
}

impl fmt::Display for NodeHandle<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl fmt::Debug for NodeHandle<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("label", &self.label())
            .finish()
    }
}

/// Apply a match: effects in declaration order, then code fragments.
///
/// Returns the exit status requested by a fragment, if any.
#[instrument(level = "trace", skip_all, fields(context = ?found.context))]
pub fn apply(forest: &mut Forest, found: &Match<'_>, actions: &[Action]) -> DomainResult<Option<i32>> {
    let mut detached = Vec::new();
    if let Err(err) = apply_effects(forest, found, &mut detached) {
        for node in detached {
            forest.release(node);
        }
        return Err(err);
    }

    let mut status = None;
    if !actions.is_empty() {
        let scope = Scope::new(forest, &found.bindings);
        for action in actions {
            action(&scope);
            if let Some(code) = scope.exit_status() {
                trace!(code, "Exit requested");
                status = Some(code);
                break;
            }
        }
    }

    for node in detached {
        forest.release(node);
    }
    Ok(status)
}

fn apply_effects(forest: &mut Forest, found: &Match<'_>, detached: &mut Vec<NodeId>) -> DomainResult<()> {
    for effect in &found.effects {
        match *effect {
            Effect::Remove { context, node } => {
                if forest.detach(context, node) {
                    detached.push(node);
                }
            }
            Effect::Create { context, condition } => {
                let id = build(forest, condition, &found.bindings)?;
                if let Err(err) = forest.attach(context, id) {
                    forest.release(id);
                    return Err(err);
                }
            }
        }
    }
    Ok(())
}

/// Detached node for a creating condition.
///
/// With a variable the node copies the bound node's content; otherwise it is
/// built from the condition's literal value and nested conditions.
fn build(
    forest: &mut Forest,
    condition: &Condition,
    bindings: &BTreeMap<String, NodeId>,
) -> DomainResult<NodeId> {
    if let Some(source) = condition.variable.as_ref().and_then(|v| bindings.get(v)) {
        let id = forest.copy_content(*source, condition.label.as_str())?;
        if condition.ordered {
            forest.set_ordered(id, true)?;
        }
        return Ok(id);
    }

    let node = match condition.value {
        Some(value) => Node::with_value(condition.label.as_str(), value),
        None => Node::new(condition.label.as_str(), condition.ordered),
    };
    let id = forest.allocate(node);
    for child in &condition.children {
        let attached = build(forest, child, bindings)
            .and_then(|child_id| forest.attach(Context::Node(id), child_id));
        if let Err(err) = attached {
            forest.release(id);
            return Err(err);
        }
    }
    Ok(id)
}
