use generational_arena::{Arena, Index};
use std::fmt;
use tracing::instrument;

use crate::domain::error::{DomainError, DomainResult};

/// Handle of a node stored in a [`Forest`].
///
/// Handles are generational: once a node is released its handle stops
/// resolving, even if the slot is reused by a later node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Index);

/// Scalar payload of a value-holding node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i64),
    Decimal(f64),
}

impl Value {
    /// Type-strict equality: an Integer never equals a Decimal.
    pub fn strictly_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            // Debug formatting keeps the fractional part: 5.0 prints as "5.0"
            Value::Decimal(d) => write!(f, "{d:?}"),
        }
    }
}

/// Labeled tree element.
///
/// Invariant: a node never holds a value and children at the same time.
#[derive(Debug, Clone)]
pub struct Node {
    label: String,
    value: Option<Value>,
    children: Vec<NodeId>,
    ordered: bool,
}

impl Node {
    pub fn new(label: impl Into<String>, ordered: bool) -> Self {
        Self {
            label: label.into(),
            value: None,
            children: Vec::new(),
            ordered,
        }
    }

    pub fn with_value(label: impl Into<String>, value: Value) -> Self {
        Self {
            label: label.into(),
            value: Some(value),
            children: Vec::new(),
            ordered: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> Option<Value> {
        self.value
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether patterns must respect the order of this node's children.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }
}

/// A place whose children can be matched against: the root forest or a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Root,
    Node(NodeId),
}

/// Arena-backed forest holding the whole program state.
///
/// Nodes reference their children by [`NodeId`]; there are no parent pointers.
/// The root context is the ordered list of root-level nodes and is itself
/// treated as unordered by patterns.
#[derive(Debug, Default)]
pub struct Forest {
    /// Arena storage for every live node, attached or not
    arena: Arena<Node>,
    /// Root-level nodes in order
    roots: Vec<NodeId>,
}

impl Forest {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            roots: Vec::new(),
        }
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id.0)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id.0)
    }

    fn node(&self, id: NodeId) -> DomainResult<&Node> {
        self.get_node(id).ok_or(DomainError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomainResult<&mut Node> {
        self.get_node_mut(id).ok_or(DomainError::StaleNode(id))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of live nodes, including detached ones not yet released.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Children of a context; a stale node has none.
    pub fn children(&self, context: Context) -> &[NodeId] {
        match context {
            Context::Root => &self.roots,
            Context::Node(id) => self.get_node(id).map(Node::children).unwrap_or(&[]),
        }
    }

    pub fn is_ordered(&self, context: Context) -> bool {
        match context {
            Context::Root => false,
            Context::Node(id) => self.get_node(id).is_some_and(Node::is_ordered),
        }
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.get_node(id).map(Node::label)
    }

    /// Store a node without attaching it anywhere.
    pub fn allocate(&mut self, node: Node) -> NodeId {
        NodeId(self.arena.insert(node))
    }

    /// Allocate a node and append it to the children of `context`.
    #[instrument(level = "trace", skip(self, node), fields(label = %node.label))]
    pub fn insert_node(&mut self, context: Context, node: Node) -> DomainResult<NodeId> {
        let id = self.allocate(node);
        if let Err(e) = self.attach(context, id) {
            self.release(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Append an already allocated node to the children of `context`.
    pub fn attach(&mut self, context: Context, id: NodeId) -> DomainResult<()> {
        self.node(id)?;
        match context {
            Context::Root => self.roots.push(id),
            Context::Node(parent) => {
                let parent = self.node_mut(parent)?;
                if parent.value.is_some() {
                    return Err(DomainError::ValueWithChildren {
                        label: parent.label.clone(),
                    });
                }
                parent.children.push(id);
            }
        }
        Ok(())
    }

    /// Unlink `id` from the children of `context` without freeing it.
    ///
    /// Returns false when `id` was not a child of `context`.
    #[instrument(level = "trace", skip(self))]
    pub fn detach(&mut self, context: Context, id: NodeId) -> bool {
        let children = match context {
            Context::Root => &mut self.roots,
            Context::Node(parent) => match self.arena.get_mut(parent.0) {
                Some(parent) => &mut parent.children,
                None => return false,
            },
        };
        match children.iter().position(|child| *child == id) {
            Some(position) => {
                children.remove(position);
                true
            }
            None => false,
        }
    }

    /// Free a node and its whole subtree. The node must already be detached.
    #[instrument(level = "trace", skip(self))]
    pub fn release(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.arena.remove(current.0) {
                stack.extend(node.children);
            }
        }
    }

    /// Detach and free in one go.
    pub fn remove(&mut self, context: Context, id: NodeId) -> bool {
        let detached = self.detach(context, id);
        if detached {
            self.release(id);
        }
        detached
    }

    /// Replace (or clear) the value of a node.
    pub fn set_value(&mut self, id: NodeId, value: Option<Value>) -> DomainResult<()> {
        let node = self.node_mut(id)?;
        if value.is_some() && !node.children.is_empty() {
            return Err(DomainError::ChildrenWithValue {
                label: node.label.clone(),
            });
        }
        if value.is_some() {
            node.ordered = false;
        }
        node.value = value;
        Ok(())
    }

    /// Mark a node's children as ordered; value holders stay unordered.
    pub fn set_ordered(&mut self, id: NodeId, ordered: bool) -> DomainResult<()> {
        let node = self.node_mut(id)?;
        if node.value.is_none() {
            node.ordered = ordered;
        }
        Ok(())
    }

    /// Detached deep copy of a subtree.
    pub fn deep_clone(&mut self, id: NodeId) -> DomainResult<NodeId> {
        let label = self.node(id)?.label.clone();
        self.copy_content(id, label)
    }

    /// Detached node called `label` whose content is a deep copy of `source`'s.
    pub fn copy_content(&mut self, source: NodeId, label: impl Into<String>) -> DomainResult<NodeId> {
        let template = self.node(source)?.clone();
        let mut copy = Node {
            label: label.into(),
            value: template.value,
            children: Vec::with_capacity(template.children.len()),
            ordered: template.ordered,
        };
        for child in &template.children {
            copy.children.push(self.deep_clone(*child)?);
        }
        Ok(self.allocate(copy))
    }

    /// Content equality used for repeated variables.
    ///
    /// The labels of `a` and `b` themselves are ignored; shapes must agree,
    /// values compare type-strictly and children pair up one-to-one by label
    /// and content (positionally when ordered, as a multiset otherwise).
    pub fn same_content(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(x), Some(y)) = (self.get_node(a), self.get_node(b)) else {
            return false;
        };
        match (x.value, y.value) {
            (Some(v), Some(w)) => return v.strictly_equals(&w),
            (None, None) => {}
            _ => return false,
        }
        if x.children.len() != y.children.len() {
            return false;
        }
        if x.children.is_empty() {
            return true;
        }
        if x.ordered != y.ordered {
            return false;
        }
        if x.ordered {
            return x
                .children
                .iter()
                .zip(&y.children)
                .all(|(c, d)| self.same_subtree(*c, *d));
        }
        // Subtree equality is an equivalence, so greedy pairing is exact
        let mut unpaired = y.children.clone();
        for child in &x.children {
            match unpaired.iter().position(|other| self.same_subtree(*child, *other)) {
                Some(position) => {
                    unpaired.swap_remove(position);
                }
                None => return false,
            }
        }
        true
    }

    fn same_subtree(&self, a: NodeId, b: NodeId) -> bool {
        self.label(a) == self.label(b) && self.same_content(a, b)
    }

    /// Candidate match contexts: the root first, then every node in
    /// pre-order, depth-first, left to right. Value holders are skipped.
    pub fn contexts(&self) -> ContextIterator<'_> {
        ContextIterator::new(self)
    }

    /// Pre-order walk over attached nodes.
    pub fn iter(&self) -> TreeIterator<'_> {
        TreeIterator::new(self)
    }
}

pub struct TreeIterator<'a> {
    forest: &'a Forest,
    stack: Vec<NodeId>,
}

impl<'a> TreeIterator<'a> {
    fn new(forest: &'a Forest) -> Self {
        let stack = forest.roots.iter().rev().copied().collect();
        Self { forest, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            if let Some(node) = self.forest.get_node(current) {
                // Push children in reverse order for left-to-right traversal
                self.stack.extend(node.children.iter().rev());
                return Some((current, node));
            }
        }
        None
    }
}

pub struct ContextIterator<'a> {
    root_pending: bool,
    nodes: TreeIterator<'a>,
}

impl<'a> ContextIterator<'a> {
    fn new(forest: &'a Forest) -> Self {
        Self {
            root_pending: true,
            nodes: forest.iter(),
        }
    }
}

impl Iterator for ContextIterator<'_> {
    type Item = Context;

    fn next(&mut self) -> Option<Self::Item> {
        if std::mem::take(&mut self.root_pending) {
            return Some(Context::Root);
        }
        self.nodes
            .by_ref()
            .find(|(_, node)| node.value.is_none())
            .map(|(id, _)| Context::Node(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(forest: &mut Forest, context: Context, label: &str) -> NodeId {
        forest.insert_node(context, Node::new(label, false)).unwrap()
    }

    #[test]
    fn given_nested_nodes_when_iterating_contexts_then_root_comes_first_then_preorder() {
        let mut forest = Forest::new();
        let a = leaf(&mut forest, Context::Root, "A");
        let b = leaf(&mut forest, Context::Node(a), "B");
        let c = leaf(&mut forest, Context::Root, "C");
        forest
            .insert_node(Context::Node(b), Node::with_value("V", Value::Integer(1)))
            .unwrap();

        let contexts: Vec<Context> = forest.contexts().collect();

        assert_eq!(
            contexts,
            vec![
                Context::Root,
                Context::Node(a),
                Context::Node(b),
                Context::Node(c)
            ]
        );
    }

    #[test]
    fn given_released_node_when_resolving_handle_then_it_is_stale() {
        let mut forest = Forest::new();
        let a = leaf(&mut forest, Context::Root, "A");
        let b = leaf(&mut forest, Context::Node(a), "B");

        assert!(forest.remove(Context::Root, a));

        assert!(forest.get_node(a).is_none());
        assert!(forest.get_node(b).is_none());
        assert_eq!(forest.len(), 0);
    }

    #[test]
    fn given_value_holder_when_attaching_child_then_errors() {
        let mut forest = Forest::new();
        let v = forest
            .insert_node(Context::Root, Node::with_value("V", Value::Integer(3)))
            .unwrap();

        let result = forest.insert_node(Context::Node(v), Node::new("Child", false));

        assert!(matches!(result, Err(DomainError::ValueWithChildren { .. })));
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn given_integer_and_decimal_when_comparing_then_not_equal() {
        assert!(!Value::Integer(5).strictly_equals(&Value::Decimal(5.0)));
        assert!(Value::Decimal(5.3).strictly_equals(&Value::Decimal(5.3)));
        assert_eq!(Value::Decimal(5.0).to_string(), "5.0");
    }

    #[test]
    fn given_unordered_children_in_different_order_when_comparing_then_same_content() {
        let mut forest = Forest::new();
        let x = leaf(&mut forest, Context::Root, "X");
        leaf(&mut forest, Context::Node(x), "A");
        leaf(&mut forest, Context::Node(x), "B");
        let y = leaf(&mut forest, Context::Root, "Y");
        leaf(&mut forest, Context::Node(y), "B");
        leaf(&mut forest, Context::Node(y), "A");

        assert!(forest.same_content(x, y));
    }

    #[test]
    fn given_copy_when_mutating_original_then_copy_is_unchanged() {
        let mut forest = Forest::new();
        let x = leaf(&mut forest, Context::Root, "X");
        let child = forest
            .insert_node(Context::Node(x), Node::with_value("C", Value::Integer(1)))
            .unwrap();

        let copy = forest.copy_content(x, "Copy").unwrap();
        forest.set_value(child, Some(Value::Integer(2))).unwrap();

        let copied_child = forest.get_node(copy).unwrap().children()[0];
        assert_eq!(forest.label(copy), Some("Copy"));
        assert_eq!(
            forest.get_node(copied_child).unwrap().value(),
            Some(Value::Integer(1))
        );
    }
}
