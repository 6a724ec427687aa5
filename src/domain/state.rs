//! Text format of a program state.
//!
//! One node per line, two spaces of indentation per depth:
//! `Label:` leaf, `Label::` ordered node, `Label: 5` / `Label: 5.0` value holder.
//! The same format is used for diagnostics and for bootstrap states.

use std::fmt;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::tree::{Context, Forest, Node, NodeId, Value};

pub const INDENT: &str = "  ";

/// One parsed line of a state or rule file: everything after the indentation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line<'a> {
    pub depth: usize,
    pub text: &'a str,
}

/// Split a line into depth and trimmed text; the indentation must be a
/// multiple of two spaces.
pub(crate) fn split_indent(line_no: usize, raw: &str) -> DomainResult<Line<'_>> {
    let text = raw.trim_start_matches(' ');
    let width = raw.len() - text.len();
    if text.starts_with('\t') {
        return Err(DomainError::syntax(line_no, "tabs are not allowed in indentation"));
    }
    if width % INDENT.len() != 0 {
        return Err(DomainError::syntax(
            line_no,
            format!("indentation of {width} spaces is not a multiple of two"),
        ));
    }
    Ok(Line {
        depth: width / INDENT.len(),
        text: text.trim_end(),
    })
}

/// Parse a literal: integers first, then decimals.
pub fn parse_value(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let looks_numeric = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.');
    if looks_numeric {
        text.parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(Value::Decimal)
    } else {
        None
    }
}

fn parse_node(line_no: usize, text: &str) -> DomainResult<Node> {
    let Some((label, rest)) = text.split_once(':') else {
        return Err(DomainError::state(line_no, format!("missing ':' in '{text}'")));
    };
    let label = label.trim();
    if label.is_empty() {
        return Err(DomainError::state(line_no, "empty label"));
    }
    if let Some(rest) = rest.strip_prefix(':') {
        if !rest.trim().is_empty() {
            return Err(DomainError::state(
                line_no,
                format!("ordered node '{label}' cannot hold a value"),
            ));
        }
        return Ok(Node::new(label, true));
    }
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Node::new(label, false));
    }
    match parse_value(rest) {
        Some(value) => Ok(Node::with_value(label, value)),
        None => Err(DomainError::state(
            line_no,
            format!("'{rest}' is not an integer or decimal value"),
        )),
    }
}

/// Parse a state description into a fresh forest.
pub fn parse_state(text: &str) -> DomainResult<Forest> {
    let mut forest = Forest::new();
    // Path from the root context down to the most recent node
    let mut path: Vec<NodeId> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let line = split_indent(line_no, raw).map_err(|e| match e {
            DomainError::Syntax { line, message } => DomainError::State { line, message },
            other => other,
        })?;
        if line.depth > path.len() {
            return Err(DomainError::state(
                line_no,
                format!("indented {} levels below its parent", line.depth - path.len()),
            ));
        }
        path.truncate(line.depth);

        let context = path.last().map_or(Context::Root, |id| Context::Node(*id));
        let node = parse_node(line_no, line.text)?;
        let id = forest.insert_node(context, node).map_err(|e| match e {
            DomainError::ValueWithChildren { label } => DomainError::state(
                line_no,
                format!("'{label}' holds a value and cannot have children"),
            ),
            other => other,
        })?;
        path.push(id);
    }
    Ok(forest)
}

/// Renders a forest in the state text format.
pub struct StateView<'a> {
    forest: &'a Forest,
    hidden: Option<&'a str>,
}

impl<'a> StateView<'a> {
    pub fn new(forest: &'a Forest) -> Self {
        Self {
            forest,
            hidden: None,
        }
    }

    /// Omit root-level nodes carrying `label`.
    pub fn hiding(mut self, label: &'a str) -> Self {
        self.hidden = Some(label);
        self
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let Some(node) = self.forest.get_node(id) else {
            return Ok(());
        };
        write!(f, "{}{}:", INDENT.repeat(depth), node.label())?;
        if node.is_ordered() {
            write!(f, ":")?;
        } else if let Some(value) = node.value() {
            write!(f, " {value}")?;
        }
        writeln!(f)?;
        for child in node.children() {
            self.write_node(f, *child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for StateView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in self.forest.roots() {
            if self.hidden.is_some() && self.forest.label(*root) == self.hidden {
                continue;
            }
            self.write_node(f, *root, 0)?;
        }
        Ok(())
    }
}

impl fmt::Display for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StateView::new(self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_nested_state_when_parsing_then_rendering_reproduces_it() {
        let text = "Foo::\n  Bar: 5\n  Baz: 5.0\nQux:\n  Quux:\n";

        let forest = parse_state(text).unwrap();

        assert_eq!(forest.to_string(), text);
    }

    #[test]
    fn given_child_under_value_holder_when_parsing_then_errors_with_line() {
        let result = parse_state("Foo: 5\n  Bar:");

        assert!(matches!(result, Err(DomainError::State { line: 2, .. })));
    }

    #[test]
    fn given_indentation_jump_when_parsing_then_errors() {
        let result = parse_state("Foo:\n    Bar:");

        assert!(matches!(result, Err(DomainError::State { line: 2, .. })));
    }

    #[test]
    fn given_hidden_label_when_rendering_then_root_nodes_with_it_are_omitted() {
        let forest = parse_state("Started:\nFoo:\n  Started:").unwrap();

        let rendered = StateView::new(&forest).hiding("Started").to_string();

        assert_eq!(rendered, "Foo:\n  Started:\n");
    }

    #[test]
    fn given_non_numeric_value_when_parsing_then_errors() {
        assert!(parse_state("Foo: bar").is_err());
        assert_eq!(parse_value("-3"), Some(Value::Integer(-3)));
        assert_eq!(parse_value("2.5"), Some(Value::Decimal(2.5)));
        assert_eq!(parse_value("X"), None);
    }
}
