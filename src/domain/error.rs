//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::tree::NodeId;

/// Domain errors represent malformed input or misuse of the tree model.
/// These are independent of compilation and I/O concerns.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("invalid state on line {line}: {message}")]
    State { line: usize, message: String },

    #[error("no node is bound to this handle")]
    UnboundHandle,

    #[error("node no longer exists: {0:?}")]
    StaleNode(NodeId),

    #[error("node '{label}' holds a value and cannot have children")]
    ValueWithChildren { label: String },

    #[error("node '{label}' has children and cannot hold a value")]
    ChildrenWithValue { label: String },
}

impl DomainError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn state(line: usize, message: impl Into<String>) -> Self {
        Self::State {
            line,
            message: message.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
