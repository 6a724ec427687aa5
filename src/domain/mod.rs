//! Domain layer: tree model, rule model and their text formats
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod condition;
pub mod error;
pub mod state;
pub mod syntax;
pub mod tree;

pub use condition::{CodeFragment, Condition, ConditionKind, Multiplicity, Program, Rule};
pub use error::{DomainError, DomainResult};
pub use state::{parse_state, StateView};
pub use syntax::{parse_program, ROOT_LABEL};
pub use tree::{Context, Forest, Node, NodeId, Value};
