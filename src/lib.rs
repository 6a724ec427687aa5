//! bonsai: a compiler and runtime for a tree-rewriting rule language.
//!
//! Programs are rules over a forest of labeled nodes. The engine applies the
//! first rule that matches anywhere, repeatedly, until no rule matches or
//! embedded code asks to exit. `bonsai compile` turns a rule file into a Cargo
//! project linking this crate; generated sources only need [`prelude`].

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;

/// Everything a generated program refers to.
pub mod prelude {
    pub use crate::application::engine::{CompiledRule, Engine, Halt};
    pub use crate::application::transformer::{NodeHandle, Scope};
    pub use crate::domain::{Condition, ConditionKind, Rule, Value};
}
