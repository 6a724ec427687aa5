//! Application layer: services and use cases
//!
//! This layer orchestrates domain logic and depends on I/O boundary traits.

pub mod codegen;
pub mod engine;
pub mod error;
pub mod error_ext;
pub mod matcher;
pub mod services;
pub mod transformer;
pub mod validator;

pub use engine::{CompiledRule, Engine, Halt, Step};
pub use error::{ApplicationError, ApplicationResult, CompileError, CompileResult};
pub use error_ext::IoResultExt;
pub use transformer::{NodeHandle, Scope};
