//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on I/O boundary traits (FileSystem, CommandRunner)
//! but are themselves concrete structs, not traits.

mod compiler;
mod runner;
mod sources;

pub use compiler::{CompileOutput, CompileRequest, CompilerService};
pub use runner::{RunOutput, RunnerService};
pub use sources::Sources;
