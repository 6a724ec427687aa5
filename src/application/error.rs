//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::DomainError;

/// Static rule errors found before any code is generated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("line {line}: variable '{variable}' is used but never bound by a matching or removing condition")]
    UnboundVariable { variable: String, line: usize },

    #[error("line {line}: label '{label}' is reserved")]
    ReservedLabel { label: String, line: usize },

    #[error("line {line}: '^' may only appear as the first top-level condition of a rule")]
    MisplacedRoot { line: usize },
}

/// Result type for compile-time checks.
pub type CompileResult<T> = Result<T, CompileError>;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),

    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("rule on line {line} carries embedded code and cannot be interpreted; compile it instead")]
    EmbeddedCode { line: usize },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("operation failed: {context}")]
    OperationFailed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
