//! CLI-level errors (wraps infrastructure errors)

use std::io;

use thiserror::Error;

use crate::application::ApplicationError;
use crate::exitcode;
use crate::infrastructure::InfraError;

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),
}

impl From<ApplicationError> for CliError {
    fn from(e: ApplicationError) -> Self {
        CliError::Infra(InfraError::Application(e))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Usage(_) => exitcode::USAGE,
            CliError::Infra(e) => infra_exit_code(e),
        }
    }
}

fn infra_exit_code(e: &InfraError) -> i32 {
    match e {
        InfraError::Io { .. } => exitcode::IOERR,
        InfraError::Toolchain { .. } => exitcode::SOFTWARE,
        InfraError::Application(e) => match e {
            ApplicationError::Domain(_)
            | ApplicationError::Compile(_)
            | ApplicationError::EmbeddedCode { .. } => exitcode::DATAERR,
            ApplicationError::Config { .. } => exitcode::CONFIG,
            ApplicationError::OperationFailed { source, .. } => {
                if let Some(inner) = source.downcast_ref::<InfraError>() {
                    infra_exit_code(inner)
                } else if let Some(io_err) = source.downcast_ref::<io::Error>() {
                    match io_err.kind() {
                        io::ErrorKind::NotFound => exitcode::NOINPUT,
                        io::ErrorKind::PermissionDenied => exitcode::CANTCREAT,
                        _ => exitcode::IOERR,
                    }
                } else {
                    exitcode::SOFTWARE
                }
            }
        },
    }
}
