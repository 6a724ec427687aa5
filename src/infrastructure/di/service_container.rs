//! Service container for dependency injection
//!
//! Wires up all services with their dependencies.

use std::sync::Arc;

use crate::application::services::{CompilerService, RunnerService};
use crate::config::Settings;
use crate::infrastructure::traits::{CommandRunner, FileSystem, RealCommandRunner, RealFileSystem};

/// Container holding all application services.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Filesystem abstraction
    pub fs: Arc<dyn FileSystem>,

    /// Command runner abstraction
    pub cmd: Arc<dyn CommandRunner>,

    pub compiler: CompilerService,
    pub runner: RunnerService,
}

impl ServiceContainer {
    /// Create a new service container with real implementations.
    pub fn new(settings: Settings) -> Self {
        Self::with_deps(
            settings,
            Arc::new(RealFileSystem),
            Arc::new(RealCommandRunner),
        )
    }

    /// Create a service container with custom dependencies (for testing).
    pub fn with_deps(
        settings: Settings,
        fs: Arc<dyn FileSystem>,
        cmd: Arc<dyn CommandRunner>,
    ) -> Self {
        let settings = Arc::new(settings);
        let compiler = CompilerService::new(fs.clone(), cmd.clone(), settings.clone());
        let runner = RunnerService::new(fs.clone());

        Self {
            settings,
            fs,
            cmd,
            compiler,
            runner,
        }
    }
}
