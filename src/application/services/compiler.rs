//! Compiler service
//!
//! Turns a rule file (plus optional initial state) into a Cargo project and
//! optionally builds it with the host toolchain. Unchanged output is detected
//! through the fingerprint recorded in the generated `main.rs` and not rewritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::application::codegen::{generate, read_fingerprint, CodegenOptions, RuntimeDependency};
use crate::application::services::sources::Sources;
use crate::application::{ApplicationError, ApplicationResult, IoResultExt};
use crate::config::Settings;
use crate::domain::Program;
use crate::infrastructure::traits::{CommandRunner, FileSystem};
use crate::infrastructure::InfraError;

/// What to compile and where to put it.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub rules: PathBuf,
    pub state: Option<PathBuf>,
    /// Overrides the project directory derived from `out_dir` and the rule file name
    pub out_dir: Option<PathBuf>,
    /// Run `cargo build` on the generated project
    pub build: bool,
}

/// Result of a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub project_dir: PathBuf,
    pub fingerprint: String,
    /// False when the existing project already carried the same fingerprint
    pub written: bool,
    pub built: bool,
}

/// Service compiling rule files into standalone programs.
pub struct CompilerService {
    fs: Arc<dyn FileSystem>,
    cmd: Arc<dyn CommandRunner>,
    settings: Arc<Settings>,
}

impl CompilerService {
    /// Create a new compiler service.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        cmd: Arc<dyn CommandRunner>,
        settings: Arc<Settings>,
    ) -> Self {
        Self { fs, cmd, settings }
    }

    /// Parse and validate a rule file without generating anything.
    #[instrument(level = "debug", skip(self))]
    pub fn check(&self, rules: &Path) -> ApplicationResult<Program> {
        Sources::load(self.fs.as_ref(), rules, None).map(|sources| sources.program)
    }

    /// Generate the project for `request.rules` and optionally build it.
    #[instrument(level = "debug", skip(self), fields(rules = %request.rules.display()))]
    pub fn compile(&self, request: &CompileRequest) -> ApplicationResult<CompileOutput> {
        let sources = Sources::load(self.fs.as_ref(), &request.rules, request.state.as_deref())?;

        let project_dir = request
            .out_dir
            .clone()
            .unwrap_or_else(|| self.settings.project_dir(&request.rules));
        let options = self.codegen_options(&request.rules);
        let project = generate(&sources.program, &sources.state, &options);

        let manifest = project_dir.join("Cargo.toml");
        let main_rs = project_dir.join("src").join("main.rs");

        let written = if self.is_current(&main_rs, &project.fingerprint) {
            debug!(fingerprint = %project.fingerprint, "Generated program unchanged, skipping write");
            false
        } else {
            self.write(&manifest, &project.cargo_toml)?;
            self.write(&main_rs, &project.main_rs)?;
            info!(project = %project_dir.display(), "Wrote generated project");
            true
        };

        if request.build {
            self.build(&manifest)?;
        }

        Ok(CompileOutput {
            project_dir,
            fingerprint: project.fingerprint,
            written,
            built: request.build,
        })
    }

    fn codegen_options(&self, rules: &Path) -> CodegenOptions {
        let codegen = &self.settings.codegen;
        let runtime = match &codegen.runtime_path {
            Some(path) => RuntimeDependency::Path(path.clone()),
            None => RuntimeDependency::Version(codegen.runtime_version.clone()),
        };
        CodegenOptions {
            package: package_name(rules),
            source_name: rules
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| rules.display().to_string()),
            runtime,
            annotate: codegen.annotate,
            allow_lints: codegen.allow_lints.clone(),
        }
    }

    fn is_current(&self, main_rs: &Path, fingerprint: &str) -> bool {
        if !self.fs.is_file(main_rs) {
            return false;
        }
        match self.fs.read_to_string(main_rs) {
            Ok(existing) => read_fingerprint(&existing) == Some(fingerprint),
            Err(e) => {
                debug!("is_current: cannot read {}: {}", main_rs.display(), e);
                false
            }
        }
    }

    fn write(&self, path: &Path, content: &str) -> ApplicationResult<()> {
        self.fs
            .ensure_parent(path)
            .with_path_context("create directory for", path)?;
        self.fs.write(path, content).with_path_context("write", path)
    }

    /// Run the configured cargo on the generated manifest; its output is
    /// handed back unchanged on failure.
    #[instrument(level = "debug", skip(self))]
    fn build(&self, manifest: &Path) -> ApplicationResult<()> {
        let manifest_arg = manifest.to_string_lossy();
        let mut args = vec!["build", "--manifest-path", manifest_arg.as_ref()];
        if self.settings.build.release {
            args.push("--release");
        }
        let cargo = self.settings.build.cargo.as_str();
        debug!("build: {} {}", cargo, args.join(" "));

        let result = self
            .cmd
            .run(cargo, &args)
            .map_err(|e| ApplicationError::OperationFailed {
                context: format!("run {cargo}"),
                source: Box::new(e),
            })?;

        if !result.status.success() {
            let mut output = String::from_utf8_lossy(&result.stderr).to_string();
            output.push_str(&String::from_utf8_lossy(&result.stdout));
            return Err(ApplicationError::OperationFailed {
                context: format!("{cargo} build {}", manifest.display()),
                source: Box::new(InfraError::Toolchain {
                    message: output,
                    exit_code: result.status.code(),
                }),
            });
        }
        info!(manifest = %manifest.display(), "Built generated project");
        Ok(())
    }
}

/// Cargo package name for a rule file: its stem, lowercased, with anything
/// outside `[a-z0-9_-]` replaced by `-`.
pub(crate) fn package_name(rules: &Path) -> String {
    let stem = rules
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => name,
        Some(_) => format!("bonsai-{name}"),
        None => "bonsai-program".to_string(),
    }
}
