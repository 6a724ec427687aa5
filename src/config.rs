//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/bonsai/bonsai.toml`
//! 3. Local config: `<project_dir>/.bonsai.toml`
//! 4. Environment variables: `BONSAI_*` prefix

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;

/// Lints silenced in generated programs by default; fragments often ignore results.
const DEFAULT_ALLOW_LINTS: [&str; 3] = ["unused_mut", "unused_must_use", "unused_variables"];

/// Code generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodegenConfig {
    /// Local checkout of the runtime crate; takes precedence over `runtime_version`
    pub runtime_path: Option<PathBuf>,
    /// Registry version requirement of the runtime crate
    pub runtime_version: String,
    /// Emit a `/* Label: (line N) */` comment above each rule constructor
    pub annotate: bool,
    /// Lints allowed at the top of the generated `main.rs`
    pub allow_lints: Vec<String>,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            runtime_path: None,
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            annotate: true,
            allow_lints: DEFAULT_ALLOW_LINTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Raw codegen config for intermediate parsing (arrays are Option to detect "not specified").
///
/// Used during layered config merging to distinguish between:
/// - `None` → field not specified, inherit from base
/// - `Some([])` → explicit empty array
/// - `Some([...])` → explicit values to merge
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawCodegenConfig {
    pub runtime_path: Option<PathBuf>,
    pub runtime_version: Option<String>,
    pub annotate: Option<bool>,
    pub allow_lints: Option<Vec<String>>,
}

impl CodegenConfig {
    /// Merge arrays with union semantics and negation support.
    ///
    /// - Items from overlay are added to base
    /// - Items prefixed with `!` remove the corresponding item from the result
    /// - Duplicates are de-duplicated
    ///
    /// # Examples
    /// ```ignore
    /// merge_array(&["a", "b"], &["c"])       // → ["a", "b", "c"]
    /// merge_array(&["a", "b"], &["!a", "c"]) // → ["b", "c"]
    /// ```
    pub fn merge_array(base: &[String], overlay: &[String]) -> Vec<String> {
        let mut result: HashSet<String> = base.iter().cloned().collect();

        for item in overlay {
            if let Some(negated) = item.strip_prefix('!') {
                result.remove(negated);
            } else {
                result.insert(item.clone());
            }
        }

        // Convert to sorted Vec for deterministic output
        let mut vec: Vec<String> = result.into_iter().collect();
        vec.sort();
        vec
    }

    /// Merge overlay config onto self (base).
    ///
    /// - Scalar options: overlay wins if Some, otherwise keep base
    /// - Arrays: union merge with negation support (if overlay specified)
    pub fn merge(&self, overlay: &RawCodegenConfig) -> Self {
        Self {
            runtime_path: overlay
                .runtime_path
                .clone()
                .or_else(|| self.runtime_path.clone()),
            runtime_version: overlay
                .runtime_version
                .clone()
                .unwrap_or_else(|| self.runtime_version.clone()),
            annotate: overlay.annotate.unwrap_or(self.annotate),
            allow_lints: overlay
                .allow_lints
                .as_ref()
                .map(|o| Self::merge_array(&self.allow_lints, o))
                .unwrap_or_else(|| self.allow_lints.clone()),
        }
    }

    /// Apply global config onto defaults.
    ///
    /// Unlike `merge()`, arrays use REPLACE semantics: if the global config
    /// specifies an array, it completely replaces the default array.
    pub fn apply_global(&self, global: &RawCodegenConfig) -> Self {
        Self {
            runtime_path: global
                .runtime_path
                .clone()
                .or_else(|| self.runtime_path.clone()),
            runtime_version: global
                .runtime_version
                .clone()
                .unwrap_or_else(|| self.runtime_version.clone()),
            annotate: global.annotate.unwrap_or(self.annotate),
            allow_lints: global
                .allow_lints
                .clone()
                .unwrap_or_else(|| self.allow_lints.clone()),
        }
    }
}

/// Settings for building generated projects with the host toolchain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Cargo executable
    pub cargo: String,
    /// Build with `--release`
    pub release: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cargo: "cargo".into(),
            release: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawBuildConfig {
    pub cargo: Option<String>,
    pub release: Option<bool>,
}

impl BuildConfig {
    fn merge(&self, overlay: &RawBuildConfig) -> Self {
        Self {
            cargo: overlay.cargo.clone().unwrap_or_else(|| self.cargo.clone()),
            release: overlay.release.unwrap_or(self.release),
        }
    }
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub codegen: RawCodegenConfig,
    #[serde(default)]
    pub build: RawBuildConfig,
}

/// Unified configuration for bonsai.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Directory receiving generated projects, one subdirectory per rule file
    pub out_dir: PathBuf,
    pub codegen: CodegenConfig,
    pub build: BuildConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("bonsai-out"),
            codegen: CodegenConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

/// Get the XDG config directory for bonsai.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "bonsai").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("bonsai.toml"))
}

/// Get the path to the local config file in a project directory.
pub fn local_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".bonsai.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

/// Expand `~`, `$VAR` and `${VAR}`; unknown variables leave the input unchanged.
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(raw.as_ref()) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

impl Settings {
    /// Output directory of the project generated for `rules`.
    pub fn project_dir(&self, rules: &Path) -> PathBuf {
        let stem = rules
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "program".into());
        self.out_dir.join(stem)
    }

    /// Expand shell variables and tilde in path-like fields.
    fn expand_paths(&mut self) {
        self.out_dir = expand_path(&self.out_dir);
        self.codegen.runtime_path = self.codegen.runtime_path.as_deref().map(expand_path);
    }

    /// Merge overlay config onto self (base) with union semantics for arrays.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            out_dir: overlay
                .out_dir
                .clone()
                .unwrap_or_else(|| self.out_dir.clone()),
            codegen: self.codegen.merge(&overlay.codegen),
            build: self.build.merge(&overlay.build),
        }
    }

    /// Apply global config onto defaults with REPLACE semantics for arrays.
    fn apply_global(&self, global: &RawSettings) -> Self {
        Self {
            out_dir: global
                .out_dir
                .clone()
                .unwrap_or_else(|| self.out_dir.clone()),
            codegen: self.codegen.apply_global(&global.codegen),
            build: self.build.merge(&global.build),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `project_dir` - Optional project directory for local config
    ///
    /// # Array Merge Semantics
    /// - Defaults → Global: REPLACE
    /// - Global → Local: UNION with `!item` negation
    /// - Any → Env vars: REPLACE
    pub fn load(project_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.apply_global(&raw);
            }
        }

        if let Some(project) = project_dir {
            let local_path = local_config_path(project);
            if local_path.exists() {
                let raw = load_raw_settings(&local_path)?;
                current = current.merge_with(&raw);
            }
        }

        current = Self::apply_env_overrides(current)?;
        current.expand_paths();

        Ok(current)
    }

    /// Load defaults plus a single config file, skipping the global and env layers.
    pub fn load_file(path: &Path) -> Result<Self, ApplicationError> {
        let raw = load_raw_settings(path)?;
        let mut settings = Self::default().merge_with(&raw);
        settings.expand_paths();
        Ok(settings)
    }

    /// Apply BONSAI_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("BONSAI")
                .separator("__")
                .list_separator(","),
        );

        let config = builder.build().map_err(config_err)?;

        if let Ok(val) = config.get_string("out_dir") {
            settings.out_dir = PathBuf::from(val);
        }
        if let Ok(val) = config.get_string("codegen.runtime_path") {
            settings.codegen.runtime_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = config.get_string("codegen.runtime_version") {
            settings.codegen.runtime_version = val;
        }
        if let Ok(val) = config.get_bool("codegen.annotate") {
            settings.codegen.annotate = val;
        }
        if let Ok(val) = config.get::<Vec<String>>("codegen.allow_lints") {
            settings.codegen.allow_lints = val;
        }
        if let Ok(val) = config.get_string("build.cargo") {
            settings.build.cargo = val;
        }
        if let Ok(val) = config.get_bool("build.release") {
            settings.build.release = val;
        }

        Ok(settings)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# bonsai configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/bonsai/bonsai.toml  (defines your baseline)
#   Local:  <project>/.bonsai.toml        (project-specific additions)
#   Env:    BONSAI_* environment variables, e.g. BONSAI_CODEGEN__ANNOTATE=false
#
# Array Merge Semantics:
#   Global config REPLACES compiled defaults.
#   Local config UNIONS with global.
#   Use "!item" in local config to REMOVE an inherited item:
#     allow_lints = ["dead_code", "!unused_mut"]

# Where generated projects are written (one subdirectory per rule file)
# out_dir = "bonsai-out"

[codegen]
# Link generated programs against a local checkout of the runtime
# runtime_path = "~/src/bonsai"

# Otherwise depend on this registry version
# runtime_version = "0.1"

# Comment each generated rule constructor with its first condition and line
# annotate = true

# Lints allowed in generated code
# allow_lints = ["unused_mut", "unused_must_use", "unused_variables"]

[build]
# Cargo executable used by `bonsai compile --build`
# cargo = "cargo"

# Build generated programs in release mode
# release = false
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn given_default_settings_when_created_then_annotates_and_allows_lints() {
        let settings = Settings::default();

        assert!(settings.codegen.annotate);
        assert!(settings.codegen.allow_lints.contains(&"unused_variables".to_string()));
        assert_eq!(settings.build.cargo, "cargo");
        assert_eq!(settings.codegen.runtime_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn given_tilde_in_out_dir_when_expand_paths_then_expands_to_home() {
        let mut settings = Settings {
            out_dir: PathBuf::from("~/bonsai-out"),
            ..Settings::default()
        };

        settings.expand_paths();

        let home = std::env::var("HOME").expect("HOME should be set");
        let out = settings.out_dir.to_string_lossy();
        assert!(out.starts_with(&home), "out_dir should start with home dir: {}", out);
        assert!(!out.contains('~'), "out_dir should not contain tilde: {}", out);
    }

    #[test]
    fn given_rules_file_when_resolving_project_dir_then_uses_file_stem() {
        let settings = Settings::default();

        let dir = settings.project_dir(Path::new("/tmp/rules/counter.bonsai"));

        assert_eq!(dir, PathBuf::from("bonsai-out/counter"));
    }

    #[test]
    fn test_merge_array_union_and_negation() {
        let base = strings(&["a", "b"]);
        let overlay = strings(&["!a", "c", "b"]);

        let result = CodegenConfig::merge_array(&base, &overlay);

        assert_eq!(result, strings(&["b", "c"]));
    }

    #[test]
    fn test_merge_codegen_config() {
        let base = CodegenConfig::default();
        let overlay = RawCodegenConfig {
            runtime_path: Some(PathBuf::from("/src/bonsai")),
            runtime_version: None,
            annotate: Some(false),
            allow_lints: Some(strings(&["dead_code", "!unused_mut"])),
        };

        let result = base.merge(&overlay);

        assert_eq!(result.runtime_path, Some(PathBuf::from("/src/bonsai")));
        assert_eq!(result.runtime_version, base.runtime_version);
        assert!(!result.annotate);
        assert_eq!(
            result.allow_lints,
            strings(&["dead_code", "unused_must_use", "unused_variables"])
        );
    }

    #[test]
    fn test_apply_global_replaces_arrays() {
        let base = CodegenConfig::default();
        let global = RawCodegenConfig {
            allow_lints: Some(strings(&["dead_code"])),
            ..Default::default()
        };

        let result = base.apply_global(&global);

        assert_eq!(result.allow_lints, strings(&["dead_code"]));
        assert!(result.annotate);
    }
}
