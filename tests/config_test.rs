//! Integration tests for Settings config loading with layered merge semantics.
//!
//! Merge Semantics:
//! - Defaults → Global: REPLACE (global defines the real baseline)
//! - Global → Local: UNION with negation support (project adds its own lints)
//! - Any → Env vars: REPLACE (explicit user override)
//!
//! Note: These tests run without a global config (temp directories only),
//! so they effectively test local config merging with defaults.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use bonsai::config::{local_config_path, CodegenConfig, Settings};

// ============================================================
// Settings::load() local config union merge tests
// ============================================================

#[test]
fn given_local_config_with_lints_when_load_then_unions_with_current() {
    // Arrange
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(".bonsai.toml"),
        "[codegen]\nallow_lints = [\"dead_code\"]\n",
    )
    .unwrap();

    // Act
    let settings = Settings::load(Some(project.path())).expect("load settings");

    // Assert: defaults plus the local addition
    let lints = &settings.codegen.allow_lints;
    assert!(lints.contains(&"unused_mut".to_string()));
    assert!(lints.contains(&"unused_must_use".to_string()));
    assert!(lints.contains(&"dead_code".to_string()));
}

#[test]
fn given_local_config_with_negation_when_load_then_removes_inherited_item() {
    // Arrange
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(".bonsai.toml"),
        "[codegen]\nallow_lints = [\"!unused_mut\", \"dead_code\"]\n",
    )
    .unwrap();

    // Act
    let settings = Settings::load(Some(project.path())).expect("load settings");

    // Assert
    let lints = &settings.codegen.allow_lints;
    assert!(!lints.contains(&"unused_mut".to_string()));
    assert!(lints.contains(&"dead_code".to_string()));
}

#[test]
fn given_local_config_with_scalars_when_load_then_overrides_defaults() {
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(".bonsai.toml"),
        "out_dir = \"target/generated\"\n\n[codegen]\nannotate = false\n\n[build]\nrelease = true\n",
    )
    .unwrap();

    let settings = Settings::load(Some(project.path())).expect("load settings");

    assert_eq!(settings.out_dir, PathBuf::from("target/generated"));
    assert!(!settings.codegen.annotate);
    assert!(settings.build.release);
}

#[test]
fn given_no_local_config_when_load_then_local_layer_is_skipped() {
    let project = TempDir::new().unwrap();

    let settings = Settings::load(Some(project.path())).expect("load settings");

    assert!(!local_config_path(project.path()).exists());
    assert_eq!(settings.build.cargo, Settings::default().build.cargo);
}

#[test]
fn given_malformed_local_config_when_load_then_reports_config_error() {
    let project = TempDir::new().unwrap();
    fs::write(project.path().join(".bonsai.toml"), "[codegen\nannotate = ").unwrap();

    let err = Settings::load(Some(project.path())).unwrap_err();

    assert!(err.to_string().contains(".bonsai.toml"));
}

// ============================================================
// Settings::load_file()
// ============================================================

#[test]
fn given_config_file_with_tilde_runtime_when_load_file_then_path_is_expanded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bonsai.toml");
    fs::write(&path, "[codegen]\nruntime_path = \"~/src/bonsai\"\n").unwrap();

    let settings = Settings::load_file(&path).expect("load file");

    let runtime = settings.codegen.runtime_path.expect("runtime path");
    assert!(!runtime.to_string_lossy().starts_with('~'));
    assert!(runtime.ends_with("src/bonsai"));
}

// ============================================================
// Template, serialization, project directories
// ============================================================

#[test]
fn given_template_when_parsed_then_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bonsai.toml");
    fs::write(&path, Settings::template()).unwrap();

    let settings = Settings::load_file(&path).expect("template parses");

    assert_eq!(settings, Settings::default());
}

#[test]
fn given_settings_when_serialized_then_round_trips_through_toml() {
    let settings = Settings::default();

    let text = settings.to_toml().unwrap();
    let parsed: Settings = toml::from_str(&text).unwrap();

    assert_eq!(parsed, settings);
}

#[test]
fn given_rules_file_when_deriving_project_dir_then_uses_stem_under_out_dir() {
    let settings = Settings::default();

    let dir = settings.project_dir(Path::new("rules/counter.bonsai"));

    assert_eq!(dir, PathBuf::from("bonsai-out").join("counter"));
}

#[test]
fn given_overlay_with_negation_when_merging_arrays_then_result_is_sorted() {
    let base = vec!["b".to_string(), "a".to_string()];
    let overlay = vec!["!b".to_string(), "c".to_string(), "a".to_string()];

    let merged = CodegenConfig::merge_array(&base, &overlay);

    assert_eq!(merged, vec!["a".to_string(), "c".to_string()]);
}
