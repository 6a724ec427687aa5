//! Tests for CompilerService and RunnerService

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use bonsai::application::services::{CompileRequest, CompilerService, RunnerService};
use bonsai::application::{ApplicationError, CompileError, Halt};
use bonsai::config::Settings;
use bonsai::infrastructure::traits::{CommandRunner, RealFileSystem};
use bonsai::infrastructure::InfraError;
use bonsai::util::testing;

/// Records invocations and answers with a fixed exit status.
struct FakeCargo {
    calls: Mutex<Vec<Vec<String>>>,
    status: i32,
    stderr: &'static str,
}

impl FakeCargo {
    fn new(status: i32, stderr: &'static str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status,
            stderr,
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeCargo {
    fn run(&self, cmd: &str, args: &[&str]) -> io::Result<Output> {
        let mut call = vec![cmd.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);
        Ok(Output {
            status: ExitStatus::from_raw(self.status << 8),
            stdout: Vec::new(),
            stderr: self.stderr.as_bytes().to_vec(),
        })
    }
}

fn settings(out_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.out_dir = out_dir.to_path_buf();
    settings.codegen.runtime_path = Some(PathBuf::from("/opt/bonsai"));
    settings
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

fn compiler(dir: &TempDir, cargo: Arc<FakeCargo>) -> CompilerService {
    testing::init_test_setup();
    CompilerService::new(
        Arc::new(RealFileSystem),
        cargo,
        Arc::new(settings(&dir.path().join("out"))),
    )
}

// ============================================================
// compile()
// ============================================================

#[test]
fn given_rules_when_compiling_then_project_lands_in_out_dir_named_after_rules() {
    // Arrange
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "counter.bonsai", "-Tick:\n+Tock:\n");
    let state = write(&temp, "start.state", "Tick:\n");
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));

    // Act
    let output = service
        .compile(&CompileRequest {
            rules,
            state: Some(state),
            ..Default::default()
        })
        .unwrap();

    // Assert
    assert_eq!(output.project_dir, temp.path().join("out").join("counter"));
    assert!(output.written);
    assert!(!output.built);
    let main_rs = std::fs::read_to_string(output.project_dir.join("src/main.rs")).unwrap();
    assert!(main_rs.contains(&output.fingerprint));
    assert!(main_rs.contains("\"Tick\""));
    let manifest = std::fs::read_to_string(output.project_dir.join("Cargo.toml")).unwrap();
    assert!(manifest.contains("name = \"counter\""));
}

#[test]
fn given_unchanged_rules_when_compiling_again_then_output_is_not_rewritten() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "same.bonsai", "-Foo:\n");
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));
    let request = CompileRequest {
        rules: rules.clone(),
        ..Default::default()
    };

    let first = service.compile(&request).unwrap();
    let second = service.compile(&request).unwrap();
    std::fs::write(&rules, "-Bar:\n").unwrap();
    let third = service.compile(&request).unwrap();

    assert!(first.written);
    assert!(!second.written);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert!(third.written);
    assert_ne!(first.fingerprint, third.fingerprint);
}

#[test]
fn given_output_override_when_compiling_then_project_goes_there() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "x.bonsai", "-Foo:\n");
    let target = temp.path().join("elsewhere");
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));

    let output = service
        .compile(&CompileRequest {
            rules,
            out_dir: Some(target.clone()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(output.project_dir, target);
    assert!(target.join("src/main.rs").is_file());
}

#[test]
fn given_build_flag_when_compiling_then_cargo_builds_the_manifest() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "build.bonsai", "-Foo:\n");
    let cargo = Arc::new(FakeCargo::new(0, ""));
    let service = compiler(&temp, cargo.clone());

    let output = service
        .compile(&CompileRequest {
            rules,
            build: true,
            ..Default::default()
        })
        .unwrap();

    assert!(output.built);
    let manifest = output.project_dir.join("Cargo.toml");
    assert_eq!(
        cargo.calls(),
        vec![vec![
            "cargo".to_string(),
            "build".to_string(),
            "--manifest-path".to_string(),
            manifest.to_string_lossy().to_string(),
        ]]
    );
}

#[test]
fn given_failing_toolchain_when_building_then_its_output_is_propagated() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "broken.bonsai", "Foo:\n< not_valid_code;\n");
    let service = compiler(&temp, Arc::new(FakeCargo::new(101, "error[E0425]: cannot find value")));

    let result = service.compile(&CompileRequest {
        rules,
        build: true,
        ..Default::default()
    });

    let Err(ApplicationError::OperationFailed { source, .. }) = result else {
        panic!("expected a toolchain failure, got {result:?}");
    };
    match source.downcast_ref::<InfraError>() {
        Some(InfraError::Toolchain { message, exit_code }) => {
            assert!(message.contains("cannot find value"));
            assert_eq!(*exit_code, Some(101));
        }
        other => panic!("unexpected source: {other:?}"),
    }
}

#[test]
fn given_unbound_variable_when_compiling_then_nothing_is_written() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "unbound.bonsai", "Foo:\n< $X.set_integer(1);\n");
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));

    let result = service.compile(&CompileRequest {
        rules,
        ..Default::default()
    });

    assert!(matches!(
        result,
        Err(ApplicationError::Compile(CompileError::UnboundVariable { ref variable, line: 2 })) if variable == "X"
    ));
    assert!(!temp.path().join("out").exists());
}

#[test]
fn given_reserved_label_in_state_when_compiling_then_rejected() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "r.bonsai", "-Foo:\n");
    let state = write(&temp, "s.state", "Foo:\n  Started:\n");
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));

    let result = service.compile(&CompileRequest {
        rules,
        state: Some(state),
        ..Default::default()
    });

    assert!(matches!(
        result,
        Err(ApplicationError::Compile(CompileError::ReservedLabel { line: 2, .. }))
    ));
}

#[test]
fn given_missing_rules_file_when_checking_then_error_names_the_path() {
    let temp = TempDir::new().unwrap();
    let service = compiler(&temp, Arc::new(FakeCargo::new(0, "")));

    let err = service.check(&temp.path().join("missing.bonsai")).unwrap_err();

    assert!(err.to_string().contains("missing.bonsai"));
}

// ============================================================
// RunnerService
// ============================================================

#[test]
fn given_terminating_rules_when_running_then_reports_diagnostic_and_status() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "drain.bonsai", "-Item:\n");
    let state = write(&temp, "items.state", "Item:\nItem:\nKeep: 1.5\n");
    let runner = RunnerService::new(Arc::new(RealFileSystem));

    let output = runner.run(&rules, Some(&state), None).unwrap();

    assert_eq!(output.halt, Some(Halt::NoMatch));
    assert_eq!(output.status(), 1);
    assert_eq!(output.steps, 3);
    assert_eq!(output.diagnostic.as_deref(), Some("No rules to apply!\nKeep: 1.5\n"));
}

#[test]
fn given_endless_rules_when_running_with_limit_then_gives_up() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "grow.bonsai", "+Leaf:\n");
    let runner = RunnerService::new(Arc::new(RealFileSystem));

    let output = runner.run(&rules, None, Some(5)).unwrap();

    assert_eq!(output.halt, None);
    assert_eq!(output.steps, 5);
    assert_eq!(output.diagnostic, None);
}

#[test]
fn given_rules_with_code_when_running_then_interpreter_refuses() {
    let temp = TempDir::new().unwrap();
    let rules = write(&temp, "code.bonsai", "Foo:\n< scope.exit(0);\n");
    let runner = RunnerService::new(Arc::new(RealFileSystem));

    let result = runner.run(&rules, None, None);

    assert!(matches!(result, Err(ApplicationError::EmbeddedCode { line: 1 })));
}
