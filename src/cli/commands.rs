//! Command dispatch: one function per subcommand, all errors bubbling up as
//! [`CliError`] with an exit code attached.

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::generate;
use termtree::Tree;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::application::services::CompileRequest;
use crate::application::{ApplicationError, IoResultExt};
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::output;
use crate::cli::{CliError, CliResult};
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::{parse_state, Forest, NodeId};
use crate::exitcode;
use crate::infrastructure::{InfraError, InfraResult, ServiceContainer};

/// Extension of rule files picked up when `check` walks a directory.
pub const RULES_EXTENSION: &str = "bonsai";

/// Execute the parsed command line; returns the process exit status.
pub fn execute_command(cli: &Cli) -> CliResult<i32> {
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => current_dir()?,
    };
    debug!("execute_command: project_dir={}", project_dir.display());

    match &cli.command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(exitcode::OK)
        }
        Commands::Config { command } => cmd_config(command, &project_dir),
        Commands::Tree { state } => cmd_tree(&resolve(&project_dir, state)),
        Commands::Check { paths } => {
            let paths: Vec<PathBuf> = paths.iter().map(|p| resolve(&project_dir, p)).collect();
            cmd_check(&container(&project_dir)?, &paths)
        }
        Commands::Compile {
            rules,
            state,
            output,
            build,
        } => {
            let request = CompileRequest {
                rules: resolve(&project_dir, rules),
                state: state.as_deref().map(|s| resolve(&project_dir, s)),
                out_dir: output.as_deref().map(|o| resolve(&project_dir, o)),
                build: *build,
            };
            cmd_compile(&container(&project_dir)?, &request)
        }
        Commands::Run {
            rules,
            state,
            max_steps,
        } => {
            if *max_steps == Some(0) {
                return Err(CliError::InvalidArgs("--max-steps must be at least 1".into()));
            }
            let state = state.as_deref().map(|s| resolve(&project_dir, s));
            cmd_run(
                &container(&project_dir)?,
                &resolve(&project_dir, rules),
                state.as_deref(),
                *max_steps,
            )
        }
    }
}

fn current_dir() -> InfraResult<PathBuf> {
    std::env::current_dir().map_err(|e| InfraError::io("determine current directory", e))
}

fn container(project_dir: &Path) -> CliResult<ServiceContainer> {
    let settings = Settings::load(Some(project_dir))?;
    Ok(ServiceContainer::new(settings))
}

/// Relative paths on the command line are taken from the project directory.
fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

#[instrument(skip(container))]
fn cmd_check(container: &ServiceContainer, paths: &[PathBuf]) -> CliResult<i32> {
    let files = collect_rule_files(paths);
    if files.is_empty() {
        return Err(CliError::Usage(format!("no .{RULES_EXTENSION} files found")));
    }

    let mut failed = 0;
    for file in &files {
        match container.compiler.check(file) {
            Ok(program) => output::success(&format!(
                "{} ({} rules)",
                file.display(),
                program.rules.len()
            )),
            Err(e) => {
                failed += 1;
                output::failure(&format!("{}: {}", file.display(), e));
            }
        }
    }

    if failed > 0 {
        output::error(&format!("{failed} of {} files failed", files.len()));
        Ok(exitcode::DATAERR)
    } else {
        Ok(exitcode::OK)
    }
}

/// Files are taken as given; directories are searched for rule files.
fn collect_rule_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == RULES_EXTENSION))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

#[instrument(skip(container))]
fn cmd_compile(container: &ServiceContainer, request: &CompileRequest) -> CliResult<i32> {
    let result = container.compiler.compile(request)?;
    if result.written {
        output::action("Generated", &result.project_dir.display());
    } else {
        output::action("Unchanged", &result.project_dir.display());
    }
    output::detail(&format!("fingerprint {}", result.fingerprint));
    if result.built {
        output::action("Built", &result.project_dir.display());
    }
    Ok(exitcode::OK)
}

#[instrument(skip(container))]
fn cmd_run(
    container: &ServiceContainer,
    rules: &Path,
    state: Option<&Path>,
    max_steps: Option<u64>,
) -> CliResult<i32> {
    let result = container.runner.run(rules, state, max_steps)?;
    if let Some(diagnostic) = &result.diagnostic {
        eprint!("{diagnostic}");
    }
    if result.halt.is_none() {
        output::warning(&format!("gave up after {} steps", result.steps));
    }
    Ok(result.status())
}

#[instrument]
fn cmd_tree(path: &Path) -> CliResult<i32> {
    let text = std::fs::read_to_string(path).with_path_context("read state", path)?;
    let forest = parse_state(&text).map_err(ApplicationError::from)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    output::info(&state_tree(&forest, name));
    Ok(exitcode::OK)
}

/// Render a forest below a single root named `name`.
pub fn state_tree(forest: &Forest, name: String) -> Tree<String> {
    let leaves: Vec<Tree<String>> = forest
        .roots()
        .iter()
        .map(|root| node_tree(forest, *root))
        .collect();
    Tree::new(name).with_leaves(leaves)
}

fn node_tree(forest: &Forest, id: NodeId) -> Tree<String> {
    let Some(node) = forest.get_node(id) else {
        return Tree::new(String::new());
    };
    let text = if node.is_ordered() {
        format!("{}::", node.label())
    } else if let Some(value) = node.value() {
        format!("{}: {}", node.label(), value)
    } else {
        format!("{}:", node.label())
    };
    let leaves: Vec<Tree<String>> = node
        .children()
        .iter()
        .map(|child| node_tree(forest, *child))
        .collect();
    Tree::new(text).with_leaves(leaves)
}

fn cmd_config(command: &ConfigCommands, project_dir: &Path) -> CliResult<i32> {
    match command {
        ConfigCommands::Show => {
            let settings = Settings::load(Some(project_dir))?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Template => {
            output::info(&Settings::template());
        }
        ConfigCommands::Path => {
            output::header("Config files");
            match global_config_path() {
                Some(path) => output::detail(&format!(
                    "global: {} ({})",
                    path.display(),
                    presence(&path)
                )),
                None => output::detail("global: <no config directory>"),
            }
            let local = local_config_path(project_dir);
            output::detail(&format!("local:  {} ({})", local.display(), presence(&local)));
        }
    }
    Ok(exitcode::OK)
}

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        "exists"
    } else {
        "not found"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_nested_state_when_rendering_tree_then_shows_labels_and_values() {
        let forest = parse_state("Foo::\n  Bar: 5\nBaz:").unwrap();

        let rendered = state_tree(&forest, "state".into()).to_string();

        assert!(rendered.starts_with("state\n"));
        assert!(rendered.contains("Foo::"));
        assert!(rendered.contains("Bar: 5"));
        assert!(rendered.contains("Baz:"));
    }
}
