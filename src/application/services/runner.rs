//! Runner service
//!
//! Interprets a rule file in-process, without generating code. Rules that
//! carry embedded code are rejected since only compiled programs can run it.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::application::engine::{bootstrap_rule, CompiledRule, Engine, Halt};
use crate::application::services::sources::Sources;
use crate::application::ApplicationResult;
use crate::exitcode;
use crate::infrastructure::traits::FileSystem;

/// Outcome of an interpreted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the step limit was reached first
    pub halt: Option<Halt>,
    pub steps: u64,
    /// `No rules to apply!` plus the final state, present on [`Halt::NoMatch`]
    pub diagnostic: Option<String>,
}

impl RunOutput {
    /// Process exit status a compiled program would have returned.
    pub fn status(&self) -> i32 {
        self.halt.map_or(exitcode::SOFTWARE, Halt::status)
    }
}

/// Service running rule files through the interpreter.
pub struct RunnerService {
    fs: Arc<dyn FileSystem>,
}

impl RunnerService {
    /// Create a new runner service.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Run `rules` from `state` until halt, or until `max_steps` rule
    /// applications when given.
    #[instrument(level = "debug", skip(self))]
    pub fn run(
        &self,
        rules: &Path,
        state: Option<&Path>,
        max_steps: Option<u64>,
    ) -> ApplicationResult<RunOutput> {
        let sources = Sources::load(self.fs.as_ref(), rules, state)?;

        let mut compiled = vec![CompiledRule::new(bootstrap_rule(&sources.state))];
        for rule in sources.program.rules {
            compiled.push(CompiledRule::interpreted(rule)?);
        }
        let mut engine = Engine::new(compiled);

        let halt = match max_steps {
            Some(limit) => engine.run_limited(limit)?,
            None => Some(engine.run()?),
        };
        info!(steps = engine.steps(), ?halt, "Run finished");

        let diagnostic = (halt == Some(Halt::NoMatch)).then(|| engine.diagnostic());
        Ok(RunOutput {
            halt,
            steps: engine.steps(),
            diagnostic,
        })
    }
}
