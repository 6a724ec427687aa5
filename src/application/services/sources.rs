//! Loading and checking a rule file together with its initial state.

use std::path::Path;

use tracing::debug;

use crate::application::validator::{check_state_labels, validate_program};
use crate::application::{ApplicationResult, IoResultExt};
use crate::domain::{parse_program, parse_state, Forest, Program};
use crate::infrastructure::traits::FileSystem;

/// A validated program and the state its bootstrap rule plants.
#[derive(Debug)]
pub struct Sources {
    pub program: Program,
    pub state: Forest,
}

impl Sources {
    /// Read, parse and validate `rules` and the optional `state` file.
    /// Without a state file the program starts from an empty forest.
    pub fn load(fs: &dyn FileSystem, rules: &Path, state: Option<&Path>) -> ApplicationResult<Self> {
        let text = fs.read_to_string(rules).with_path_context("read rules", rules)?;
        let program = parse_program(&text)?;
        validate_program(&program)?;
        debug!(rules = program.rules.len(), path = %rules.display(), "Loaded rules");

        let state = match state {
            Some(path) => {
                let text = fs.read_to_string(path).with_path_context("read state", path)?;
                let forest = parse_state(&text)?;
                check_state_labels(&forest)?;
                debug!(nodes = forest.len(), path = %path.display(), "Loaded state");
                forest
            }
            None => Forest::new(),
        };

        Ok(Self { program, state })
    }
}
