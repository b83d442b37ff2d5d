//! Run configuration: which tree, which rules, which collaborators.

use crate::error::PruneResult;
use crate::external::{Collaborators, PythonCompiler, ScriptDependencyChecker};
use crate::rules::Ruleset;
use std::path::PathBuf;

/// Where the ruleset comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesSource {
    /// The ruleset compiled into the binary
    Builtin,
    /// A TOML file on disk
    File(PathBuf),
}

impl RulesSource {
    pub fn load(&self) -> PruneResult<Ruleset> {
        match self {
            RulesSource::Builtin => Ruleset::builtin(),
            RulesSource::File(path) => Ruleset::from_file(path),
        }
    }
}

/// Everything a pruning run needs, passed explicitly
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Root of the runtime tree
    pub root: PathBuf,
    pub dry_run: bool,
    pub rules: RulesSource,
    /// Interpreter used for bytecode compilation and the dependency check
    pub python: PathBuf,
    /// Dependency-check script; no check runs when unset
    pub depcheck: Option<PathBuf>,
}

impl PruneConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PruneConfig {
            root: root.into(),
            dry_run: false,
            rules: RulesSource::Builtin,
            python: PathBuf::from(default_python()),
            depcheck: None,
        }
    }

    pub fn load_ruleset(&self) -> PruneResult<Ruleset> {
        self.rules.load()
    }

    pub fn collaborators(&self) -> Collaborators {
        let collaborators = Collaborators::none().with_compiler(PythonCompiler::new(&self.python));
        match &self.depcheck {
            Some(script) => {
                collaborators.with_checker(ScriptDependencyChecker::new(&self.python, script))
            }
            None => collaborators,
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}
