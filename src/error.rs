//! Error types for loading rulesets and pruning trees.

use std::path::PathBuf;
use thiserror::Error;

use crate::report::PruneReport;

/// Result type for pruning operations
pub type PruneResult<T> = Result<T, PruneError>;

/// Fatal conditions that stop a pruning run.
///
/// Per-path failures (missing files, permission errors) are not represented
/// here; they are recorded as warnings on the rule outcome instead.
#[derive(Error, Debug)]
pub enum PruneError {
    /// The tree root does not exist or is not a directory
    #[error("tree root {0} does not exist or is not a directory")]
    MissingRoot(PathBuf),

    /// A glob or regex failed to compile
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A rule is malformed (bad pattern, missing matcher, ...)
    #[error("rule `{rule}`: {source}")]
    InvalidRule {
        rule: String,
        #[source]
        source: Box<PruneError>,
    },

    /// The ruleset file could not be parsed
    #[error("failed to parse ruleset: {0}")]
    Parse(#[from] toml::de::Error),

    /// Run configuration is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// The ruleset file could not be read
    #[error("cannot read ruleset {path}: {source}")]
    ReadRules {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytecode compiler failed; sources must not be stripped
    #[error("bytecode compilation failed for {root}: {source}")]
    Compile {
        root: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The dependency checker itself could not run
    #[error("dependency check could not run: {0}")]
    DependencyCheck(#[source] anyhow::Error),

    /// Remaining files reference files the ruleset deleted
    #[error("dependency check found {} broken reference(s)", .refs.len())]
    BrokenReferences {
        refs: Vec<String>,
        report: Box<PruneReport>,
    },
}

impl PruneError {
    pub(crate) fn in_rule(self, rule: &str) -> Self {
        PruneError::InvalidRule {
            rule: rule.to_string(),
            source: Box::new(self),
        }
    }
}
