//! treetrim - Rule-driven runtime tree pruner
//!
//! treetrim shrinks an assembled runtime tree (binaries, libraries, a bundled
//! interpreter) to the payload an installer should ship. It applies an ordered
//! ruleset: each rule deletes files or whole directories matching a glob or
//! regex, minus its exceptions. Rules run strictly in sequence because later
//! rules depend on what earlier ones left behind, most visibly the
//! compile-then-strip pair that turns Python sources into bytecode before the
//! sources are removed.
//!
//! ## Run
//!
//! 1. Load and compile every rule (a malformed pattern fails before any
//!    file is touched)
//! 2. Apply rules in order; missing paths are no-ops, permission failures
//!    become warnings
//! 3. Sweep empty directories until none are left
//! 4. Ask the dependency checker for broken references; any is fatal

pub mod config;
pub mod error;
pub mod external;
pub mod pruner;
pub mod report;
pub mod rules;

// Re-export commonly used items
pub use config::{PruneConfig, RulesSource};
pub use error::{PruneError, PruneResult};
pub use external::{
    BytecodeCompiler, Collaborators, DependencyChecker, PythonCompiler, ScriptDependencyChecker,
};
pub use pruner::{prune, run, Tree, FINAL_SWEEP};
pub use report::{PruneReport, RuleOutcome, TreeSize};
pub use rules::{relative_path, Action, MatchTarget, Matcher, Rule, Ruleset};
