//! External collaborators: the bytecode compiler and the dependency checker.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Turns sources under a directory into bytecode next to them
pub trait BytecodeCompiler: Send + Sync {
    fn compile(&self, root: &Path) -> Result<()>;
}

/// Reports remaining files that reference something no longer in the tree
pub trait DependencyChecker: Send + Sync {
    /// Returns the broken references; an empty list means the tree is consistent
    fn check(&self, root: &Path) -> Result<Vec<String>>;
}

impl<F> BytecodeCompiler for F
where
    F: Fn(&Path) -> Result<()> + Send + Sync,
{
    fn compile(&self, root: &Path) -> Result<()> {
        self(root)
    }
}

impl<F> DependencyChecker for F
where
    F: Fn(&Path) -> Result<Vec<String>> + Send + Sync,
{
    fn check(&self, root: &Path) -> Result<Vec<String>> {
        self(root)
    }
}

/// `python -m compileall` writing legacy `.pyc` files beside each source
#[derive(Debug, Clone)]
pub struct PythonCompiler {
    python: PathBuf,
}

impl PythonCompiler {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        PythonCompiler {
            python: python.into(),
        }
    }
}

impl BytecodeCompiler for PythonCompiler {
    fn compile(&self, root: &Path) -> Result<()> {
        debug!("compiling bytecode under {}", root.display());

        // -b keeps the .pyc next to its source so a later __pycache__ prune
        // does not take the bytecode with it; -d "" strips build paths from
        // tracebacks.
        let output = Command::new(&self.python)
            .args(["-m", "compileall", "-b", "-d", "", "-q"])
            .arg(root)
            .output()
            .with_context(|| format!("Failed to run {}", self.python.display()))?;

        if !output.status.success() {
            bail!(
                "compileall exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Runs a dependency-check script with the tree root as its only argument.
///
/// Every non-empty line the script prints on stdout is a broken reference.
#[derive(Debug, Clone)]
pub struct ScriptDependencyChecker {
    python: PathBuf,
    script: PathBuf,
}

impl ScriptDependencyChecker {
    pub fn new(python: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        ScriptDependencyChecker {
            python: python.into(),
            script: script.into(),
        }
    }
}

impl DependencyChecker for ScriptDependencyChecker {
    fn check(&self, root: &Path) -> Result<Vec<String>> {
        debug!(
            "running dependency check {} on {}",
            self.script.display(),
            root.display()
        );

        let output = Command::new(&self.python)
            .arg(&self.script)
            .arg(root)
            .output()
            .with_context(|| {
                format!(
                    "Failed to run {} {}",
                    self.python.display(),
                    self.script.display()
                )
            })?;

        let broken = parse_broken_references(&String::from_utf8_lossy(&output.stdout));

        if !output.status.success() && broken.is_empty() {
            bail!(
                "dependency checker exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(broken)
    }
}

fn parse_broken_references(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// The collaborators a run may call out to
#[derive(Default)]
pub struct Collaborators {
    pub compiler: Option<Box<dyn BytecodeCompiler>>,
    pub checker: Option<Box<dyn DependencyChecker>>,
}

impl Collaborators {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_compiler(mut self, compiler: impl BytecodeCompiler + 'static) -> Self {
        self.compiler = Some(Box::new(compiler));
        self
    }

    pub fn with_checker(mut self, checker: impl DependencyChecker + 'static) -> Self {
        self.checker = Some(Box::new(checker));
        self
    }
}
