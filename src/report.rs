//! Pruning results and their terminal rendering.

use crate::rules::Action;
use colored::Colorize;
use humansize::{format_size, BINARY};
use std::fmt;
use std::path::PathBuf;

/// What a single rule did to the tree
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule: String,
    pub action: Action,
    /// Entries removed (a removed directory counts once)
    pub removed: usize,
    /// Bytes held by the removed entries
    pub bytes: u64,
    /// Per-path failures that did not stop the rule
    pub warnings: Vec<String>,
}

impl RuleOutcome {
    pub fn new(rule: &str, action: Action) -> Self {
        RuleOutcome {
            rule: rule.to_string(),
            action,
            removed: 0,
            bytes: 0,
            warnings: Vec::new(),
        }
    }
}

/// Size of a tree, symlinks counted as entries but not followed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSize {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

/// Report of a complete pruning run
#[derive(Debug, Clone)]
pub struct PruneReport {
    pub root: PathBuf,
    pub dry_run: bool,
    pub rules: Vec<RuleOutcome>,
    /// The empty-directory sweep that closes the run
    pub sweep: RuleOutcome,
    pub initial_size: TreeSize,
    pub final_size: TreeSize,
    pub broken_refs: Vec<String>,
}

impl PruneReport {
    pub fn total_removed(&self) -> usize {
        self.rules.iter().map(|r| r.removed).sum::<usize>() + self.sweep.removed
    }

    pub fn total_bytes(&self) -> u64 {
        self.rules.iter().map(|r| r.bytes).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules
            .iter()
            .chain(std::iter::once(&self.sweep))
            .flat_map(|r| r.warnings.iter().map(move |w| (r.rule.as_str(), w.as_str())))
    }

    pub fn is_success(&self) -> bool {
        self.broken_refs.is_empty()
    }
}

/// Terminal summary; the alternate form (`{:#}`) also lists rules that removed nothing
impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verbose = f.alternate();
        let verb = if self.dry_run { "Would remove" } else { "Removed" };

        writeln!(f, "{}", format!("Pruning {}", self.root.display()).bold())?;

        let name_width = self
            .rules
            .iter()
            .map(|r| r.rule.len())
            .max()
            .unwrap_or(0);

        for outcome in &self.rules {
            if outcome.removed == 0 && outcome.warnings.is_empty() && !verbose {
                continue;
            }
            writeln!(
                f,
                "  {:<width$}  {:>6}  {:>10}  {}",
                outcome.rule,
                outcome.removed,
                format_size(outcome.bytes, BINARY),
                outcome.action.to_string().dimmed(),
                width = name_width
            )?;
        }

        if self.sweep.removed > 0 {
            writeln!(f, "  {} empty directories", self.sweep.removed)?;
        }

        for (rule, warning) in self.warnings() {
            writeln!(f, "  {} {}: {}", "warning".yellow(), rule, warning)?;
        }

        writeln!(f, "========================================")?;
        writeln!(
            f,
            "{}: {} entries, {}",
            verb,
            self.total_removed(),
            format_size(self.total_bytes(), BINARY).bold()
        )?;
        writeln!(
            f,
            "Tree size: {} -> {} ({} files, {} directories)",
            format_size(self.initial_size.bytes, BINARY),
            format_size(self.final_size.bytes, BINARY).green(),
            self.final_size.files,
            self.final_size.dirs
        )?;

        if !self.broken_refs.is_empty() {
            writeln!(f, "{}", "Broken references:".red().bold())?;
            for reference in &self.broken_refs {
                writeln!(f, "  - {}", reference)?;
            }
        }
        if self.dry_run {
            writeln!(f, "Dry run mode: No files were deleted.")?;
        }

        Ok(())
    }
}
