//! The tree walker that applies rules and sweeps empty directories.

use crate::config::PruneConfig;
use crate::error::{PruneError, PruneResult};
use crate::external::Collaborators;
use crate::report::{PruneReport, RuleOutcome, TreeSize};
use crate::rules::{relative_path, Action, Rule, Ruleset};

use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Name reported for the sweep that closes every run
pub const FINAL_SWEEP: &str = "empty-directory-sweep";

/// The runtime tree being pruned.
///
/// In dry-run mode nothing on disk changes; removals are recorded in a set
/// and later walks treat those paths (and everything below them) as gone.
#[derive(Debug)]
pub struct Tree {
    root: PathBuf,
    dry_run: bool,
    removed: HashSet<PathBuf>,
    compiled_scopes: Vec<PathBuf>,
    /// Dry run only: bytecode a skipped compile step would have written
    assumed: HashSet<PathBuf>,
}

enum Removal {
    Removed(u64),
    Missing,
    Failed(io::Error),
}

impl Tree {
    /// Open an existing directory for pruning
    pub fn open(root: impl Into<PathBuf>) -> PruneResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PruneError::MissingRoot(root));
        }
        let root = root.canonicalize().unwrap_or(root);
        Ok(Tree {
            root,
            dry_run: false,
            removed: HashSet::new(),
            compiled_scopes: Vec::new(),
            assumed: HashSet::new(),
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether a path was removed by an earlier rule of a dry run
    pub fn is_removed(&self, path: &Path) -> bool {
        !self.removed.is_empty() && path.ancestors().any(|a| self.removed.contains(a))
    }

    /// Directories a rule operates under
    fn scope_roots(&self, rule: &Rule, outcome: &mut RuleOutcome) -> Vec<PathBuf> {
        if rule.scope().is_none() {
            return vec![self.root.clone()];
        }

        let mut roots = Vec::new();
        let mut it = WalkDir::new(&self.root).min_depth(1).into_iter();
        while let Some(result) = it.next() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    record_walk_error(err, outcome);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if self.is_removed(entry.path()) {
                it.skip_current_dir();
                continue;
            }
            if rule.is_scope_root(&relative_path(&self.root, entry.path())) {
                roots.push(entry.path().to_path_buf());
                // Nested matches would be walked twice
                it.skip_current_dir();
            }
        }

        if roots.is_empty() {
            debug!("rule {}: no directory matches scope", rule.name);
        }
        roots
    }

    /// Apply one rule and report what it removed
    pub fn apply_rule(
        &mut self,
        rule: &Rule,
        collaborators: &Collaborators,
    ) -> PruneResult<RuleOutcome> {
        let mut outcome = RuleOutcome::new(&rule.name, rule.action);
        let scopes = self.scope_roots(rule, &mut outcome);

        match rule.action {
            Action::DeleteFile | Action::DeleteDirRecursive => {
                let targets: Vec<(PathBuf, bool)> = scopes
                    .iter()
                    .flat_map(|scope| self.collect_targets(rule, scope, &mut outcome))
                    .collect();
                self.remove_targets(rule, targets, &mut outcome);
            }
            Action::PruneEmptyDirs => {
                for scope in &scopes {
                    self.sweep(scope, &mut outcome);
                }
            }
            Action::CompileBytecode => {
                for scope in &scopes {
                    self.compile(rule, scope, collaborators)?;
                }
            }
        }

        if outcome.removed > 0 || !outcome.warnings.is_empty() {
            info!(
                "rule {}: {} removed, {} bytes, {} warnings",
                rule.name,
                outcome.removed,
                outcome.bytes,
                outcome.warnings.len()
            );
        } else {
            debug!("rule {}: nothing to do", rule.name);
        }
        Ok(outcome)
    }

    /// Walk a scope and collect the entries the rule selects.
    ///
    /// Each target is paired with whether it is removed as a whole directory.
    /// A selected directory holding an exempt entry is not a target itself;
    /// the walk descends into it and only its non-exempt entries are.
    fn collect_targets(
        &self,
        rule: &Rule,
        scope: &Path,
        outcome: &mut RuleOutcome,
    ) -> Vec<(PathBuf, bool)> {
        let mut targets = Vec::new();
        let mut partial: Vec<PathBuf> = Vec::new();
        let mut it = WalkDir::new(scope).min_depth(1).into_iter();

        while let Some(result) = it.next() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    record_walk_error(err, outcome);
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if self.is_removed(path) {
                if file_type.is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            let rel_path = relative_path(&self.root, path);

            match rule.action {
                Action::DeleteFile => {
                    if file_type.is_file()
                        && rule.selects(&name, &rel_path)
                        && self.has_required_sibling(rule, path)
                    {
                        targets.push((path.to_path_buf(), false));
                    }
                }
                Action::DeleteDirRecursive => {
                    let inside_partial = partial.iter().any(|p| path.starts_with(p));
                    if inside_partial && rule.is_exempt(&name, &rel_path) {
                        debug!("keeping exempt {}", path.display());
                        if file_type.is_dir() {
                            it.skip_current_dir();
                        }
                        continue;
                    }
                    let selected =
                        inside_partial || (file_type.is_dir() && rule.selects(&name, &rel_path));
                    if !selected {
                        continue;
                    }
                    if !file_type.is_dir() {
                        targets.push((path.to_path_buf(), false));
                    } else if self.has_exempt_descendant(rule, path) {
                        partial.push(path.to_path_buf());
                    } else {
                        targets.push((path.to_path_buf(), true));
                        // Removed as a whole; never re-enter it
                        it.skip_current_dir();
                    }
                }
                Action::PruneEmptyDirs | Action::CompileBytecode => {}
            }
        }

        targets
    }

    /// Whether anything below `dir` is covered by one of the rule's exceptions
    fn has_exempt_descendant(&self, rule: &Rule, dir: &Path) -> bool {
        if rule.exceptions().is_empty() {
            return false;
        }
        WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !self.is_removed(e.path()))
            .any(|e| {
                let name = e.file_name().to_string_lossy();
                rule.is_exempt(&name, &relative_path(&self.root, e.path()))
            })
    }

    /// For `only_if_sibling` rules, check the derived file exists
    fn has_required_sibling(&self, rule: &Rule, path: &Path) -> bool {
        let Some(extension) = rule.sibling_extension() else {
            return true;
        };
        let sibling = path.with_extension(extension);
        if self.dry_run {
            // Nothing was compiled for real; assume a compile step produced it
            let compiled = self.compiled_scopes.iter().any(|s| path.starts_with(s));
            return !self.is_removed(&sibling) && (compiled || sibling.is_file());
        }
        if sibling.is_file() {
            true
        } else {
            debug!(
                "keeping {}: {} does not exist",
                path.display(),
                sibling.display()
            );
            false
        }
    }

    fn remove_targets(
        &mut self,
        rule: &Rule,
        targets: Vec<(PathBuf, bool)>,
        outcome: &mut RuleOutcome,
    ) {
        if self.dry_run {
            for (target, is_dir) in targets {
                let size = entry_size(&target, is_dir);
                debug!("would remove {}", target.display());
                if let Some(extension) = rule.sibling_extension() {
                    let sibling = target.with_extension(extension);
                    if !sibling.exists() {
                        self.assumed.insert(sibling);
                    }
                }
                outcome.removed += 1;
                outcome.bytes += size;
                self.removed.insert(target);
            }
            return;
        }

        // Targets never nest, so they can go in parallel; collecting is the
        // barrier before the next rule starts.
        let results: Vec<(PathBuf, Removal)> = targets
            .into_par_iter()
            .map(|(target, is_dir)| {
                let removal = remove_entry(&target, is_dir);
                (target, removal)
            })
            .collect();

        for (target, removal) in results {
            match removal {
                Removal::Removed(size) => {
                    debug!("removed {}", target.display());
                    outcome.removed += 1;
                    outcome.bytes += size;
                }
                Removal::Missing => {
                    debug!("already gone: {}", target.display());
                }
                Removal::Failed(err) => {
                    warn!("failed to remove {}: {}", target.display(), err);
                    outcome
                        .warnings
                        .push(format!("{}: {}", target.display(), err));
                }
            }
        }
    }

    fn compile(
        &mut self,
        rule: &Rule,
        scope: &Path,
        collaborators: &Collaborators,
    ) -> PruneResult<()> {
        let Some(compiler) = collaborators.compiler.as_ref() else {
            return Err(PruneError::Config(format!(
                "rule `{}` compiles bytecode but no compiler is configured",
                rule.name
            )));
        };

        if self.dry_run {
            info!("would compile bytecode under {}", scope.display());
        } else {
            info!("compiling bytecode under {}", scope.display());
            compiler
                .compile(scope)
                .map_err(|source| PruneError::Compile {
                    root: scope.to_path_buf(),
                    source,
                })?;
        }
        self.compiled_scopes.push(scope.to_path_buf());
        Ok(())
    }

    /// Remove empty directories under `scope` until none are left
    fn sweep(&mut self, scope: &Path, outcome: &mut RuleOutcome) {
        // Reported once, not on every pass
        let mut failed: HashSet<PathBuf> = HashSet::new();
        loop {
            let mut removed_this_pass = 0;
            let mut it = WalkDir::new(scope)
                .min_depth(1)
                .contents_first(true)
                .into_iter();

            while let Some(result) = it.next() {
                let entry = match result {
                    Ok(entry) => entry,
                    Err(err) => {
                        record_walk_error(err, outcome);
                        continue;
                    }
                };
                let path = entry.path();
                if !entry.file_type().is_dir() || self.is_removed(path) || failed.contains(path)
                {
                    continue;
                }

                match self.is_empty_dir(path) {
                    Ok(false) => {}
                    Ok(true) if self.dry_run => {
                        debug!("would remove empty directory {}", path.display());
                        self.removed.insert(path.to_path_buf());
                        removed_this_pass += 1;
                    }
                    Ok(true) => match fs::remove_dir(path) {
                        Ok(()) => {
                            debug!("removed empty directory {}", path.display());
                            removed_this_pass += 1;
                        }
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => {
                            warn!("failed to remove {}: {}", path.display(), err);
                            outcome.warnings.push(format!("{}: {}", path.display(), err));
                            failed.insert(path.to_path_buf());
                        }
                    },
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!("cannot list {}: {}", path.display(), err);
                        outcome.warnings.push(format!("{}: {}", path.display(), err));
                        failed.insert(path.to_path_buf());
                    }
                }
            }

            outcome.removed += removed_this_pass;
            if removed_this_pass == 0 {
                break;
            }
        }
    }

    fn is_empty_dir(&self, path: &Path) -> io::Result<bool> {
        let mut entries = fs::read_dir(path)?;
        if !self.dry_run {
            return Ok(entries.next().is_none());
        }
        for entry in entries {
            if !self.removed.contains(&entry?.path()) {
                return Ok(false);
            }
        }
        Ok(!self.assumed.iter().any(|a| a.parent() == Some(path)))
    }

    /// Remove every empty directory below the root; the root itself stays
    pub fn sweep_empty_dirs(&mut self) -> RuleOutcome {
        let mut outcome = RuleOutcome::new(FINAL_SWEEP, Action::PruneEmptyDirs);
        let root = self.root.clone();
        self.sweep(&root, &mut outcome);
        if outcome.removed > 0 {
            info!("swept {} empty directories", outcome.removed);
        }
        outcome
    }

    /// Count what is left in the tree
    pub fn size(&self) -> TreeSize {
        let mut size = TreeSize::default();
        let mut it = WalkDir::new(&self.root).min_depth(1).into_iter();

        while let Some(result) = it.next() {
            let Ok(entry) = result else {
                continue;
            };
            if self.is_removed(entry.path()) {
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_dir() {
                size.dirs += 1;
            } else {
                size.files += 1;
                size.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        size
    }
}

fn record_walk_error(err: walkdir::Error, outcome: &mut RuleOutcome) {
    if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::NotFound) {
        debug!("entry vanished during walk: {}", err);
        return;
    }
    warn!("failed to access entry: {}", err);
    outcome.warnings.push(err.to_string());
}

/// Bytes held by a file, or by everything below a directory
fn entry_size(path: &Path, is_dir: bool) -> u64 {
    if !is_dir {
        return fs::symlink_metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn remove_entry(path: &Path, is_dir: bool) -> Removal {
    let size = entry_size(path, is_dir);
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Removal::Removed(size),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Removal::Missing,
        Err(err) => Removal::Failed(err),
    }
}

/// Apply a ruleset in order, sweep empty directories, then verify dependencies.
///
/// Fails before touching the tree when a compile rule has no compiler, and
/// fails after pruning when the dependency checker reports broken references.
pub fn run(
    tree: &mut Tree,
    ruleset: &Ruleset,
    collaborators: &Collaborators,
) -> PruneResult<PruneReport> {
    if ruleset.requires_compiler() && collaborators.compiler.is_none() {
        return Err(PruneError::Config(
            "ruleset compiles bytecode but no compiler is configured".to_string(),
        ));
    }

    info!(
        "pruning {} with {} rules{}",
        tree.root().display(),
        ruleset.len(),
        if tree.is_dry_run() { " (dry run)" } else { "" }
    );

    let initial_size = tree.size();
    let mut outcomes = Vec::with_capacity(ruleset.len());
    for rule in ruleset.rules() {
        outcomes.push(tree.apply_rule(rule, collaborators)?);
    }
    let sweep = tree.sweep_empty_dirs();
    let final_size = tree.size();

    let mut report = PruneReport {
        root: tree.root().to_path_buf(),
        dry_run: tree.is_dry_run(),
        rules: outcomes,
        sweep,
        initial_size,
        final_size,
        broken_refs: Vec::new(),
    };

    if let Some(checker) = collaborators.checker.as_ref() {
        if tree.is_dry_run() {
            info!("skipping dependency check in dry run");
        } else {
            let refs = checker
                .check(tree.root())
                .map_err(PruneError::DependencyCheck)?;
            if !refs.is_empty() {
                for reference in &refs {
                    error!("broken reference: {}", reference);
                }
                report.broken_refs = refs.clone();
                return Err(PruneError::BrokenReferences {
                    refs,
                    report: Box::new(report),
                });
            }
            debug!("dependency check passed");
        }
    }

    Ok(report)
}

/// Load the configured ruleset, open the tree and run.
///
/// The ruleset is loaded first so a malformed rule fails before any mutation.
pub fn prune(config: &PruneConfig) -> PruneResult<PruneReport> {
    let ruleset = config.load_ruleset()?;
    let mut tree = Tree::open(&config.root)?.dry_run(config.dry_run);
    let collaborators = config.collaborators();
    run(&mut tree, &ruleset, &collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_removing_missing_entry_is_a_no_op() {
        let dir = tempdir().unwrap();

        assert!(matches!(
            remove_entry(&dir.path().join("gone.dll"), false),
            Removal::Missing
        ));
        assert!(matches!(
            remove_entry(&dir.path().join("gone"), true),
            Removal::Missing
        ));
    }
}
