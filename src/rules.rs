//! Pruning rule loading and matching from rules.toml.

use crate::error::{PruneError, PruneResult};
use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Component, Path};

// Embed the default ruleset directly in the binary at compile time
const BUILTIN_RULES_TOML: &str = include_str!("../rules.toml");

/// What a rule does to the entries it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Remove matching regular files
    DeleteFile,
    /// Remove matching directories together with everything below them
    DeleteDirRecursive,
    /// Remove directories left without entries
    PruneEmptyDirs,
    /// Hand the scope to the bytecode compiler
    CompileBytecode,
}

impl Action {
    fn takes_matcher(self) -> bool {
        matches!(self, Action::DeleteFile | Action::DeleteDirRecursive)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::DeleteFile => "delete-file",
            Action::DeleteDirRecursive => "delete-dir-recursive",
            Action::PruneEmptyDirs => "prune-empty-dirs",
            Action::CompileBytecode => "compile-bytecode",
        };
        f.write_str(name)
    }
}

/// Which string of an entry a matcher is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTarget {
    /// The final path component (`find -name`)
    Name,
    /// The path relative to the tree root, `/`-separated (`find -regex`)
    Path,
}

#[derive(Debug, Clone)]
enum MatcherKind {
    Glob(Pattern),
    Regex(Regex),
}

/// A compiled glob or regex bound to a match target
#[derive(Debug, Clone)]
pub struct Matcher {
    kind: MatcherKind,
    target: MatchTarget,
    ignore_case: bool,
    source: String,
}

impl Matcher {
    /// Glob matched against the entry name
    pub fn glob(pattern: &str) -> PruneResult<Self> {
        Self::build_glob(pattern, MatchTarget::Name, false)
    }

    /// Regex matched against the whole relative path
    pub fn regex(pattern: &str) -> PruneResult<Self> {
        Self::build_regex(pattern, MatchTarget::Path, false)
    }

    /// Match against the relative path instead of the name
    pub fn on_path(self) -> PruneResult<Self> {
        let ignore_case = self.ignore_case;
        self.rebuild(MatchTarget::Path, ignore_case)
    }

    /// Match against the entry name instead of the relative path
    pub fn on_name(self) -> PruneResult<Self> {
        let ignore_case = self.ignore_case;
        self.rebuild(MatchTarget::Name, ignore_case)
    }

    pub fn ignore_case(self) -> PruneResult<Self> {
        let target = self.target;
        self.rebuild(target, true)
    }

    fn rebuild(self, target: MatchTarget, ignore_case: bool) -> PruneResult<Self> {
        match self.kind {
            MatcherKind::Glob(_) => Self::build_glob(&self.source, target, ignore_case),
            MatcherKind::Regex(_) => Self::build_regex(&self.source, target, ignore_case),
        }
    }

    fn build_glob(pattern: &str, target: MatchTarget, ignore_case: bool) -> PruneResult<Self> {
        let compiled = Pattern::new(pattern).map_err(|e| PruneError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Matcher {
            kind: MatcherKind::Glob(compiled),
            target,
            ignore_case,
            source: pattern.to_string(),
        })
    }

    fn build_regex(pattern: &str, target: MatchTarget, ignore_case: bool) -> PruneResult<Self> {
        // Anchored like find -regex: the whole target string has to match
        let compiled = RegexBuilder::new(&format!("^(?:{})$", pattern))
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| PruneError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Matcher {
            kind: MatcherKind::Regex(compiled),
            target,
            ignore_case,
            source: pattern.to_string(),
        })
    }

    /// Test an entry, given its name and its `/`-separated path relative to the root
    pub fn matches(&self, name: &str, rel_path: &str) -> bool {
        let subject = match self.target {
            MatchTarget::Name => name,
            MatchTarget::Path => rel_path,
        };
        match &self.kind {
            MatcherKind::Glob(pattern) => {
                let options = MatchOptions {
                    case_sensitive: !self.ignore_case,
                    require_literal_separator: self.target == MatchTarget::Path,
                    require_literal_leading_dot: false,
                };
                pattern.matches_with(subject, options)
            }
            MatcherKind::Regex(regex) => regex.is_match(subject),
        }
    }

    pub fn target(&self) -> MatchTarget {
        self.target
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MatcherKind::Glob(_) => "glob",
            MatcherKind::Regex(_) => "regex",
        };
        let target = match self.target {
            MatchTarget::Name => "name",
            MatchTarget::Path => "path",
        };
        write!(f, "{} {} `{}`", target, kind, self.source)?;
        if self.ignore_case {
            f.write_str(" (ignore case)")?;
        }
        Ok(())
    }
}

/// One step of a ruleset
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub action: Action,
    matcher: Option<Matcher>,
    exceptions: Vec<Matcher>,
    within: Option<Pattern>,
    only_if_sibling: Option<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Rule {
            name: name.into(),
            action,
            matcher: None,
            exceptions: Vec::new(),
            within: None,
            only_if_sibling: None,
        }
    }

    /// Shorthand for a `delete-file` rule on a name glob
    pub fn delete_files(name: impl Into<String>, glob: &str) -> PruneResult<Self> {
        let name = name.into();
        let matcher = Matcher::glob(glob).map_err(|e| e.in_rule(&name))?;
        Ok(Rule::new(name, Action::DeleteFile).matching(matcher))
    }

    /// Shorthand for a `delete-dir-recursive` rule on a name glob
    pub fn delete_dirs(name: impl Into<String>, glob: &str) -> PruneResult<Self> {
        let name = name.into();
        let matcher = Matcher::glob(glob).map_err(|e| e.in_rule(&name))?;
        Ok(Rule::new(name, Action::DeleteDirRecursive).matching(matcher))
    }

    pub fn matching(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Exempt entries matching `matcher` from this rule
    pub fn except(mut self, matcher: Matcher) -> Self {
        self.exceptions.push(matcher);
        self
    }

    /// Restrict the rule to directories matching `glob` (relative to the root)
    pub fn within(mut self, glob: &str) -> PruneResult<Self> {
        let pattern = Pattern::new(glob).map_err(|e| {
            PruneError::InvalidPattern {
                pattern: glob.to_string(),
                reason: e.to_string(),
            }
            .in_rule(&self.name)
        })?;
        self.within = Some(pattern);
        Ok(self)
    }

    /// Only delete a file when a sibling with the given extension exists
    pub fn only_if_sibling(mut self, extension: &str) -> Self {
        self.only_if_sibling = Some(extension.trim_start_matches('.').to_string());
        self
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        self.matcher.as_ref()
    }

    pub fn exceptions(&self) -> &[Matcher] {
        &self.exceptions
    }

    pub fn scope(&self) -> Option<&str> {
        self.within.as_ref().map(|p| p.as_str())
    }

    pub fn sibling_extension(&self) -> Option<&str> {
        self.only_if_sibling.as_deref()
    }

    /// Check the rule is well-formed for its action
    pub fn validate(&self) -> PruneResult<()> {
        if self.name.trim().is_empty() {
            return Err(PruneError::Config("rule without a name".to_string()));
        }
        let problem = match (self.action.takes_matcher(), &self.matcher) {
            (true, None) => Some(format!("action `{}` needs a `match` pattern", self.action)),
            (false, Some(_)) => Some(format!("action `{}` takes no `match` pattern", self.action)),
            _ => None,
        };
        if let Some(problem) = problem {
            return Err(PruneError::Config(problem).in_rule(&self.name));
        }
        if !self.action.takes_matcher() && !self.exceptions.is_empty() {
            return Err(PruneError::Config(format!(
                "action `{}` takes no `except` patterns",
                self.action
            ))
            .in_rule(&self.name));
        }
        if self.only_if_sibling.is_some() && self.action != Action::DeleteFile {
            return Err(PruneError::Config(
                "`only_if_sibling` only applies to delete-file".to_string(),
            )
            .in_rule(&self.name));
        }
        Ok(())
    }

    /// Whether this rule selects the entry (pattern matches, no exception does)
    pub fn selects(&self, name: &str, rel_path: &str) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        matcher.matches(name, rel_path) && !self.is_exempt(name, rel_path)
    }

    /// Whether any exception covers the entry
    pub fn is_exempt(&self, name: &str, rel_path: &str) -> bool {
        self.exceptions.iter().any(|e| e.matches(name, rel_path))
    }

    /// Whether a directory (relative to the root) is a scope root for this rule
    pub fn is_scope_root(&self, rel_dir: &str) -> bool {
        match &self.within {
            None => rel_dir.is_empty(),
            Some(pattern) => {
                let options = MatchOptions {
                    case_sensitive: true,
                    require_literal_separator: true,
                    require_literal_leading_dot: false,
                };
                pattern.matches_with(rel_dir, options)
            }
        }
    }
}

/// An ordered list of rules, applied first to last
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    rules: Vec<Rule>,
}

/// Structure to deserialize a ruleset from TOML
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesetConfig {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleConfig {
    name: String,
    action: Action,
    #[serde(default, rename = "match")]
    pattern: Option<PatternConfig>,
    #[serde(default, rename = "except")]
    exceptions: Vec<PatternConfig>,
    #[serde(default)]
    within: Option<String>,
    #[serde(default)]
    only_if_sibling: Option<String>,
}

/// Either a bare glob string or a table with options
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatternConfig {
    Glob(String),
    Detailed(DetailedPattern),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetailedPattern {
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    regex: Option<String>,
    #[serde(default)]
    target: Option<MatchTarget>,
    #[serde(default)]
    ignore_case: bool,
}

impl PatternConfig {
    fn compile(&self) -> PruneResult<Matcher> {
        let detailed = match self {
            PatternConfig::Glob(glob) => return Matcher::glob(glob),
            PatternConfig::Detailed(detailed) => detailed,
        };
        let matcher = match (&detailed.glob, &detailed.regex) {
            (Some(glob), None) => Matcher::glob(glob)?,
            (None, Some(regex)) => Matcher::regex(regex)?,
            _ => {
                return Err(PruneError::Config(
                    "a pattern needs exactly one of `glob` or `regex`".to_string(),
                ))
            }
        };
        let matcher = match detailed.target {
            Some(MatchTarget::Path) => matcher.on_path()?,
            Some(MatchTarget::Name) => matcher.on_name()?,
            None => matcher,
        };
        if detailed.ignore_case {
            matcher.ignore_case()
        } else {
            Ok(matcher)
        }
    }
}

impl RuleConfig {
    fn into_rule(self) -> PruneResult<Rule> {
        let name = self.name;
        let mut rule = Rule::new(name.clone(), self.action);
        if let Some(pattern) = &self.pattern {
            rule = rule.matching(pattern.compile().map_err(|e| e.in_rule(&name))?);
        }
        for exception in &self.exceptions {
            rule = rule.except(exception.compile().map_err(|e| e.in_rule(&name))?);
        }
        if let Some(within) = &self.within {
            rule = rule.within(within)?;
        }
        if let Some(extension) = &self.only_if_sibling {
            rule = rule.only_if_sibling(extension);
        }
        rule.validate()?;
        Ok(rule)
    }
}

impl Ruleset {
    pub fn new(rules: Vec<Rule>) -> PruneResult<Self> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Ruleset { rules })
    }

    /// Parse a ruleset from TOML text; every pattern is compiled up front
    pub fn from_toml_str(content: &str) -> PruneResult<Self> {
        let config: RulesetConfig = toml::from_str(content)?;
        let rules = config
            .rules
            .into_iter()
            .map(RuleConfig::into_rule)
            .collect::<PruneResult<Vec<_>>>()?;
        Ok(Ruleset { rules })
    }

    pub fn from_file(path: &Path) -> PruneResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| PruneError::ReadRules {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// The cleanup list for a bundled MinGW/Python runtime
    pub fn builtin() -> PruneResult<Self> {
        Self::from_toml_str(BUILTIN_RULES_TOML)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn requires_compiler(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.action == Action::CompileBytecode)
    }
}

/// Render a path relative to the tree root with `/` separators
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| {
            if let Component::Normal(os_str) = c {
                Some(os_str.to_string_lossy().to_string())
            } else {
                None
            }
        })
        .collect();
    parts.join("/")
}
