use std::fs;
use tempfile::tempdir;
use treetrim::{Action, MatchTarget, Matcher, PruneError, Rule, Ruleset};

#[test]
fn test_builtin_ruleset_loads() {
    let ruleset = Ruleset::builtin().expect("Failed to load built-in ruleset");

    assert!(!ruleset.is_empty());
    assert!(ruleset.requires_compiler());

    let names: Vec<&str> = ruleset.rules().iter().map(|r| r.name.as_str()).collect();
    let compile = names.iter().position(|n| *n == "compile-python").unwrap();
    let sources = names.iter().position(|n| *n == "python-sources").unwrap();
    let pycache = names.iter().position(|n| *n == "pycache").unwrap();
    assert!(
        compile < sources && sources < pycache,
        "bytecode must be compiled before sources are stripped and before __pycache__ goes"
    );
}

#[test]
fn test_builtin_source_strip_keeps_themes() {
    let ruleset = Ruleset::builtin().unwrap();
    let rule = ruleset
        .rules()
        .iter()
        .find(|r| r.name == "python-sources")
        .unwrap();

    assert_eq!(rule.action, Action::DeleteFile);
    assert_eq!(rule.sibling_extension(), Some("pyc"));
    assert!(rule.selects("client.py", "lib/python3.12/site-packages/gajim/client.py"));
    assert!(!rule.selects("default_theme.py", "lib/gajim/default_theme.py"));
    assert!(!rule.selects("client.pyc", "lib/gajim/client.pyc"));
}

#[test]
fn test_builtin_executable_exceptions() {
    let ruleset = Ruleset::builtin().unwrap();
    let rule = ruleset
        .rules()
        .iter()
        .find(|r| r.name == "foreign-executables")
        .unwrap();

    assert!(rule.selects("gdbus.exe", "bin/gdbus.exe"));
    assert!(rule.selects("TAR.EXE", "bin/TAR.EXE"));
    assert!(!rule.selects("Gajim.exe", "bin/Gajim.exe"));
    assert!(!rule.selects("python3.exe", "bin/python3.exe"));
    assert!(!rule.selects("gspawn-win64-helper.exe", "bin/gspawn-win64-helper.exe"));
}

#[test]
fn test_glob_matches_name_by_default() {
    let matcher = Matcher::glob("*.pyc").unwrap();

    assert_eq!(matcher.target(), MatchTarget::Name);
    assert!(matcher.matches("file.pyc", "lib/pkg/file.pyc"));
    assert!(!matcher.matches("file.py", "lib/pkg/file.py"));
}

#[test]
fn test_path_glob_does_not_cross_separators() {
    let matcher = Matcher::glob("lib/*.dll").unwrap().on_path().unwrap();

    assert!(matcher.matches("a.dll", "lib/a.dll"));
    assert!(!matcher.matches("a.dll", "lib/sub/a.dll"));
}

#[test]
fn test_regex_is_anchored_on_path() {
    let matcher = Matcher::regex("bin/[^/.]+").unwrap();

    assert_eq!(matcher.target(), MatchTarget::Path);
    assert!(matcher.matches("gettext", "bin/gettext"));
    assert!(!matcher.matches("gettext.exe", "bin/gettext.exe"));
    assert!(
        !matcher.matches("gettext", "usr/bin/gettext"),
        "regex must match the whole relative path"
    );
}

#[test]
fn test_ignore_case() {
    let glob = Matcher::glob("*.exe").unwrap().ignore_case().unwrap();
    assert!(glob.matches("SETUP.EXE", "SETUP.EXE"));

    let regex = Matcher::regex("python.*").unwrap().on_name().unwrap().ignore_case().unwrap();
    assert!(regex.matches("Python3.exe", "bin/Python3.exe"));
}

#[test]
fn test_exception_wins_over_pattern() {
    let rule = Rule::delete_files("py", "*.py")
        .unwrap()
        .except(Matcher::glob("*theme.py").unwrap());

    assert!(rule.selects("a.py", "lib/a.py"));
    assert!(rule.matcher().unwrap().matches("b_theme.py", "lib/b_theme.py"));
    assert!(rule.is_exempt("b_theme.py", "lib/b_theme.py"));
    assert!(!rule.selects("b_theme.py", "lib/b_theme.py"));
}

#[test]
fn test_scope_roots() {
    let rule = Rule::delete_dirs("tests", "test*")
        .unwrap()
        .within("lib/python3.*")
        .unwrap();

    assert!(rule.is_scope_root("lib/python3.12"));
    assert!(!rule.is_scope_root("lib/python3.12/site-packages"));
    assert!(!rule.is_scope_root("share"));

    let unscoped = Rule::delete_dirs("tests", "test*").unwrap();
    assert!(unscoped.is_scope_root(""));
}

#[test]
fn test_parse_table_and_bare_patterns() {
    let ruleset = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "libs"
        action = "delete-file"
        match = "*.a"

        [[rule]]
        name = "docs"
        action = "delete-dir-recursive"
        within = "share"
        match = { regex = "(doc|man)", target = "name", ignore_case = true }
        except = ["man-keep"]

        [[rule]]
        name = "sweep"
        action = "prune-empty-dirs"
        "#,
    )
    .unwrap();

    assert_eq!(ruleset.len(), 3);
    let docs = &ruleset.rules()[1];
    assert_eq!(docs.action, Action::DeleteDirRecursive);
    assert_eq!(docs.scope(), Some("share"));
    assert!(docs.selects("DOC", "share/DOC"));
    assert_eq!(docs.exceptions().len(), 1);
    assert!(!ruleset.requires_compiler());
}

#[test]
fn test_invalid_glob_fails_at_load() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "broken"
        action = "delete-file"
        match = "lib/[abc"
        "#,
    )
    .unwrap_err();

    match err {
        PruneError::InvalidRule { rule, source } => {
            assert_eq!(rule, "broken");
            assert!(matches!(*source, PruneError::InvalidPattern { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_regex_fails_at_load() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "broken"
        action = "delete-file"
        match = { regex = "bin/(unclosed" }
        "#,
    )
    .unwrap_err();

    assert!(err.to_string().contains("broken"), "error was: {err}");
}

#[test]
fn test_unknown_action_is_rejected() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "oops"
        action = "shred"
        match = "*"
        "#,
    )
    .unwrap_err();

    assert!(matches!(err, PruneError::Parse(_)));
}

#[test]
fn test_unknown_field_is_rejected() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "typo"
        action = "delete-file"
        match = "*.a"
        excpet = ["keep.a"]
        "#,
    )
    .unwrap_err();

    assert!(matches!(err, PruneError::Parse(_)));
}

#[test]
fn test_delete_rule_requires_match() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "nothing"
        action = "delete-dir-recursive"
        "#,
    )
    .unwrap_err();

    assert!(matches!(err, PruneError::InvalidRule { .. }));
}

#[test]
fn test_sweep_rule_rejects_match() {
    let rule = Rule::new("sweep", Action::PruneEmptyDirs).matching(Matcher::glob("*").unwrap());
    assert!(rule.validate().is_err());
    assert!(Ruleset::new(vec![rule]).is_err());
}

#[test]
fn test_pattern_needs_exactly_one_kind() {
    let err = Ruleset::from_toml_str(
        r#"
        [[rule]]
        name = "both"
        action = "delete-file"
        match = { glob = "*.a", regex = ".*\\.a" }
        "#,
    )
    .unwrap_err();

    assert!(matches!(err, PruneError::InvalidRule { .. }));
}

#[test]
fn test_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    fs::write(
        &path,
        "[[rule]]\nname = \"wheels\"\naction = \"delete-file\"\nmatch = \"*.whl\"\n",
    )
    .unwrap();

    let ruleset = Ruleset::from_file(&path).unwrap();
    assert_eq!(ruleset.rules()[0].name, "wheels");

    let missing = dir.path().join("missing.toml");
    let err = Ruleset::from_file(&missing).unwrap_err();
    match err {
        PruneError::ReadRules { path, source } => {
            assert_eq!(path, missing);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected a read error, got {other:?}"),
    }
}
