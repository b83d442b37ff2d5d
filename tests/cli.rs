use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const RULES: &str = r#"
[[rule]]
name = "static-libraries"
action = "delete-file"
match = "*.a"

[[rule]]
name = "documentation"
action = "delete-dir-recursive"
match = { regex = "share/(doc|man)" }

[[rule]]
name = "python-sources"
action = "delete-file"
match = "*.py"
except = ["*theme.py"]
"#;

fn setup_test_directory() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path().join("runtime");

    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(root.join("lib/libfoo.a"), "archive").unwrap();
    fs::write(root.join("lib/libfoo.dll"), "dll").unwrap();
    fs::write(root.join("lib/client.py"), "client").unwrap();
    fs::write(root.join("lib/dark_theme.py"), "theme").unwrap();

    fs::create_dir_all(root.join("share/doc/foo")).unwrap();
    fs::write(root.join("share/doc/foo/README"), "readme").unwrap();
    fs::create_dir_all(root.join("share/empty")).unwrap();

    fs::write(dir.path().join("rules.toml"), RULES).unwrap();

    dir
}

fn treetrim(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("treetrim").unwrap();
    cmd.arg(dir.join("runtime"))
        .arg("--rules")
        .arg(dir.join("rules.toml"));
    cmd
}

#[test]
fn test_prunes_tree() {
    let dir = setup_test_directory();
    let root = dir.path().join("runtime");

    treetrim(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("static-libraries"))
        .stdout(predicate::str::contains("documentation"))
        .stdout(predicate::str::contains("Removed"));

    assert!(!root.join("lib/libfoo.a").exists());
    assert!(!root.join("lib/client.py").exists());
    assert!(!root.join("share").exists());
    assert!(root.join("lib/libfoo.dll").exists());
    assert!(root.join("lib/dark_theme.py").exists());
}

#[test]
fn test_dry_run() {
    let dir = setup_test_directory();
    let root = dir.path().join("runtime");

    treetrim(dir.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Would remove"))
        .stdout(predicate::str::contains("Dry run mode: No files were deleted."));

    assert!(root.join("lib/libfoo.a").exists());
    assert!(root.join("lib/client.py").exists());
    assert!(root.join("share/doc/foo/README").exists());
    assert!(root.join("share/empty").exists());
}

#[test]
fn test_second_run_removes_nothing() {
    let dir = setup_test_directory();

    treetrim(dir.path()).assert().success();
    treetrim(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 entries"));
}

#[test]
fn test_list_builtin_rules() {
    let mut cmd = Command::cargo_bin("treetrim").unwrap();
    cmd.arg("--list-rules")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile-python"))
        .stdout(predicate::str::contains("compile-bytecode"))
        .stdout(predicate::str::contains("except name glob `*theme.py`"));
}

#[test]
fn test_malformed_rules_abort_before_pruning() {
    let dir = setup_test_directory();
    let root = dir.path().join("runtime");
    fs::write(
        dir.path().join("rules.toml"),
        "[[rule]]\nname = \"libs\"\naction = \"delete-file\"\nmatch = \"*.a\"\n\n\
         [[rule]]\nname = \"broken\"\naction = \"delete-file\"\nmatch = { regex = \"(\" }\n",
    )
    .unwrap();

    treetrim(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken"));

    assert!(root.join("lib/libfoo.a").exists(), "no rule may run");
}

#[test]
fn test_missing_root() {
    let dir = setup_test_directory();

    let mut cmd = Command::cargo_bin("treetrim").unwrap();
    cmd.arg(dir.path().join("nope"))
        .arg("--rules")
        .arg(dir.path().join("rules.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[cfg(unix)]
#[test]
fn test_broken_references_fail_the_run() {
    let dir = setup_test_directory();
    let script = dir.path().join("depcheck.sh");
    fs::write(&script, "echo \"lib/libfoo.dll -> libfoo.a\"\nexit 1\n").unwrap();

    treetrim(dir.path())
        .arg("--python")
        .arg("sh")
        .arg("--depcheck")
        .arg(&script)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Broken references"))
        .stdout(predicate::str::contains("lib/libfoo.dll -> libfoo.a"))
        .stderr(predicate::str::contains("not safe to package"));
}

#[cfg(unix)]
#[test]
fn test_clean_dependency_check() {
    let dir = setup_test_directory();
    let script = dir.path().join("depcheck.sh");
    fs::write(&script, "test -d \"$1\"\n").unwrap();

    treetrim(dir.path())
        .arg("--python")
        .arg("sh")
        .arg("--depcheck")
        .arg(&script)
        .assert()
        .success();
}
