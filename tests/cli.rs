//! End-to-end tests of the kiln binary

mod common;

use assert_cmd::Command;
use common::TestBuild;
use predicates::prelude::*;

fn kiln(build: &TestBuild) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(build.root()).arg("--no-color");
    cmd
}

fn sample() -> TestBuild {
    let build = TestBuild::new(
        r#"
[settings]
include = ["core"]

[tasks.hello]
desc = "Say hello"
depends_on = [":core:prepare"]
script = 'print("hello from " + task_path);'
"#,
    );
    build.write(
        "core/build.rhai",
        r#"task("prepare", #{ script: "print(\"preparing\");" });"#,
    );
    build
}

#[test]
fn test_list_plain() {
    let build = sample();
    kiln(&build)
        .args(["list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::eq(":core:prepare\n:hello\n"));
}

#[test]
fn test_run_verbose_shows_output() {
    let build = sample();
    kiln(&build)
        .args(["-v", "run", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("preparing"))
        .stdout(predicate::str::contains("hello from :hello"));
}

#[test]
fn test_skip_switch() {
    let build = sample();
    kiln(&build)
        .args(["-v", "-D", "skip.prepare", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped (skip.prepare)"))
        .stdout(predicate::str::contains("preparing").not());
}

#[test]
fn test_graph_dot() {
    let build = sample();
    kiln(&build)
        .args(["graph", "--format", "dot", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\":core:prepare\" -> \":hello\";"));
}

#[test]
fn test_unknown_task_fails() {
    let build = sample();
    kiln(&build)
        .args(["run", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task ':nope' not found"));
}

#[test]
fn test_cache_path_and_clean() {
    let build = sample();
    kiln(&build).arg("check").assert().success();
    assert!(build.root().join("core/.kiln/build.rhai").is_dir());

    kiln(&build)
        .args(["cache", "clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 cache directory"));
    assert!(!build.root().join("core/.kiln").exists());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let build = sample();
    kiln(&build).arg("init").assert().failure();
    kiln(&build).args(["init", "--force"]).assert().success();
    assert!(build.read("kiln.toml").unwrap().contains("[tasks.build]"));
}

#[test]
fn test_cache_clean_with_broken_build_script() {
    let build = sample();
    kiln(&build).arg("check").assert().success();
    build.write("core/build.rhai", "task(\"prepare\", #{ ");

    kiln(&build).arg("check").assert().failure();
    kiln(&build)
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("core/.kiln"));
    kiln(&build).args(["cache", "clean"]).assert().success();
    assert!(!build.root().join("core/.kiln").exists());
}
