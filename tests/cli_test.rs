//! End-to-end tests driving the `kiln` binary
//!
//! - `init` scaffolds a project and refuses to run twice
//! - `build` compiles with the configured compiler and is incremental
//! - `build` failures exit non-zero with every failing file listed
//! - `clean` removes outputs
//! - `kiln.script` projects build like TOML ones

#![cfg(unix)]

mod common;

use common::TestProject;

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn c_project() -> TestProject {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.write_c_manifest(&compiler, "executable", "");
    project.write_c_sources();
    project
}

#[test]
fn test_version_includes_package_version() {
    let project = TestProject::new();
    let output = project.run_kiln(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_init_scaffolds_project() {
    let project = TestProject::new();
    let output = project.run_kiln(&["init"]);
    assert!(output.status.success(), "{}", stderr(&output));

    assert!(project.file_exists("kiln.toml"));
    assert!(project.file_exists("src/main.cpp"));
    assert!(project.path().join("include").is_dir());
    assert!(project.path().join("build").is_dir());
    assert!(project.read_file("kiln.toml").contains("output_type = \"executable\""));

    let again = project.run_kiln(&["init"]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("already initialized"));
}

#[test]
fn test_build_without_config_fails() {
    let project = TestProject::new();
    let output = project.run_kiln(&["build"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("kiln init"));
}

#[test]
fn test_build_is_incremental() {
    let project = c_project();

    let first = project.run_kiln(&["build", "-j", "2"]);
    assert!(first.status.success(), "{}", stderr(&first));
    assert!(project.file_exists("build/debug/demo"));
    assert!(stdout(&first).contains("2 compiled, 0 up to date"));

    project.clear_invocations();
    let second = project.run_kiln(&["build"]);
    assert!(second.status.success(), "{}", stderr(&second));
    assert!(stdout(&second).contains("0 compiled, 2 up to date"));
    assert!(project.compile_invocations().is_empty());
}

#[test]
fn test_build_with_output_dir_and_target() {
    let project = c_project();
    let output = project.run_kiln(&["build", "-t", "release", "-o", "out"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(project.file_exists("out/release/demo"));
}

#[test]
fn test_unknown_target_fails() {
    let project = c_project();
    let output = project.run_kiln(&["build", "-t", "profile"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("profile"));
}

#[test]
fn test_compile_failures_are_listed() {
    let project = c_project();
    project.create_file("src/main.c", "FAKE_ERROR\n");
    project.create_file("src/util.c", "FAKE_ERROR\n");

    let output = project.run_kiln(&["-q", "build"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("2 translation units failed"));
    assert!(err.contains("main.c"));
    assert!(err.contains("util.c"));
}

#[test]
fn test_clean_removes_outputs() {
    let project = c_project();
    assert!(project.run_kiln(&["build"]).status.success());

    let output = project.run_kiln(&["clean"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Cleaned build artifacts"));
    assert!(!project.file_exists("build/debug"));

    project.clear_invocations();
    assert!(project.run_kiln(&["build"]).status.success());
    assert_eq!(project.compile_invocations().len(), 2);
}

#[test]
fn test_clean_without_target_removes_every_target() {
    let project = c_project();
    assert!(project.run_kiln(&["build"]).status.success());
    assert!(project.run_kiln(&["build", "-t", "release"]).status.success());
    assert!(project.file_exists("build/release/demo"));

    let only_release = project.run_kiln(&["clean", "-t", "release"]);
    assert!(only_release.status.success(), "{}", stderr(&only_release));
    assert!(!project.file_exists("build/release"));
    assert!(project.file_exists("build/debug/demo"));

    assert!(project.run_kiln(&["build", "-t", "release"]).status.success());
    let all = project.run_kiln(&["clean"]);
    assert!(all.status.success(), "{}", stderr(&all));
    assert!(!project.file_exists("build"));
}

#[test]
fn test_clean_with_output_dir() {
    let project = c_project();
    assert!(project.run_kiln(&["build", "-o", "out"]).status.success());
    assert!(project.file_exists("out/debug/demo"));

    let output = project.run_kiln(&["clean", "-o", "out"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!project.file_exists("out"));
}

#[test]
fn test_script_config() {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.write_c_sources();
    project.create_file(
        "kiln.script",
        &format!(
            r#"// script configured project
Project("scripted", "0.2.0")
Language("c")
Compiler("{}")
Flags("-Wall")
Executable("scripted", [Sources("src/*.c"), IncludeDirs("include")])
"#,
            compiler.display()
        ),
    );

    let output = project.run_kiln(&["build"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(project.file_exists("build/debug/scripted"));
}

#[test]
fn test_explicit_config_path() {
    let project = c_project();
    let manifest = project.read_file("kiln.toml");
    std::fs::remove_file(project.path().join("kiln.toml")).unwrap();
    project.create_file("configs/alt.toml", &manifest);

    let output = project.run_kiln(&["-c", "configs/alt.toml", "build"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(project.file_exists("build/debug/demo"));
}

#[test]
fn test_run_requires_executable() {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.write_c_manifest(&compiler, "shared_lib", "");
    project.write_c_sources();

    let output = project.run_kiln(&["run"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("only executables can be run"));
}
