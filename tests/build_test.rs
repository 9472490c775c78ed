//! Integration tests for the build pipeline
//!
//! Drives [`Builder`] end to end with a fake compiler:
//! - first build compiles everything, second build compiles nothing
//! - touching a shared header recompiles every includer
//! - compilation failures are all reported
//! - static libraries, hooks and `${output}` expansion
//! - configuration and discovery errors stop the build

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestProject;
use kiln::core::builder::{BuildOptions, Builder};
use kiln::core::cache::Cache;
use kiln::core::graph::NodeKind;
use kiln::core::manifest::Manifest;
use kiln::error::{BuildError, ConfigError, DiscoveryError, KilnError};
use kiln::infra::toolchain::{GnuToolchain, Toolchain};

fn setup(output_type: &str, extra: &str) -> TestProject {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.write_c_manifest(&compiler, output_type, extra);
    project.write_c_sources();
    project
}

fn builder(project: &TestProject, options: BuildOptions) -> Builder {
    let manifest = Manifest::discover(&project.path(), None).unwrap();
    let compiler = project.path().join(common::FAKE_COMPILER);
    let toolchain: Arc<dyn Toolchain> = Arc::new(GnuToolchain::new("fake", compiler));
    Builder::new(project.path(), manifest, options)
        .unwrap()
        .with_toolchain(toolchain)
}

fn default_builder(project: &TestProject) -> Builder {
    builder(
        project,
        BuildOptions {
            jobs: Some(2),
            ..BuildOptions::default()
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_incremental_rebuild() {
    let project = setup("executable", "");

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 2);
    assert_eq!(summary.skipped, 0);
    assert!(summary.linked);
    assert_eq!(summary.artifact, project.path().join("build/debug/demo"));
    assert!(summary.artifact.exists());
    assert!(project.file_exists("build/debug/src/main.c.o"));
    assert!(project.file_exists("build/debug/src/util.c.o"));
    assert!(Cache::default_path(&project.path()).exists());

    project.clear_invocations();
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 0);
    assert_eq!(summary.skipped, 2);
    assert!(!summary.linked);
    assert!(project.invocations().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_header_change_recompiles_includers() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    project.clear_invocations();
    project.touch("include/util.h");
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 2);
    assert!(summary.linked);
    assert_eq!(project.compile_invocations().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_source_change_recompiles_only_that_source() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    project.clear_invocations();
    project.touch("src/util.c");
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 1);
    assert_eq!(summary.skipped, 1);
    let compiles = project.compile_invocations();
    assert_eq!(compiles.len(), 1);
    assert!(compiles[0].contains("util.c"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deleted_object_is_rebuilt() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    std::fs::remove_file(project.path().join("build/debug/src/main.c.o")).unwrap();
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 1);
    assert!(summary.linked);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_target_flags_change_command() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    project.clear_invocations();
    let options = BuildOptions {
        target: "release".to_string(),
        ..BuildOptions::default()
    };
    let summary = builder(&project, options).build().await.unwrap();
    assert_eq!(summary.compiled, 2);
    assert_eq!(summary.artifact, project.path().join("build/release/demo"));
    assert!(project
        .compile_invocations()
        .iter()
        .all(|line| line.contains("-O2") && line.contains("-Wall")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compile_flags_and_includes() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    let include = format!("-I{}", project.path().join("include").display());
    for line in project.compile_invocations() {
        assert!(line.contains(&include), "missing include dir in: {line}");
        assert!(line.contains(" -o "));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_graph_after_build() {
    let project = setup("executable", "");
    let mut builder = default_builder(&project);
    builder.build().await.unwrap();

    let graph = builder.graph();
    let artifact = project.path().join("build/debug/demo");
    let entry = graph.node(&artifact.to_string_lossy()).unwrap();
    assert_eq!(entry.kind, NodeKind::Executable);
    assert_eq!(entry.dependencies().len(), 2);
    assert_eq!(graph.entry_points().len(), 1);

    let header = project.path().join("include/util.h");
    let dependents = graph.dependents_recursive(&header.to_string_lossy());
    assert!(dependents.iter().any(|n| n.kind == NodeKind::Source));
    assert!(dependents.iter().any(|n| n.kind == NodeKind::Object));
    assert!(dependents.iter().any(|n| n.kind == NodeKind::Executable));

    let order = graph.build_order().unwrap();
    assert_eq!(order.last().unwrap().id, entry.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_included_source_is_one_graph_node() {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.create_file(
        "kiln.toml",
        &format!(
            r#"[project]
name = "demo"
language = "c"

[build]
output_type = "executable"
sources = ["./src/*.c"]

[toolchain]
compiler = "{}"
"#,
            compiler.display()
        ),
    );
    project.create_file("src/main.c", "#include \"gen.c\"\nint main(void) { return 0; }\n");
    project.create_file("src/gen.c", "int gen;\n");

    let mut builder = default_builder(&project);
    builder.build().await.unwrap();

    let graph = builder.graph();
    let generated = project.path().join("src/gen.c");
    let node = graph.node(&generated.to_string_lossy()).unwrap();
    assert_eq!(node.kind, NodeKind::Source);
    // two sources, two objects, one executable
    assert_eq!(graph.len(), 5);
    let main = graph
        .node(&project.path().join("src/main.c").to_string_lossy())
        .unwrap();
    assert_eq!(main.dependencies().to_vec(), vec![node.id.clone()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_compile_failures_reported() {
    let project = setup("executable", "");
    project.create_file("src/main.c", "FAKE_ERROR\n");
    project.create_file("src/util.c", "FAKE_ERROR\n");

    let err = default_builder(&project).build().await.unwrap_err();
    match err {
        KilnError::Build(BuildError::Compilation { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().any(|f| f.contains("main.c")));
            assert!(failures.iter().any(|f| f.contains("util.c")));
            assert!(failures.iter().all(|f| f.contains("forced failure")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!project.file_exists("build/debug/demo"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_warnings_are_counted() {
    let project = setup("executable", "");
    project.create_file("src/util.c", "FAKE_WARNING\n");

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.warnings, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_static_library() {
    if which::which("ar").is_err() {
        return;
    }
    let project = setup("static_lib", "");

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.artifact, project.path().join("build/debug/libdemo.a"));
    assert!(summary.artifact.exists());
    assert!(summary.linked);

    let summary = default_builder(&project).build().await.unwrap();
    assert!(!summary.linked);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shared_library_flags() {
    let project = setup("shared_lib", "");

    let summary = default_builder(&project).build().await.unwrap();
    assert!(summary.artifact.exists());
    let link = project
        .invocations()
        .into_iter()
        .find(|line| line.contains("-shared"))
        .unwrap();
    assert!(link.contains("-fPIC"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hooks_run_in_order_with_output_placeholder() {
    let extra = r#"pre_build_cmds = ["touch pre.stamp"]
post_build_cmds = ["cp ${output} copied"]
"#;
    let project = setup("executable", extra);

    let summary = default_builder(&project).build().await.unwrap();
    assert!(project.file_exists("pre.stamp"));
    assert_eq!(
        project.read_file("copied"),
        std::fs::read_to_string(&summary.artifact).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_output_placeholder_with_space_in_path() {
    let project = TestProject::with_prefix("kiln space");
    let compiler = project.install_fake_compiler();
    project.write_c_manifest(
        &compiler,
        "executable",
        "post_build_cmds = [\"cp ${output} copied\"]\n",
    );
    project.write_c_sources();

    let summary = default_builder(&project).build().await.unwrap();
    assert!(summary.artifact.to_string_lossy().contains(' '));
    assert_eq!(
        project.read_file("copied"),
        std::fs::read_to_string(&summary.artifact).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_header_replaced_with_older_mtime_recompiles() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    // Replace the header the way `cp -p` would: new content, old mtime
    let header = project.path().join("include/util.h");
    let modified = std::fs::metadata(&header).unwrap().modified().unwrap();
    std::fs::write(&header, "int util(void);\n#define UTIL_VERSION 2\n").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&header)
        .unwrap()
        .set_modified(modified - Duration::from_secs(60))
        .unwrap();

    project.clear_invocations();
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 2);
    assert!(summary.linked);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_pre_build_stops_build() {
    let project = setup("executable", "pre_build_cmds = [\"false\"]\n");

    let err = default_builder(&project).build().await.unwrap_err();
    assert!(matches!(err, KilnError::Build(BuildError::PreBuild(_))));
    assert!(project.invocations().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_post_build_fails_build() {
    let project = setup("executable", "post_build_cmds = [\"false\"]\n");

    let err = default_builder(&project).build().await.unwrap_err();
    assert!(matches!(err, KilnError::Build(BuildError::PostBuild(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_sources() {
    let project = setup("executable", "");
    std::fs::remove_dir_all(project.path().join("src")).unwrap();

    let err = default_builder(&project).build().await.unwrap_err();
    assert!(matches!(
        err,
        KilnError::Discovery(DiscoveryError::NoSources)
    ));
}

#[test]
fn test_invalid_output_type() {
    let project = setup("plugin", "");
    let err = Manifest::discover(&project.path(), None).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidOutputType { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clean_then_full_rebuild() {
    let project = setup("executable", "");
    default_builder(&project).build().await.unwrap();

    let report = default_builder(&project).clean().unwrap();
    assert!(report
        .removed
        .contains(&project.path().join("build/debug")));
    assert!(!project.file_exists("build/debug/demo"));

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 2);
    assert!(summary.linked);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cpp_header_edit_recompiles_and_relinks() {
    let project = TestProject::new();
    let compiler = project.install_fake_compiler();
    project.create_file(
        "kiln.toml",
        &format!(
            r#"[project]
name = "app"
standard = "c++17"

[build]
output_type = "executable"
sources = ["*.cpp"]

[toolchain]
compiler = "{}"
"#,
            compiler.display()
        ),
    );
    project.create_file("a.h", "int answer();\n");
    project.create_file("a.cpp", "#include \"a.h\"\nint main() { return 0; }\n");

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 1);
    assert!(summary.linked);
    let invocations = project.invocations();
    assert!(invocations[0].contains("-std=c++17"));
    assert!(invocations.last().unwrap().contains("-lstdc++"));

    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 0);
    assert!(!summary.linked);

    project.touch("a.h");
    let summary = default_builder(&project).build().await.unwrap();
    assert_eq!(summary.compiled, 1);
    assert!(summary.linked);
}
