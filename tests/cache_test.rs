//! Integration tests for the build cache
//!
//! Exercises the cache the way a build does across process runs: record,
//! save, reopen, then decide freshness against the filesystem.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::TestProject;
use kiln::core::cache::{Cache, Freshness, StaleReason};
use kiln::error::CacheError;

struct Built {
    project: TestProject,
    object: PathBuf,
    library: PathBuf,
    deps: Vec<PathBuf>,
    hash: String,
}

/// Record an object built from a source and header, and a library built from
/// the object, then save the cache
fn build() -> Built {
    let project = TestProject::new();
    project.create_file("src/a.c", "#include \"a.h\"\n");
    project.create_file("include/a.h", "int a;\n");
    project.create_file("build/a.c.o", "object");
    project.create_file("build/liba.a", "archive");

    let root = project.path();
    let object = root.join("build/a.c.o");
    let library = root.join("build/liba.a");
    let deps = vec![root.join("src/a.c"), root.join("include/a.h")];
    let hash = Cache::calculate_command_hash("cc", &["-c".to_string()]);

    let mut cache = Cache::open(Cache::default_path(&root)).unwrap();
    cache
        .update_entry(&object, &deps, &hash, &object, Duration::from_millis(5))
        .unwrap();
    cache
        .update_entry(
            &library,
            std::slice::from_ref(&object),
            "ar",
            &library,
            Duration::ZERO,
        )
        .unwrap();
    cache.save().unwrap();

    Built {
        project,
        object,
        library,
        deps,
        hash,
    }
}

fn reopen(built: &Built) -> Cache {
    Cache::open(Cache::default_path(&built.project.path())).unwrap()
}

#[test]
fn test_fresh_after_reopen() {
    let built = build();
    let cache = reopen(&built);
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.needs_rebuild(&built.object, &built.deps, &built.hash),
        Freshness::UpToDate
    );
    assert_eq!(
        cache.needs_rebuild(&built.library, std::slice::from_ref(&built.object), "ar"),
        Freshness::UpToDate
    );
}

#[test]
fn test_header_change_reaches_library() {
    let built = build();
    built.project.touch("include/a.h");
    let cache = reopen(&built);

    assert!(cache
        .needs_rebuild(&built.object, &built.deps, &built.hash)
        .needs_rebuild());
    // The library's object is still intact, but the header under it moved
    let freshness =
        cache.needs_rebuild(&built.library, std::slice::from_ref(&built.object), "ar");
    assert!(matches!(
        freshness,
        Freshness::Stale(StaleReason::DependencyNewer(ref path)) if path.ends_with("a.h")
    ));
}

#[test]
fn test_replaced_object_invalidates_library() {
    let built = build();
    built.project.create_file("build/a.c.o", "different object");
    let cache = reopen(&built);

    assert!(cache
        .needs_rebuild(&built.library, std::slice::from_ref(&built.object), "ar")
        .needs_rebuild());
}

#[test]
fn test_corrupt_cache_file_is_an_error() {
    let built = build();
    std::fs::write(Cache::default_path(&built.project.path()), "[1, 2").unwrap();
    let err = Cache::open(Cache::default_path(&built.project.path())).unwrap_err();
    assert!(matches!(err, CacheError::Parse { .. }));
}

#[test]
fn test_clean_forgets_deleted_artifacts() {
    let built = build();
    std::fs::remove_file(&built.library).unwrap();

    let mut cache = reopen(&built);
    assert_eq!(cache.clean(), 1);
    assert!(cache.entry(&built.library).is_none());
    assert!(cache.entry(&built.object).is_some());
}
