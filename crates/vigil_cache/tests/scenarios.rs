//! End-to-end cache behavior over on-disk projects.
//!
//! Each test lays out a small project in a temporary directory and drives a
//! [`CacheManager`] the way a test runner or description generator would.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use vigil_cache::{CacheManager, Lookup, MissReason, StoreOutcome};
use vigil_common::ByteSize;
use vigil_config::VigilConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestResult {
    passed: bool,
    output: String,
}

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn passed(output: &str) -> TestResult {
    TestResult {
        passed: true,
        output: output.to_string(),
    }
}

/// `a.ts` imports `b.ts`.
fn two_file_project() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let b = write(dir.path(), "src/b.ts", "export function b() { return 1; }\n");
    let a = write(
        dir.path(),
        "src/a.ts",
        "import { b } from './b';\nexport const a = () => b();\n",
    );
    (dir, a, b)
}

// ===========================================================================
// Validity by content hash
// ===========================================================================

#[test]
fn unchanged_files_hit_with_identical_payload() {
    let (dir, a, _b) = two_file_project();
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    let result = passed("1 passing");

    assert!(cache.store(&a, "test", &result).is_stored());
    match cache.lookup::<TestResult>(&a, "test") {
        Lookup::Hit(hit) => assert_eq!(hit.payload, result),
        Lookup::Miss(reason) => panic!("expected hit, got {reason}"),
    }
}

#[test]
fn editing_an_imported_file_invalidates() {
    let (dir, a, b) = two_file_project();
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("1 passing"));

    fs::write(&b, "export function b() { return 2; }\n").unwrap();
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").miss_reason(),
        Some(MissReason::Stale)
    );
    // The stale entry is gone, not kept around
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").miss_reason(),
        Some(MissReason::NeverCached)
    );
}

#[test]
fn restoring_content_does_not_resurrect_removed_entry() {
    let (dir, a, b) = two_file_project();
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("ok"));

    let original = fs::read_to_string(&b).unwrap();
    fs::write(&b, "export function b() { return 3; }\n").unwrap();
    assert!(!cache.lookup::<TestResult>(&a, "test").is_hit());
    fs::write(&b, original).unwrap();
    assert!(!cache.lookup::<TestResult>(&a, "test").is_hit());
}

#[test]
fn transitive_dependency_edit_invalidates() {
    let dir = TempDir::new().unwrap();
    let c = write(dir.path(), "c.ts", "export const c = 1;\n");
    write(dir.path(), "b.ts", "import { c } from './c';\nexport const b = c;\n");
    let a = write(dir.path(), "a.ts", "import { b } from './b';\nexport const a = b;\n");
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());

    cache.store(&a, "test", &passed("ok"));
    assert!(cache.lookup::<TestResult>(&a, "test").is_hit());
    fs::write(&c, "export const c = 2;\n").unwrap();
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").miss_reason(),
        Some(MissReason::Stale)
    );
}

#[test]
fn renaming_a_dependency_with_identical_content_invalidates() {
    let (dir, a, b) = two_file_project();
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("ok"));
    assert!(cache.lookup::<TestResult>(&a, "test").is_hit());

    fs::rename(&b, dir.path().join("src/b.tsx")).unwrap();
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").miss_reason(),
        Some(MissReason::Stale)
    );
}

#[test]
fn local_module_shadowing_an_external_import_invalidates() {
    let dir = TempDir::new().unwrap();
    let test = write(dir.path(), "test_app.py", "import helpers\n");
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    cache.store(&test, "test", &passed("ok"));
    assert!(cache.lookup::<TestResult>(&test, "test").is_hit());

    write(dir.path(), "helpers.py", "def helper():\n    return 1\n");
    assert_eq!(
        cache.lookup::<TestResult>(&test, "test").miss_reason(),
        Some(MissReason::Stale)
    );
}

#[test]
fn package_imports_are_not_tracked() {
    let dir = TempDir::new().unwrap();
    let lib = write(dir.path(), "node_modules/lib/index.js", "module.exports = 1;\n");
    let a = write(
        dir.path(),
        "a.ts",
        "import lib from 'lib';\nimport x from './node_modules/lib/index.js';\n",
    );
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("ok"));

    fs::write(&lib, "module.exports = 2;\n").unwrap();
    assert!(cache.lookup::<TestResult>(&a, "test").is_hit());
}

#[test]
fn python_and_c_projects_are_tracked() {
    let dir = TempDir::new().unwrap();
    let helper = write(dir.path(), "pkg/helper.py", "VALUE = 1\n");
    write(dir.path(), "pkg/__init__.py", "");
    let test = write(dir.path(), "pkg/test_main.py", "from .helper import VALUE\n");
    let header = write(dir.path(), "include/defs.h", "#define N 1\n");
    let main = write(dir.path(), "main.c", "#include \"defs.h\"\nint main() { return N; }\n");
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());

    cache.store(&test, "test", &passed("py"));
    cache.store(&main, "test", &passed("c"));
    fs::write(&helper, "VALUE = 2\n").unwrap();
    fs::write(&header, "#define N 2\n").unwrap();

    assert!(!cache.lookup::<TestResult>(&test, "test").is_hit());
    assert!(!cache.lookup::<TestResult>(&main, "test").is_hit());
}

// ===========================================================================
// Budget
// ===========================================================================

#[test]
fn two_sixty_byte_entries_in_hundred_byte_budget_leave_one() {
    let dir = TempDir::new().unwrap();
    let first = write(dir.path(), "first.ts", "export {};\n");
    let second = write(dir.path(), "second.ts", "export {};\n");
    let mut config = VigilConfig::default();
    config.cache.max_bytes = ByteSize::new(100);
    let cache = CacheManager::in_memory(config, dir.path());

    // 58 characters serialize to 60 bytes including quotes
    let payload = "p".repeat(58);
    cache.store(&first, "test", &payload);
    cache.store(&second, "test", &payload);

    let report = cache.effectiveness_report();
    assert_eq!(report.entry_count, 1);
    assert_eq!(report.total_bytes, 60);
    assert_eq!(report.entries_evicted, 1);
    assert_eq!(
        cache.lookup::<String>(&first, "test").miss_reason(),
        Some(MissReason::Evicted)
    );
}

#[test]
fn least_recently_looked_up_entry_is_evicted() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = ["a.ts", "b.ts", "c.ts", "d.ts"]
        .iter()
        .map(|name| write(dir.path(), name, &format!("// {name}\n")))
        .collect();
    let mut config = VigilConfig::default();
    config.cache.max_bytes = ByteSize::new(30);
    let cache = CacheManager::in_memory(config, dir.path());

    let payload = "q".repeat(8); // 10 bytes
    for file in files.iter().take(3).rev() {
        cache.store(file, "test", &payload);
    }
    for file in files.iter().take(3) {
        assert!(cache.lookup::<String>(file, "test").is_hit());
    }

    assert_eq!(
        cache.store(&files[3], "test", &payload),
        StoreOutcome::Stored { evicted: 1 }
    );
    assert_eq!(
        cache.lookup::<String>(&files[0], "test").miss_reason(),
        Some(MissReason::Evicted)
    );
    assert!(cache.lookup::<String>(&files[1], "test").is_hit());
    assert!(cache.lookup::<String>(&files[2], "test").is_hit());
}

// ===========================================================================
// Unresolved closures
// ===========================================================================

#[test]
fn depth_limited_closure_is_cached_until_unresolved_ttl() {
    let dir = TempDir::new().unwrap();
    let levels = ["l0", "l1", "l2", "l3", "l4", "l5"];
    for pair in levels.windows(2) {
        write(
            dir.path(),
            &format!("{}.ts", pair[0]),
            &format!("import {{ x }} from './{}';\nexport const y = x;\n", pair[1]),
        );
    }
    write(dir.path(), "l5.ts", "export const x = 5;\n");
    let target = dir.path().join("l0.ts");

    let mut config = VigilConfig::default();
    config.cache.max_dependency_depth = 3;
    config.cache.unresolved_ttl_ms = 200;
    let cache = CacheManager::in_memory(config, dir.path());

    let resolution = cache.resolver().resolve(&target);
    assert_eq!(resolution.dependencies.len(), 3);
    assert!(!resolution.is_complete());

    assert!(cache.store(&target, "test", &passed("deep")).is_stored());
    assert!(cache.lookup::<TestResult>(&target, "test").is_hit());

    thread::sleep(Duration::from_millis(400));
    assert_eq!(
        cache.lookup::<TestResult>(&target, "test").miss_reason(),
        Some(MissReason::Expired)
    );
}

#[test]
fn unparseable_target_is_cached_within_ttl() {
    let dir = TempDir::new().unwrap();
    let target = write(dir.path(), "script.rb", "require 'thing'\n");
    let cache = CacheManager::in_memory(VigilConfig::default(), dir.path());

    cache.store(&target, "test", &passed("ruby"));
    assert!(cache.lookup::<TestResult>(&target, "test").is_hit());
    fs::write(&target, "require 'other'\n").unwrap();
    assert_eq!(
        cache.lookup::<TestResult>(&target, "test").miss_reason(),
        Some(MissReason::Stale)
    );
}

// ===========================================================================
// Persistence
// ===========================================================================

#[test]
fn reopen_serves_persisted_entries() {
    let (dir, a, _b) = two_file_project();
    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("persisted"));
    cache.dispose().unwrap();

    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").into_payload(),
        Some(passed("persisted"))
    );
}

#[test]
fn reopen_after_edit_is_stale() {
    let (dir, a, b) = two_file_project();
    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    cache.store(&a, "test", &passed("persisted"));
    cache.dispose().unwrap();

    fs::write(&b, "export function b() { return 42; }\n").unwrap();
    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").miss_reason(),
        Some(MissReason::Stale)
    );
}

#[test]
fn corrupt_index_starts_empty_and_recovers() {
    let (dir, a, _b) = two_file_project();
    write(dir.path(), ".vigil-cache/index.json", "{\"schema_version\": 1, \"entr");

    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    assert!(cache.is_empty());
    cache.store(&a, "test", &passed("fresh"));
    cache.dispose().unwrap();

    let cache = CacheManager::open(VigilConfig::default(), dir.path());
    assert!(cache.lookup::<TestResult>(&a, "test").is_hit());
}

#[test]
fn large_payloads_round_trip_through_blobs() {
    let (dir, a, _b) = two_file_project();
    let mut config = VigilConfig::default();
    config.cache.inline_payload_limit = ByteSize::new(128);
    let big = passed(&"line\n".repeat(1_000));

    let cache = CacheManager::open(config.clone(), dir.path());
    cache.store(&a, "test", &big);
    cache.dispose().unwrap();
    assert_eq!(
        fs::read_dir(dir.path().join(".vigil-cache/blobs"))
            .unwrap()
            .count(),
        1
    );

    let cache = CacheManager::open(config, dir.path());
    assert_eq!(
        cache.lookup::<TestResult>(&a, "test").into_payload(),
        Some(big)
    );
}

#[test]
fn absolute_cache_dir_outside_project() {
    let (dir, a, _b) = two_file_project();
    let elsewhere = TempDir::new().unwrap();
    let mut config = VigilConfig::default();
    config.cache.dir = elsewhere.path().join("cache");

    let cache = CacheManager::open(config, dir.path());
    cache.store(&a, "test", &passed("ok"));
    cache.flush().unwrap();
    assert!(elsewhere.path().join("cache/index.json").exists());
    assert!(!dir.path().join(".vigil-cache").exists());
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[test]
fn concurrent_stores_and_lookups_keep_budget_and_results() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..16)
        .map(|i| write(dir.path(), &format!("f{i}.ts"), &format!("export const v = {i};\n")))
        .collect();
    let mut config = VigilConfig::default();
    config.cache.max_bytes = ByteSize::new(200);
    let cache = Arc::new(CacheManager::in_memory(config, dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let files = files.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    let file = &files[(t * 7 + round) % files.len()];
                    let value = format!("{}", file.display());
                    cache.store(file, "test", &value);
                    // Whatever is served must be the value stored for that file
                    if let Some(got) = cache.lookup::<String>(file, "test").into_payload() {
                        assert_eq!(got, value);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let report = cache.effectiveness_report();
    assert!(report.total_bytes <= 200);
    assert_eq!(report.lookups, 400);
}

#[test]
fn store_then_lookup_from_same_thread_sees_value() {
    let (dir, a, _b) = two_file_project();
    let cache = Arc::new(CacheManager::in_memory(VigilConfig::default(), dir.path()));
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let a = a.clone();
            thread::spawn(move || {
                let ns = format!("worker-{i}");
                cache.store(&a, &ns, &i);
                assert_eq!(cache.lookup::<i32>(&a, &ns).into_payload(), Some(i));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
