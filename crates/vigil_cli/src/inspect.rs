//! `vigil lookup`, `vigil resolve` and `vigil hash`: read-only views of what
//! the cache sees for one target.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use vigil_cache::{CacheManager, ClosureSnapshot, DependencyResolver, Lookup, Resolution};

use crate::project::{open_cache, target_path};
use crate::{GlobalArgs, HashArgs, LookupArgs, ResolveArgs};

/// Machine-readable result of `vigil lookup`.
#[derive(Debug, Serialize)]
struct LookupReport {
    target: String,
    namespace: String,
    hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl LookupReport {
    fn new(target: &Path, namespace: &str, lookup: Lookup<Value>) -> Self {
        let mut report = Self {
            target: target.display().to_string(),
            namespace: namespace.to_string(),
            hit: false,
            reason: None,
            age_ms: None,
            payload: None,
        };
        match lookup {
            Lookup::Hit(hit) => {
                report.hit = true;
                report.age_ms = Some(hit.age.as_millis() as u64);
                report.payload = Some(hit.payload);
            }
            Lookup::Miss(reason) => report.reason = Some(reason.to_string()),
        }
        report
    }

    fn render(&self) -> String {
        match (self.hit, &self.payload) {
            (true, Some(payload)) => format!(
                "hit {} [{}] (age {}ms)\n{}",
                self.target,
                self.namespace,
                self.age_ms.unwrap_or(0),
                serde_json::to_string_pretty(payload).unwrap_or_default()
            ),
            _ => format!(
                "miss {} [{}]: {}",
                self.target,
                self.namespace,
                self.reason.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct UnresolvedReport {
    file: String,
    reason: String,
}

/// Machine-readable result of `vigil resolve`.
#[derive(Debug, Serialize)]
struct ResolveReport {
    target: String,
    max_depth: usize,
    complete: bool,
    dependencies: Vec<String>,
    unresolved: Vec<UnresolvedReport>,
}

impl ResolveReport {
    fn new(target: &Path, max_depth: usize, resolution: &Resolution) -> Self {
        Self {
            target: target.display().to_string(),
            max_depth,
            complete: resolution.is_complete(),
            dependencies: resolution
                .dependencies
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            unresolved: resolution
                .unresolved
                .iter()
                .map(|u| UnresolvedReport {
                    file: u.file.display().to_string(),
                    reason: u.kind.to_string(),
                })
                .collect(),
        }
    }

    fn render(&self) -> String {
        let mut out = format!(
            "{} ({} dependencies, depth {})",
            self.target,
            self.dependencies.len(),
            self.max_depth
        );
        for dep in &self.dependencies {
            out.push_str(&format!("\n  {dep}"));
        }
        for u in &self.unresolved {
            out.push_str(&format!("\n  ? {}: {}", u.file, u.reason));
        }
        out
    }
}

/// Machine-readable result of `vigil hash`.
#[derive(Debug, Serialize)]
struct HashReport {
    target: String,
    target_hash: String,
    combined_hash: String,
    unresolved: bool,
    dependencies: Vec<(String, String)>,
}

impl HashReport {
    fn new(target: &Path, snapshot: &ClosureSnapshot) -> Self {
        Self {
            target: target.display().to_string(),
            target_hash: snapshot.target_hash.to_string(),
            combined_hash: snapshot.combined_hash.to_string(),
            unresolved: snapshot.unresolved,
            dependencies: snapshot
                .dependencies
                .iter()
                .map(|(path, hash)| (path.display().to_string(), hash.to_string()))
                .collect(),
        }
    }

    fn render(&self) -> String {
        let mut out = format!("{}  {}", self.combined_hash, self.target);
        out.push_str(&format!("\n  {}  (target)", self.target_hash));
        for (path, hash) in &self.dependencies {
            out.push_str(&format!("\n  {hash}  {path}"));
        }
        if self.unresolved {
            out.push_str("\n  closure incomplete, validity is TTL-bound");
        }
        out
    }
}

fn emit<T: Serialize>(report: &T, json: bool, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize report: {e}"),
        }
    } else {
        println!("{}", text());
    }
}

/// Runs `vigil lookup`. Exits 0 on a hit and 1 on a miss.
pub fn lookup(args: &LookupArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let target = target_path(&args.target)?;
    let report = LookupReport::new(
        &target,
        &args.namespace,
        cache.lookup::<Value>(&target, &args.namespace),
    );
    emit(&report, args.json, || report.render());
    // Stale entries found here were removed and must stay removed
    let _ = cache.dispose();
    Ok(if report.hit { 0 } else { 1 })
}

/// Runs `vigil resolve`.
pub fn resolve(args: &ResolveArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let target = target_path(&args.target)?;
    let resolution = resolve_with(&cache, &target, args.depth);
    let max_depth = args.depth.unwrap_or(cache.config().cache.max_dependency_depth);
    let report = ResolveReport::new(&target, max_depth, &resolution);
    emit(&report, args.json, || report.render());
    Ok(0)
}

fn resolve_with(cache: &CacheManager, target: &Path, depth: Option<usize>) -> Resolution {
    match depth {
        Some(depth) => DependencyResolver::new(
            cache.resolver().root(),
            depth,
            &cache.config().resolver,
        )
        .resolve(target),
        None => cache.resolver().resolve(target),
    }
}

/// Runs `vigil hash`.
pub fn hash(args: &HashArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let target = target_path(&args.target)?;
    let snapshot = cache.snapshot(&target)?;
    let report = HashReport::new(&target, &snapshot);
    emit(&report, args.json, || report.render());
    Ok(0)
}
