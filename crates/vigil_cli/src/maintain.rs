//! `vigil stats`, `vigil invalidate` and `vigil clear`.

use serde::Serialize;
use vigil_cache::{CacheManager, EffectivenessReport};
use vigil_common::ByteSize;

use crate::project::{open_cache, target_path};
use crate::{GlobalArgs, InvalidateArgs, StatsArgs};

#[derive(Debug, Serialize)]
struct StatsReport {
    cache_dir: Option<String>,
    persistence_disabled: bool,
    #[serde(flatten)]
    report: EffectivenessReport,
}

impl StatsReport {
    fn collect(cache: &CacheManager) -> Self {
        Self {
            cache_dir: cache.cache_dir().map(|d| d.display().to_string()),
            persistence_disabled: cache.is_persistence_disabled(),
            report: cache.effectiveness_report(),
        }
    }

    fn render(&self) -> String {
        let location = self.cache_dir.as_deref().unwrap_or("(in memory)");
        let mut out = format!(
            "cache: {location}\nbudget: {} of {} used\n{}",
            ByteSize::new(self.report.total_bytes),
            ByteSize::new(self.report.max_bytes),
            self.report
        );
        if self.persistence_disabled {
            out.push_str("\nwarning: persistence disabled after repeated write failures");
        }
        out
    }
}

/// Runs `vigil stats`.
///
/// Counters only cover the current process, so a standalone invocation mostly
/// reports what the persisted store holds.
pub fn stats(args: &StatsArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let report = StatsReport::collect(&cache);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(0)
}

/// Runs `vigil invalidate`.
pub fn invalidate(
    args: &InvalidateArgs,
    global: &GlobalArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let mut removed = 0;
    for raw in &args.paths {
        removed += cache.invalidate(&target_path(raw)?);
    }
    cache.dispose()?;
    if !global.quiet {
        eprintln!("   Invalidated {removed} entries");
    }
    Ok(0)
}

/// Runs `vigil clear`.
pub fn clear(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let count = cache.len();
    cache.clear();
    cache.dispose()?;
    if !global.quiet {
        eprintln!("   Cleared {count} entries");
    }
    Ok(0)
}
