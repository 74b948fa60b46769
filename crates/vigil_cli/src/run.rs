//! `vigil run`: run a command once per distinct dependency closure.
//!
//! The command's exit code and captured output are cached under the target
//! file. While neither the target nor anything it imports changes, later
//! runs replay the cached outcome instead of executing the command.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_cache::{CacheManager, Lookup, StoreOutcome};

use crate::project::{open_cache, target_path};
use crate::{GlobalArgs, RunArgs};

/// Cached outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The command line that produced this outcome.
    pub command: Vec<String>,
    /// Process exit code; 1 if the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}

/// Runs the `vigil run` command. Returns the command's exit code, whether
/// replayed or fresh.
pub fn run(args: &RunArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (_root, cache) = open_cache(global)?;
    let target = target_path(&args.target)?;
    if !target.is_file() {
        return Err(format!("target {} is not a file", target.display()).into());
    }

    if !args.force {
        if let Some(record) = cached_record(&cache, &target, args) {
            replay(&record)?;
            if !global.quiet {
                eprintln!(
                    "   Cached {} [{}] (saved {}ms)",
                    args.target, args.namespace, record.duration_ms
                );
            }
            finish(cache);
            return Ok(record.exit_code);
        }
    }

    // Hash before running so edits made during the run are not vouched for
    let snapshot = cache.snapshot(&target);
    let record = execute(&args.command)?;
    replay(&record)?;

    if record.exit_code != 0 && !args.cache_failures {
        debug!(exit_code = record.exit_code, "not caching failed run");
    } else {
        match snapshot {
            Ok(snapshot) => {
                let outcome =
                    cache.store_with_snapshot(&target, &args.namespace, snapshot, &record);
                report_store(&outcome, args, global);
            }
            Err(e) => debug!(error = %e, "not caching, target closure unreadable"),
        }
    }

    finish(cache);
    Ok(record.exit_code)
}

fn cached_record(cache: &CacheManager, target: &Path, args: &RunArgs) -> Option<RunRecord> {
    match cache.lookup::<RunRecord>(target, &args.namespace) {
        Lookup::Hit(hit) if hit.payload.command == args.command => Some(hit.payload),
        Lookup::Hit(_) => {
            debug!("cached outcome belongs to a different command");
            None
        }
        Lookup::Miss(_) => None,
    }
}

/// Executes `command` with inherited stdin, capturing its output.
fn execute(command: &[String]) -> Result<RunRecord, Box<dyn std::error::Error>> {
    let (program, rest) = command
        .split_first()
        .ok_or("no command given after `--`")?;
    let started = Instant::now();
    let output = Command::new(program)
        .args(rest)
        .output()
        .map_err(|e| format!("failed to run {program}: {e}"))?;
    Ok(RunRecord {
        command: command.to_vec(),
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn replay(record: &RunRecord) -> std::io::Result<()> {
    std::io::stdout().write_all(record.stdout.as_bytes())?;
    std::io::stderr().write_all(record.stderr.as_bytes())?;
    std::io::stdout().flush()
}

fn report_store(outcome: &StoreOutcome, args: &RunArgs, global: &GlobalArgs) {
    if global.quiet {
        return;
    }
    match outcome {
        StoreOutcome::Stored { .. } => {
            eprintln!("   Stored {} [{}]", args.target, args.namespace)
        }
        StoreOutcome::TooLarge {
            size_bytes,
            max_bytes,
        } => eprintln!(
            "warning: output of {size_bytes} bytes exceeds the {max_bytes} byte cache budget, not cached"
        ),
        StoreOutcome::Skipped { reason } => eprintln!("warning: not cached: {reason}"),
    }
}

/// Flushes the cache. Write failures are already logged by the cache and
/// must not change the command's exit code.
fn finish(cache: CacheManager) {
    let _ = cache.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn execute_captures_output_and_exit_code() {
        let record = execute(&["sh".to_string(), "-c".to_string(), "echo hi; exit 3".to_string()])
            .unwrap();
        assert_eq!(record.exit_code, 3);
        assert_eq!(record.stdout, "hi\n");
        assert_eq!(record.command[0], "sh");
    }

    #[test]
    fn execute_reports_missing_program() {
        let err = execute(&["vigil-no-such-program".to_string()]).unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }

    #[test]
    fn execute_requires_a_program() {
        assert!(execute(&[]).is_err());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = RunRecord {
            command: vec!["jest".to_string()],
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
            duration_ms: 12,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(serde_json::from_str::<RunRecord>(&json).unwrap(), record);
    }

    #[test]
    fn cached_record_requires_same_command() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.test.ts");
        std::fs::write(&target, "export {};\n").unwrap();
        let cache = CacheManager::in_memory(vigil_config::VigilConfig::default(), dir.path());
        let record = RunRecord {
            command: vec!["jest".to_string(), "a".to_string()],
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 5,
        };
        cache.store(&target, "test", &record);

        let mut args = RunArgs {
            target: target.to_string_lossy().into_owned(),
            namespace: "test".to_string(),
            cache_failures: false,
            force: false,
            command: record.command.clone(),
        };
        assert_eq!(cached_record(&cache, &target, &args), Some(record));

        args.command = vec!["jest".to_string(), "b".to_string()];
        assert_eq!(cached_record(&cache, &target, &args), None);
    }
}
