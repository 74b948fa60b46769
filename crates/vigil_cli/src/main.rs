//! Vigil CLI: content-hash validated result caching from the command line.
//!
//! Provides `vigil run` for caching a command's outcome per target file,
//! `vigil lookup`, `vigil resolve` and `vigil hash` for inspecting what the
//! cache sees, and `vigil stats`, `vigil invalidate` and `vigil clear` for
//! maintenance.

#![warn(missing_docs)]

mod inspect;
mod maintain;
mod project;
mod run;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Vigil: skip work whose inputs have not changed.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Dependency-aware result cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `vigil.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Override the cache directory from the configuration.
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command, or replay its cached outcome if the target is unchanged.
    Run(RunArgs),
    /// Report whether a valid cached result exists for a target.
    Lookup(LookupArgs),
    /// Print the dependency closure of a target.
    Resolve(ResolveArgs),
    /// Print the content hashes that vouch for a target.
    Hash(HashArgs),
    /// Print cache effectiveness statistics.
    Stats(StatsArgs),
    /// Drop cached results for the given files.
    Invalidate(InvalidateArgs),
    /// Drop every cached result.
    Clear,
}

/// Arguments for the `vigil run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// File whose dependency closure decides whether the cached outcome is valid.
    #[arg(short, long)]
    pub target: String,

    /// Cache namespace the outcome is stored under.
    #[arg(short, long, default_value = "test")]
    pub namespace: String,

    /// Also cache runs that exit with a non-zero status.
    #[arg(long)]
    pub cache_failures: bool,

    /// Run the command even if a valid cached outcome exists.
    #[arg(long)]
    pub force: bool,

    /// The command and its arguments.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Arguments for the `vigil lookup` subcommand.
#[derive(Parser, Debug)]
pub struct LookupArgs {
    /// Target file.
    pub target: String,

    /// Cache namespace.
    #[arg(short, long, default_value = "test")]
    pub namespace: String,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `vigil resolve` subcommand.
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Target file.
    pub target: String,

    /// Override the configured maximum import depth.
    #[arg(long)]
    pub depth: Option<usize>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `vigil hash` subcommand.
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Target file.
    pub target: String,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `vigil stats` subcommand.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `vigil invalidate` subcommand.
#[derive(Parser, Debug)]
pub struct InvalidateArgs {
    /// Files whose cached results are dropped.
    #[arg(required = true, num_args = 1..)]
    pub paths: Vec<String>,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
    /// Optional cache directory override.
    pub cache_dir: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
        cache_dir: cli.cache_dir,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Run(ref args) => run::run(args, &global),
        Command::Lookup(ref args) => inspect::lookup(args, &global),
        Command::Resolve(ref args) => inspect::resolve(args, &global),
        Command::Hash(ref args) => inspect::hash(args, &global),
        Command::Stats(ref args) => maintain::stats(args, &global),
        Command::Invalidate(ref args) => maintain::invalidate(args, &global),
        Command::Clear => maintain::clear(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over the flags.
fn init_tracing(global: &GlobalArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(global)));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn default_log_level(global: &GlobalArgs) -> &'static str {
    if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    }
}
