use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use marmoset_cli::{run_analysis, write_artifacts, RunConfig};

#[derive(Parser)]
#[command(name = "marmoset")]
#[command(about = "Bounded symbolic execution and model checking for compiled C programs")]
#[command(long_about = "Bounded symbolic execution and model checking for compiled C programs.\n\n\
    Takes a program artifact produced by the front end, explores its feasible\n\
    paths and thread interleavings, and reports assertion violations,\n\
    out-of-bounds accesses, data races, and unresolved loops with\n\
    deterministic counters.")]
#[command(version)]
struct Cli {
    /// Path to the compiled program artifact (JSON IR)
    artifact: PathBuf,

    /// Directory receiving report.txt and report.json
    #[arg(long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Additional checks to enable (supported: termination)
    #[arg(long = "check", value_delimiter = ',')]
    check: Vec<String>,

    /// Halt exploration at the first finding
    #[arg(long = "se-exit-on-error", default_value_t = false)]
    se_exit_on_error: bool,

    /// Per-path bound on iterations of a single loop
    #[arg(long, default_value_t = 64)]
    loop_bound: u32,

    /// Per-path bound on context switches between program threads
    #[arg(long, default_value_t = 64)]
    max_context_switches: u32,

    /// Wall-clock timeout in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Engine worker threads sharing the exploration frontier
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Frontier order: dfs | bfs
    #[arg(long, default_value = "dfs")]
    search: String,

    /// Partial-order reduction: full | off
    #[arg(long, default_value = "full")]
    por: String,

    /// Output format on stdout: text | json
    #[arg(long, default_value = "text")]
    format: String,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RunConfig {
        checks: cli.check,
        exit_on_error: cli.se_exit_on_error,
        loop_bound: cli.loop_bound,
        max_context_switches: cli.max_context_switches,
        timeout_secs: cli.timeout,
        jobs: cli.jobs,
        search: cli.search,
        por: cli.por,
    };

    let output = run_analysis(&cli.artifact, &config)?;
    match cli.format.as_str() {
        "text" => println!("{}", output.report),
        "json" => println!("{}", marmoset_cli::render_json(&output)?),
        other => miette::bail!("unknown output format '{other}' (expected text or json)"),
    }
    if let Some(out_dir) = &cli.out_dir {
        write_artifacts(out_dir, &output)?;
    }
    Ok(())
}
