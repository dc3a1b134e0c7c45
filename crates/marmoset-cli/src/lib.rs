#![doc = include_str!("../README.md")]

//! Library surface of the CLI: configuration parsing helpers, the
//! analysis driver, and report artifact writing. The binary in `main.rs`
//! is a thin clap wrapper over this.

use std::path::{Path, PathBuf};

use miette::{bail, IntoDiagnostic, WrapErr};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use marmoset_engine::{analyze, ExecOptions, PorMode, RunReport, SearchOrder};

/// Plain-data run configuration, decoupled from the clap surface.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub checks: Vec<String>,
    pub exit_on_error: bool,
    pub loop_bound: u32,
    pub max_context_switches: u32,
    pub timeout_secs: u64,
    pub jobs: usize,
    pub search: String,
    pub por: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        let opts = ExecOptions::default();
        Self {
            checks: Vec::new(),
            exit_on_error: false,
            loop_bound: opts.loop_bound,
            max_context_switches: opts.max_context_switches,
            timeout_secs: 0,
            jobs: 1,
            search: "dfs".into(),
            por: "full".into(),
        }
    }
}

pub fn parse_search(name: &str) -> miette::Result<SearchOrder> {
    match name {
        "dfs" => Ok(SearchOrder::Dfs),
        "bfs" => Ok(SearchOrder::Bfs),
        other => bail!("unknown search order '{other}' (expected dfs or bfs)"),
    }
}

pub fn parse_por(name: &str) -> miette::Result<PorMode> {
    match name {
        "full" => Ok(PorMode::Full),
        "off" => Ok(PorMode::Off),
        other => bail!("unknown partial-order reduction mode '{other}' (expected full or off)"),
    }
}

/// Translate a [`RunConfig`] into engine options, rejecting unknown check
/// names up front.
pub fn exec_options(config: &RunConfig) -> miette::Result<ExecOptions> {
    let mut check_termination = false;
    for check in &config.checks {
        match check.as_str() {
            "termination" => check_termination = true,
            other => bail!("unknown check '{other}' (supported: termination)"),
        }
    }
    if config.jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    Ok(ExecOptions {
        search: parse_search(&config.search)?,
        por: parse_por(&config.por)?,
        jobs: config.jobs,
        loop_bound: config.loop_bound,
        max_context_switches: config.max_context_switches,
        timeout_secs: config.timeout_secs,
        check_termination,
        exit_on_error: config.exit_on_error,
        ..ExecOptions::default()
    })
}

/// Result of one analysis run, with the provenance echoed in reports.
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    pub artifact: PathBuf,
    pub sha256: String,
    pub config: RunConfig,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Load an artifact and analyze it. A malformed artifact is fatal; engine
/// findings are part of the report, never an error.
pub fn run_analysis(artifact: &Path, config: &RunConfig) -> miette::Result<RunOutput> {
    let opts = exec_options(config)?;
    let bytes = std::fs::read(artifact)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read artifact '{}'", artifact.display()))?;
    let sha256 = sha256_hex(&bytes);
    let source = String::from_utf8(bytes)
        .into_diagnostic()
        .wrap_err("artifact is not valid UTF-8")?;
    let program = marmoset_ir::load_str(&source)?;

    info!(
        artifact = %artifact.display(),
        sha256 = %sha256,
        functions = program.functions.len(),
        globals = program.globals.len(),
        "analyzing program"
    );
    let report = analyze(&program, &opts);
    Ok(RunOutput {
        report,
        artifact: artifact.to_path_buf(),
        sha256,
        config: config.clone(),
    })
}

/// Machine-readable report envelope, tying results to the exact input.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub artifact: String,
    pub sha256: &'a str,
    pub config: &'a RunConfig,
    pub report: &'a RunReport,
}

pub fn render_json(output: &RunOutput) -> miette::Result<String> {
    let envelope = JsonReport {
        artifact: output.artifact.display().to_string(),
        sha256: &output.sha256,
        config: &output.config,
        report: &output.report,
    };
    serde_json::to_string_pretty(&envelope).into_diagnostic()
}

/// Write `report.txt` and `report.json` into the output directory.
pub fn write_artifacts(out_dir: &Path, output: &RunOutput) -> miette::Result<()> {
    std::fs::create_dir_all(out_dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot create output directory '{}'", out_dir.display()))?;
    std::fs::write(out_dir.join("report.txt"), format!("{}\n", output.report))
        .into_diagnostic()?;
    std::fs::write(out_dir.join("report.json"), render_json(output)?).into_diagnostic()?;
    Ok(())
}
