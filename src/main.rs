mod classifier;
mod flow;
mod ir;
mod load;
mod matcher;
mod opcodes;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use crate::load::load_group;
use crate::matcher::{MatchConfig, match_classes};

/// CLI arguments for classmatch execution.
#[derive(Parser, Debug)]
#[command(
    name = "classmatch",
    about = "Deterministic structural matching of classes across two obfuscated JVM builds.",
    version
)]
struct Cli {
    /// Old build: a .class file or a .jar archive.
    #[arg(value_name = "OLD")]
    old: PathBuf,
    /// New build: a .class file or a .jar archive.
    #[arg(value_name = "NEW")]
    new: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Minimum aggregate score of the best candidate.
    #[arg(long, default_value_t = 0.5)]
    threshold: f64,
    /// Minimum lead of the best candidate over the runner-up.
    #[arg(long, default_value_t = 0.05)]
    margin: f64,
    /// Maximum number of zero-scoring classifiers before a candidate is excluded.
    #[arg(long, default_value_t = 4)]
    max_mismatch: usize,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.old.exists() {
        anyhow::bail!("input not found: {}", cli.old.display());
    }
    if !cli.new.exists() {
        anyhow::bail!("input not found: {}", cli.new.display());
    }

    let started_at = Instant::now();
    let old = load_group(&cli.old)?;
    let new = load_group(&cli.new)?;
    log::info!(
        "loaded {} old classes and {} new classes",
        old.len(),
        new.len()
    );

    let config = MatchConfig {
        threshold: cli.threshold,
        margin: cli.margin,
        max_mismatch: cli.max_mismatch,
    };
    let report = match_classes(&old, &new, &config);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &report)
        .context("failed to serialize match report")?;
    writer
        .write_all(b"\n")
        .context("failed to write match report")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} matched={} unmatched={}",
            started_at.elapsed().as_millis(),
            report.matches.len(),
            report.unmatched.len()
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_inputs_fail_before_any_parsing() {
        let cli = Cli {
            old: PathBuf::from("/nonexistent/old.jar"),
            new: PathBuf::from("/nonexistent/new.jar"),
            output: None,
            threshold: 0.5,
            margin: 0.05,
            max_mismatch: 4,
            quiet: true,
            timing: false,
        };

        let err = run(cli).expect_err("missing input must fail");
        assert!(err.to_string().contains("input not found"));
    }

    #[test]
    fn output_writer_creates_the_requested_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("report.json");

        let mut writer = output_writer(Some(&path)).expect("writer");
        writer.write_all(b"{}\n").expect("write");
        drop(writer);

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written, "{}\n");
    }
}
