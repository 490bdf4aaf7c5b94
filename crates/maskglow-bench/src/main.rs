//! maskglow-bench: CLI tool for rendering highlights and collecting diagnostics.
//!
//! Loads an image and a saved detection response from disk, runs the
//! highlight pipeline for one selection, optionally writes the PNG and
//! prints per-stage diagnostics. Useful for:
//!
//! - Checking how a real service payload decodes (see `RUST_LOG=debug`)
//! - Comparing highlight styles via `--style-json`
//! - Measuring per-stage durations on large images
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin maskglow-bench -- [OPTIONS] <IMAGE_PATH> --detection <JSON>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use maskglow_pipeline::diagnostics::{self, Clock, HighlightDiagnostics};
use maskglow_pipeline::{DetectionResponse, HighlightStyle, InstanceId, MaskIssue, Selection};

/// Highlight rendering and diagnostics for maskglow.
///
/// Runs the mask decode and compositing pipeline on a given image and
/// detection response and prints detailed per-stage timing and counts.
#[derive(Parser)]
#[command(name = "maskglow-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Path to the detection response JSON.
    #[arg(long)]
    detection: PathBuf,

    /// Instance id to highlight, `all`, or `none`.
    #[arg(long, default_value = "all")]
    selection: String,

    /// Write the highlighted PNG to file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// List detected instances and exit.
    #[arg(long)]
    list: bool,

    /// Highlight style as a JSON string (a `HighlightStyle`
    /// serialization). Defaults to the neon style.
    #[arg(long)]
    style_json: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum BenchError {
    #[error("Error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error parsing {context}: {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Detection(#[from] maskglow_pipeline::detection::DetectionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] maskglow_pipeline::PipelineError),

    #[error("Error writing PNG to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn read(path: &Path) -> Result<Vec<u8>, BenchError> {
    std::fs::read(path).map_err(|source| BenchError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn style_from_cli(cli: &Cli) -> Result<HighlightStyle, BenchError> {
    cli.style_json.as_ref().map_or(Ok(HighlightStyle::NEON), |json| {
        serde_json::from_str(json).map_err(|source| BenchError::Json {
            context: "--style-json".to_owned(),
            source,
        })
    })
}

fn load_detection(path: &Path) -> Result<DetectionResponse, BenchError> {
    let bytes = read(path)?;
    let response: DetectionResponse =
        serde_json::from_slice(&bytes).map_err(|source| BenchError::Json {
            context: path.display().to_string(),
            source,
        })?;
    response.ensure_detected()?;
    Ok(response)
}

fn list_instances(response: &DetectionResponse) {
    let masks = response.instance_masks();
    println!(
        "{:<20} {:>8} {:>10} {:>6}  {}",
        "Instance", "Area %", "Pixels", "Conf", "Mask"
    );
    println!("{}", "-".repeat(60));
    println!(
        "{:<20} {:>7.1}% {:>10} {:>6}  {}",
        "all_items",
        response.total_area_percentage(),
        "",
        "",
        masks.len(),
    );
    for (index, instance) in response.clothing_instances.iter().enumerate() {
        let label = instance.label(index);
        let has_mask = masks.contains_key(&InstanceId::new(label.as_str()));
        println!(
            "{label:<20} {:>7.1}% {:>10} {:>6.2}  {}",
            instance.area_percentage.unwrap_or(0.0),
            instance.area_pixels.unwrap_or(0),
            instance.confidence_or_default(),
            if has_mask { "yes" } else { "no" },
        );
    }
    if let Some(dims) = response.mask_dimensions() {
        println!();
        println!("Mask raster: {dims}");
    }
}

fn print_issues(issues: &[MaskIssue]) {
    for issue in issues {
        match issue {
            MaskIssue::NoSignal(id) => eprintln!("Warning: mask {id} carries no signal"),
            MaskIssue::Blank(id) => eprintln!("Warning: mask {id} covers no pixels"),
            MaskIssue::Rejected { instance, error } => {
                eprintln!("Warning: mask {instance} rejected: {error}");
            }
        }
    }
}

fn run(cli: &Cli) -> Result<(), BenchError> {
    let style = style_from_cli(cli)?;
    log::debug!("highlight style: {style:?}");
    let response = load_detection(&cli.detection)?;

    if cli.list {
        list_instances(&response);
        return Ok(());
    }

    let image_bytes = read(&cli.image_path)?;
    let masks = response.instance_masks();
    let selection = Selection::from_key(&cli.selection);

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Masks: {}  |  Selection: {selection}", masks.len());
    if let Some(t) = response.processing_time {
        eprintln!("Service processing time: {t:.2}s");
    }
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (outcome, diag) = diagnostics::highlight_with_diagnostics(
            &image_bytes,
            &masks,
            &selection,
            &style,
            &StdClock,
        )?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&diag).map_err(|source| BenchError::Json {
                    context: "diagnostics".to_owned(),
                    source,
                })?;
            println!("{json}");
        } else {
            println!("{}", diag.report());
        }

        if run == 0 {
            print_issues(&outcome.report.issues);
            if let Some(ref path) = cli.output {
                std::fs::write(path, &outcome.result.png).map_err(|source| BenchError::Write {
                    path: path.clone(),
                    source,
                })?;
                eprintln!(
                    "PNG written to {} ({} bytes)",
                    path.display(),
                    outcome.result.png.len(),
                );
            }
        }

        all_diagnostics.push(diag);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[HighlightDiagnostics]) {
    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for (i, (name, _)) in all_diagnostics[0].stages().iter().enumerate() {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| d.stages()[i].1.duration.as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
