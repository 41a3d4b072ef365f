//! Spike-log decoder CLI application.
//!
//! Decodes simulator and event-camera recordings and writes their time-binned
//! matrices as CSV or binary files.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use spikelog_core::{
    output, run, AccumulationPolicy, Diagnostics, FormatId, MatrixFormat, PipelineConfig,
    PixelGrid, SessionHeader, TimeAxis,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Event-log decoder for spiking-network simulators and event cameras.
///
/// Decodes one or more recordings into dense [bin, channel] matrices.
#[derive(Parser, Debug)]
#[command(name = "spikelog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input recordings
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Output path.
    ///
    /// With a single input and a .csv or .bin extension this is the output
    /// file. Otherwise it is a directory receiving one matrix per input.
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    /// Record format: efficient-spike, full-spike, potential, nmnist, aedat-polarity
    #[arg(short, long)]
    format: Option<FormatId>,

    /// JSON pipeline configuration. Flags given on the command line override it.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Matrix format for directory output (csv, bin)
    #[arg(long, default_value = "csv")]
    matrix_format: MatrixFormat,

    /// Bytes to skip before the first record
    #[arg(long)]
    header_offset: Option<usize>,

    /// Ticks per output bin
    #[arg(short, long)]
    bin_width: Option<u64>,

    /// Read-time timestamp divisor applied before binning
    #[arg(long = "ds", value_name = "DIVISOR")]
    downsample: Option<u64>,

    /// Channel id mapped to column 0
    #[arg(long)]
    channel_offset: Option<i64>,

    /// Number of columns, inferred from the events when omitted
    #[arg(long)]
    channel_count: Option<usize>,

    /// Accumulation policy: count, logical-or, sum-amplitude
    #[arg(short, long)]
    policy: Option<AccumulationPolicy>,

    /// Fail on events outside the channel range instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Emit rows only for bins that contain events
    #[arg(long)]
    observed: bool,

    /// Keep only events from this layer
    #[arg(long)]
    layer: Option<i64>,

    /// Mirror camera rows to a top-left origin
    #[arg(long)]
    flip: bool,

    /// Sensor pixel grid for camera formats: WIDTHxHEIGHT or nmnist, dvs-gesture, ncars, davis346
    #[arg(short, long)]
    grid: Option<PixelGrid>,

    /// Write per-file diagnostics as JSON
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

/// Outcome of one input file.
#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    output: PathBuf,
    bins: usize,
    channels: usize,
    first_bin: i64,
    header: Option<SessionHeader>,
    diagnostics: Diagnostics,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid pipeline config {:?}", path))?
        }
        None => {
            let format = args
                .format
                .context("Either --format or --config must be given")?;
            PipelineConfig::new(format)
        }
    };

    if let Some(format) = args.format {
        config.format = format;
    }
    if args.header_offset.is_some() {
        config.header_offset = args.header_offset;
    }
    if let Some(bin_width) = args.bin_width {
        config.bin_width = bin_width;
    }
    if args.downsample.is_some() {
        config.downsample_divisor = args.downsample;
    }
    if let Some(offset) = args.channel_offset {
        config.channel_offset = offset;
    }
    if args.channel_count.is_some() {
        config.channel_count = args.channel_count;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if args.layer.is_some() {
        config.layer = args.layer;
    }
    if args.grid.is_some() {
        config.grid = args.grid;
    }
    config.strict_channel_range |= args.strict;
    config.vertical_flip |= args.flip;
    if args.observed {
        config.time_axis = TimeAxis::Observed;
    }

    config.validate().context("Invalid pipeline config")?;
    Ok(config)
}

/// Resolves the output file of every input.
fn output_paths(args: &Args) -> Result<Vec<PathBuf>> {
    let has_matrix_extension =
        args.output.extension().is_some() && MatrixFormat::from_path(&args.output).is_ok();
    if args.inputs.len() == 1 && has_matrix_extension {
        return Ok(vec![args.output.clone()]);
    }

    let outputs = directory_outputs(&args.inputs, &args.output, args.matrix_format)?;
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;
    Ok(outputs)
}

/// Maps each input to `<dir>/<stem>.<ext>`, rejecting inputs that would
/// write the same file.
fn directory_outputs(
    inputs: &[PathBuf],
    dir: &Path,
    format: MatrixFormat,
) -> Result<Vec<PathBuf>> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
    let mut outputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let stem = input
            .file_stem()
            .with_context(|| format!("Input {:?} has no file name", input))?;
        let output = dir.join(stem).with_extension(format.extension());
        if let Some(previous) = claimed.insert(output.clone(), input) {
            anyhow::bail!(
                "Inputs {:?} and {:?} would both write {:?}",
                previous,
                input,
                output
            );
        }
        outputs.push(output);
    }
    Ok(outputs)
}

fn process_file(input: &Path, output_path: &Path, config: &PipelineConfig) -> Result<FileReport> {
    let buffer =
        std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let result = run(&buffer, config).with_context(|| format!("Failed to decode {:?}", input))?;

    output::write_matrix(output_path, &result.matrix)
        .with_context(|| format!("Failed to write {:?}", output_path))?;

    tracing::info!(
        input = %input.display(),
        bins = result.matrix.num_bins(),
        channels = result.matrix.num_channels(),
        skipped = result.diagnostics.skipped(),
        "wrote matrix"
    );

    Ok(FileReport {
        input: input.to_path_buf(),
        output: output_path.to_path_buf(),
        bins: result.matrix.num_bins(),
        channels: result.matrix.num_channels(),
        first_bin: result.matrix.first_bin(),
        header: result.header,
        diagnostics: result.diagnostics,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let outputs = output_paths(&args)?;

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(args.inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message(format!("Decoding {} as {}...", args.inputs.len(), config.format));
        pb
    };

    let start_time = Instant::now();

    let reports: Vec<FileReport> = args
        .inputs
        .par_iter()
        .zip(outputs.par_iter())
        .map(|(input, output_path)| {
            let report = process_file(input, output_path, &config);
            progress.inc(1);
            report
        })
        .collect::<Result<_>>()?;

    let total_duration = start_time.elapsed();
    let mut totals = Diagnostics::default();
    for report in &reports {
        totals.merge(&report.diagnostics);
    }

    progress.finish_with_message(format!(
        "Done! Decoded {} records in {:.2}s",
        totals.records_decoded,
        total_duration.as_secs_f64()
    ));

    if let Some(report_path) = &args.report {
        let file = std::fs::File::create(report_path)
            .with_context(|| format!("Failed to create report {:?}", report_path))?;
        serde_json::to_writer_pretty(file, &reports).context("Failed to write report")?;
    }

    if !args.quiet {
        // Print summary
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Format:       {}", config.format);
        eprintln!("  Files:        {}", reports.len());
        eprintln!("  Records:      {}", totals.records_decoded);
        eprintln!("  Skipped:      {}", totals.skipped());
        for report in &reports {
            eprintln!(
                "  {:?} -> {:?} ({} bins x {} channels)",
                report.input.file_name().unwrap_or_default(),
                report.output,
                report.bins,
                report.channels
            );
        }
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}
