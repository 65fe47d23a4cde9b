use std::{num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use color_eyre::eyre;
use framecap::{
    captioner::{select_device, BlipCaptioner, BlipConfig, DEFAULT_MODEL},
    pipeline,
    sampler::sample_frames,
};
use framecap_common::bin_common::{
    args::args_or_rc_file,
    init::{init_eyre, init_logger},
};

/// Read instead of the command line when no arguments are given
const ARGS_FILE: &str = ".framecaprc";

#[derive(Parser, Debug)]
#[command()]
/// Describes a video in one sentence by captioning a handful of its frames.
///
/// Arguments are read from `.framecaprc` in the current directory if none are given on the
/// command line.
struct Cli {
    /// Path to the input video
    #[arg(long)]
    video: PathBuf,

    /// Frames to sample per second of video
    #[arg(
        long,
        alias = "sample_fps",
        default_value_t = 1.0,
        allow_negative_numbers = true
    )]
    sample_fps: f64,

    /// How many frames to sample at most
    #[arg(long, alias = "max_frames", default_value = "12")]
    max_frames: NonZeroUsize,

    /// A model id on the Hugging Face hub, or a local directory containing
    /// `model.safetensors`, `tokenizer.json` and `config.json`
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Revision of the model on the hub. Defaults to one with safetensors weights for the
    /// default model, and to `main` for all others.
    #[arg(long)]
    revision: Option<String>,

    /// Maximum number of tokens per caption
    #[arg(long, default_value_t = BlipConfig::default().max_length)]
    max_length: usize,

    /// Run the model on the CPU even if a GPU is available
    #[arg(long)]
    cpu: bool,

    /// Where to save frames, captions and the report
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Don't save anything, only print
    #[arg(long)]
    no_save: bool,

    /// Also log to this file
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Log level on stdout
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli = Cli::parse_from(args_or_rc_file(ARGS_FILE)?);
    init_logger(cli.logfile.as_deref(), cli.log_level)?;
    log::debug!("Arguments: {cli:#?}");

    let device = select_device(cli.cpu);
    log::info!("Using device {device:?}");

    log::info!("Sampling frames from {}", cli.video.display());
    let sampled = sample_frames(&cli.video, cli.sample_fps, cli.max_frames)?;
    println!(
        "Sampled {} frames from video (duration ~{:.2}s).",
        sampled.frames.len(),
        sampled.duration
    );

    let config = BlipConfig {
        model: cli.model.clone(),
        revision: cli.revision.clone(),
        max_length: cli.max_length,
    };
    let results_dir = (!cli.no_save).then_some(cli.results_dir.as_path());
    let report = pipeline::describe(
        &cli.video,
        &config.model,
        &sampled,
        || {
            log::info!("Loading {} at {}", config.model, config.revision());
            Ok(BlipCaptioner::load(&config, device)?)
        },
        results_dir,
    )?;

    let Some(report) = report else {
        println!("No frames sampled. Exiting.");
        return Ok(());
    };

    println!("\nPer-frame captions:");
    for frame in &report.frames {
        println!(" [{}] {}", frame.number, frame.caption);
    }

    println!("\n===== Final aggregated caption =====");
    println!("{}", report.aggregated);

    if let Some(dir) = results_dir {
        println!("\nSaved sampled frames and captions to {}/", dir.display());
    }

    Ok(())
}
