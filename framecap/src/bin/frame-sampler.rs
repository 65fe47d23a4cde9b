use std::{num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use framecap::sampler::sample_frames;
use framecap_common::{
    bin_common::init::{init_eyre, init_logger},
    utils::results::ResultsDir,
};

#[derive(Parser)]
#[command()]
/// Sample frames from a video file the same way framecap does, without captioning them
struct Cli {
    /// Frames to sample per second of video
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    sample_fps: f64,

    /// How many frames to sample at most
    #[arg(long, default_value = "12")]
    max_frames: NonZeroUsize,

    /// Where to place the frames as images
    #[arg(long)]
    outdir: PathBuf,

    /// The video file to sample from
    videofile: PathBuf,
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    init_logger(None, log::LevelFilter::Info)?;
    let cli = Cli::parse();

    let sampled = sample_frames(&cli.videofile, cli.sample_fps, cli.max_frames)?;
    log::info!(
        "Sampled {} frames, the video is about {:.2}s long",
        sampled.frames.len(),
        sampled.duration
    );

    let outdir = ResultsDir::open(&cli.outdir).wrap_err("failed to create the outdir")?;
    for (i, frame) in sampled.frames.iter().enumerate() {
        let stem = ResultsDir::frame_stem(i + 1);
        println!("Writing {stem}.jpg (frame {} at {})", frame.index, frame.timestamp);
        outdir.create_jpg(&stem, &frame.image)?;
    }

    Ok(())
}
