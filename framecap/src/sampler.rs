//! Picks frames out of a video, see [framecap_common::sampling] for which ones.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use framecap_common::sampling::{self, Policy};
use image::RgbImage;

use crate::frame_extractor::{
    self, logger::Logger, ContextLogger, FrameExtractor, Timestamp, VideoInfo,
};

#[derive(Debug, thiserror::Error)]
#[error("Cannot open video '{}': {reason}", path.display())]
pub struct VideoOpenError {
    path: PathBuf,
    reason: String,
}

impl VideoOpenError {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Random access to the frames of a video
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// `Ok(None)` if there is no such frame
    fn frame_at(
        &mut self,
        index: usize,
    ) -> frame_extractor::Result<Option<(Timestamp, RgbImage)>>;
}

impl<L: Logger> FrameSource for FrameExtractor<L> {
    fn info(&self) -> VideoInfo {
        FrameExtractor::info(self)
    }

    fn frame_at(
        &mut self,
        index: usize,
    ) -> frame_extractor::Result<Option<(Timestamp, RgbImage)>> {
        FrameExtractor::frame_at(self, index)
    }
}

#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Index of the frame in the video
    pub index: usize,
    pub timestamp: Timestamp,
    pub image: RgbImage,
}

#[derive(Debug, Clone)]
pub struct Sampled {
    /// In the order they appear in the video
    pub frames: Vec<SampledFrame>,
    /// Estimated length of the video in seconds, zero if unknown
    pub duration: f64,
}

/// Opens the video at `path` and samples around `target_rate` frames per second from
/// it, but never more than `max_frames`. Frames that fail to decode are left out.
pub fn sample_frames(
    path: impl AsRef<Path>,
    target_rate: f64,
    max_frames: NonZeroUsize,
) -> Result<Sampled, VideoOpenError> {
    let path = path.as_ref();
    let extractor = FrameExtractor::new_with_logger(path, ContextLogger::new(path))
        .map_err(|e| VideoOpenError {
            path: path.to_owned(),
            reason: format!("{e:#}"),
        })?;
    log::debug!("Opened {}: {:?}", path.display(), extractor);
    Ok(sample_from(extractor, target_rate, max_frames))
}

/// Same as [sample_frames] but on something already opened. The source is dropped
/// before returning.
pub fn sample_from(
    mut source: impl FrameSource,
    target_rate: f64,
    max_frames: NonZeroUsize,
) -> Sampled {
    let VideoInfo {
        frame_count,
        frame_rate,
        ..
    } = source.info();

    let policy = Policy::new(frame_count, frame_rate, target_rate, max_frames);
    let indices = sampling::frame_indices(frame_count, frame_rate, target_rate, max_frames);
    log::debug!(
        "{frame_count} frames at {frame_rate:?} fps, sampling {} of them with {policy:?}",
        indices.len()
    );

    let mut frames = Vec::with_capacity(indices.len());
    for index in indices {
        match source.frame_at(index) {
            Ok(Some((timestamp, image))) => {
                log::trace!("Got frame {index} at {timestamp}");
                frames.push(SampledFrame {
                    index,
                    timestamp,
                    image,
                })
            }
            Ok(None) => log::warn!("Frame {index} is past the end, skipping it"),
            Err(e) => log::warn!("Failed to decode frame {index}, skipping it: {e:#}"),
        }
    }
    drop(source);

    Sampled {
        frames,
        duration: sampling::estimated_duration(frame_count, frame_rate),
    }
}
