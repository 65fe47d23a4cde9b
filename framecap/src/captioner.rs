//! Turning frames into captions.

pub mod blip;
pub mod preprocess;

use image::RgbImage;
use rayon::prelude::*;

pub use blip::{select_device, BlipCaptioner, BlipConfig, DEFAULT_MODEL};

#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    #[error(transparent)]
    FailedToLoadModel(#[from] hf_hub::api::sync::ApiError),

    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Invalid model config: {0}")]
    ConfigError(#[from] serde_json::Error),
}

/// An image-to-text model
pub trait Captioner {
    /// What the model wants instead of an image
    type Input: Send;

    /// Converts an image into model input. This is done for all frames up front, in
    /// parallel.
    fn prepare(image: &RgbImage) -> Self::Input;

    /// Runs the model on one prepared image
    fn generate(&mut self, input: Self::Input) -> Result<String, CaptionError>;
}

/// The captions of some frames, one at a time and in the same order as the frames. The
/// model only runs when the next caption is asked for.
pub struct Captions<'c, C: Captioner> {
    captioner: &'c mut C,
    inputs: std::vec::IntoIter<C::Input>,
}

impl<'c, C: Captioner> Iterator for Captions<'c, C> {
    type Item = Result<String, CaptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let input = self.inputs.next()?;
        Some(self.captioner.generate(input))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inputs.size_hint()
    }
}

impl<'c, C: Captioner> ExactSizeIterator for Captions<'c, C> {}

/// Prepares all `images` and returns a lazy sequence of their captions
pub fn captions<'c, C: Captioner>(captioner: &'c mut C, images: &[&RgbImage]) -> Captions<'c, C> {
    let inputs: Vec<C::Input> = images.par_iter().map(|img| C::prepare(img)).collect();
    Captions {
        captioner,
        inputs: inputs.into_iter(),
    }
}

/// One caption per image, in order. The first failure aborts everything.
pub fn caption_frames<C: Captioner>(
    captioner: &mut C,
    images: &[&RgbImage],
) -> Result<Vec<String>, CaptionError> {
    captions(captioner, images).collect()
}
