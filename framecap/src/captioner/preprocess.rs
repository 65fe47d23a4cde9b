use candle_core::{Device, Tensor};
use image::{imageops::FilterType, RgbImage};

/// BLIP looks at square images of this size
pub const IMAGE_SIZE: u32 = 384;

// the OpenAI CLIP statistics
const MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// A resized and normalized image in channel-first order
#[derive(Debug, Clone)]
pub struct PixelValues {
    data: Vec<f32>,
}

impl PixelValues {
    /// Resizes to [IMAGE_SIZE] squared, ignoring the aspect ratio, and normalizes every
    /// channel.
    pub fn from_image(image: &RgbImage) -> Self {
        let resized = if image.dimensions() == (IMAGE_SIZE, IMAGE_SIZE) {
            image.clone()
        } else {
            image::imageops::resize(image, IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom)
        };

        let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
        let mut data = vec![0.0; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let value = f32::from(pixel.0[c]) / 255.0;
                data[c * plane + i] = (value - MEAN[c]) / STD[c];
            }
        }
        Self { data }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Shape [1, 3, H, W]
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        let side = IMAGE_SIZE as usize;
        Tensor::from_slice(&self.data, (1, 3, side, side), device)
    }
}
