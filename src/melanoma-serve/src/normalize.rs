//! Raw image bytes to the fixed `[1, 224, 224, 3]` model input.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use thiserror::Error;

pub const INPUT_HEIGHT: u32 = 224;
pub const INPUT_WIDTH: u32 = 224;
pub const INPUT_CHANNELS: u32 = 3;

/// Shape of the model input, batch dimension first.
pub const INPUT_SHAPE: [u64; 4] = [
    1,
    INPUT_HEIGHT as u64,
    INPUT_WIDTH as u64,
    INPUT_CHANNELS as u64,
];

const INPUT_LEN: usize = (INPUT_HEIGHT * INPUT_WIDTH * INPUT_CHANNELS) as usize;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("normalized tensor has {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },
}

/// Single-sample batch of RGB pixels scaled to [0, 1], laid out NHWC.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    fn from_raw(data: Vec<f32>) -> Result<Self, NormalizeError> {
        if data.len() != INPUT_LEN {
            return Err(NormalizeError::Shape {
                expected: INPUT_LEN,
                actual: data.len(),
            });
        }

        Ok(ImageTensor { data })
    }

    pub fn shape(&self) -> [u64; 4] {
        INPUT_SHAPE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at batch 0, row `y`, column `x`, channel `c`.
    pub fn at(&self, y: u32, x: u32, c: u32) -> f32 {
        let idx = ((y * INPUT_WIDTH + x) * INPUT_CHANNELS + c) as usize;
        self.data[idx]
    }
}

/// Decode bytes in any format the `image` crate recognises.
pub fn decode(data: &[u8]) -> Result<DynamicImage, NormalizeError> {
    Ok(image::load_from_memory(data)?)
}

/// Force RGB, stretch to 224x224 and scale to [0, 1].
///
/// Grayscale is replicated over three channels and alpha is dropped. The
/// aspect ratio is not preserved.
pub fn normalize_image(image: &DynamicImage) -> Result<ImageTensor, NormalizeError> {
    let rgb = image.to_rgb8();

    let resized = imageops::resize(&rgb, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);

    let raw: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|x| x as f32 / 255f32)
        .collect();

    ImageTensor::from_raw(raw)
}

pub fn normalize(data: &[u8]) -> Result<ImageTensor, NormalizeError> {
    let image = decode(data)?;
    normalize_image(&image)
}
