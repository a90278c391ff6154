use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

/// Side length the network expects.
pub const INPUT_SIZE: u32 = 224;

pub const CHANNELS: usize = 3;

/// Per-channel ImageNet statistics the weights were trained with.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

const PLANE: usize = (INPUT_SIZE * INPUT_SIZE) as usize;

/// Normalized image, channel-major (`3 x 224 x 224`).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    pub const SHAPE: [usize; 3] = [CHANNELS, INPUT_SIZE as usize, INPUT_SIZE as usize];

    pub fn shape(&self) -> [usize; 3] {
        Self::SHAPE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x`.
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * PLANE + y * INPUT_SIZE as usize + x]
    }

    /// Same values laid out height, width, channel.
    pub fn to_channels_last(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.data.len());
        for i in 0..PLANE {
            for c in 0..CHANNELS {
                out.push(self.data[c * PLANE + i]);
            }
        }
        out
    }

    /// Undo the normalization, clipping to the displayable range.
    pub fn to_rgb_image(&self) -> RgbImage {
        let side = INPUT_SIZE as usize;
        RgbImage::from_fn(INPUT_SIZE, INPUT_SIZE, |x, y| {
            let offset = y as usize * side + x as usize;
            let mut px = [0u8; 3];
            for (c, value) in px.iter_mut().enumerate() {
                let v = self.data[c * PLANE + offset] * STD[c] + MEAN[c];
                *value = (v.max(0.0).min(1.0) * 255.0).round() as u8;
            }
            Rgb(px)
        })
    }
}

/// Resize to 224x224 (aspect ratio is not kept), scale to `[0, 1]` and
/// normalize each channel.
pub fn preprocess(image: &DynamicImage) -> ImageTensor {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let mut data = vec![0f32; CHANNELS * PLANE];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..CHANNELS {
            let scaled = pixel[c] as f32 / 255f32;
            data[c * PLANE + i] = (scaled - MEAN[c]) / STD[c];
        }
    }

    ImageTensor { data }
}
