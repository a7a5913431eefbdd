//! Image → model input.
//!
//! Localizes the most confident face, crops it, resizes to 112×112 and packs a
//! normalized NCHW batch-of-one tensor. Every path out of here produces the
//! same shape: a missing detector, an empty detection or a degenerate box all
//! fall back to the full image.

use crate::detector::{Detection, FaceDetector};
use crate::types::FaceRegion;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

pub const INPUT_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 128.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Channel order the embedding model expects in its input tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl std::str::FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            other => Err(format!("unknown channel order: {other}")),
        }
    }
}

/// Model input, always shaped `(1, 3, 112, 112)` with values in [-1, 1].
#[derive(Debug, Clone)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    pub const SHAPE: [usize; 4] = [1, 3, INPUT_SIZE, INPUT_SIZE];

    /// Build from a flat CHW buffer of `3 * 112 * 112` values.
    pub fn from_flat(values: Vec<f32>) -> Option<Self> {
        Array4::from_shape_vec(Self::SHAPE, values).ok().map(Self)
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.0
    }
}

/// Result of preprocessing one image.
pub struct Preprocessed {
    pub tensor: NormalizedTensor,
    /// The 112×112 crop before normalization, kept for diagnostics.
    pub resized: RgbImage,
    /// Region that was cropped, or `None` when the whole image was used.
    pub region: Option<FaceRegion>,
}

/// Decode an encoded image (JPEG, PNG, BMP, ...) into an RGB pixel grid.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub struct Preprocessor {
    detector: Option<Box<dyn FaceDetector>>,
    channel_order: ChannelOrder,
}

impl Preprocessor {
    pub fn new(detector: Option<Box<dyn FaceDetector>>, channel_order: ChannelOrder) -> Self {
        Self { detector, channel_order }
    }

    /// Preprocessor that always uses the whole image.
    pub fn without_detector() -> Self {
        Self::new(None, ChannelOrder::default())
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    pub fn preprocess(&self, image: &RgbImage) -> Preprocessed {
        let detection = match &self.detector {
            Some(detector) => detector.detect(image),
            None => Detection::Unavailable,
        };

        let region = match detection {
            Detection::Regions(regions) => best_region(&regions)
                .and_then(|r| clamp_region(r, image.width(), image.height()).map(|c| (r, c))),
            Detection::Unavailable => None,
        };

        let resized = match region {
            Some((_, (x, y, w, h))) => {
                let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
                resize(&crop)
            }
            None => resize(image),
        };

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            cropped = region.is_some(),
            "preprocessed image"
        );

        Preprocessed {
            tensor: self.to_tensor(&resized),
            resized,
            region: region.map(|(r, _)| r),
        }
    }

    fn to_tensor(&self, resized: &RgbImage) -> NormalizedTensor {
        let channels: [usize; 3] = match self.channel_order {
            ChannelOrder::Rgb => [0, 1, 2],
            ChannelOrder::Bgr => [2, 1, 0],
        };

        let mut tensor = Array4::<f32>::zeros(NormalizedTensor::SHAPE);
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &src) in channels.iter().enumerate() {
                tensor[[0, c, y as usize, x as usize]] = (pixel[src] as f32 - PIXEL_MEAN) / PIXEL_SCALE;
            }
        }
        NormalizedTensor(tensor)
    }
}

fn resize(image: &RgbImage) -> RgbImage {
    image::imageops::resize(image, INPUT_SIZE as u32, INPUT_SIZE as u32, FilterType::Triangle)
}

/// Highest-confidence region; the first one wins a tie.
fn best_region(regions: &[FaceRegion]) -> Option<FaceRegion> {
    regions.iter().fold(None, |best: Option<FaceRegion>, r| match best {
        Some(b) if r.confidence <= b.confidence => Some(b),
        _ => Some(*r),
    })
}

/// Clamp a region to the image, returning `(x, y, w, h)` in whole pixels, or
/// `None` if nothing is left.
fn clamp_region(region: FaceRegion, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if !(region.x.is_finite() && region.y.is_finite() && region.width.is_finite() && region.height.is_finite()) {
        return None;
    }

    let (img_w, img_h) = (width as i64, height as i64);
    let x = (region.x as i64).max(0);
    let y = (region.y as i64).max(0);
    let w = (region.width as i64).min(img_w - x);
    let h = (region.height as i64).min(img_h - y);

    if w <= 0 || h <= 0 {
        return None;
    }
    Some((x as u32, y as u32, w as u32, h as u32))
}
