//! Model-free embedding backend and gradient images, shared by the unit
//! tests (through `src/testing.rs`) and the HTTP integration tests.

#![allow(dead_code)]

use faceid_core::{EmbedError, InferenceBackend, NormalizedTensor};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const GRID: usize = 8;

/// Mean-centered 8×8 block averages of the first channel. Images that vary
/// only along x and only along y produce orthogonal embeddings.
#[derive(Default)]
pub struct BlockAverage {
    pub calls: Arc<AtomicUsize>,
}

impl InferenceBackend for BlockAverage {
    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let t = tensor.as_array();
        let side = t.shape()[2];
        let block = side / GRID;
        let mut values = Vec::with_capacity(GRID * GRID);
        for by in 0..GRID {
            for bx in 0..GRID {
                let mut sum = 0.0;
                for y in by * block..(by + 1) * block {
                    for x in bx * block..(bx + 1) * block {
                        sum += t[[0, 0, y, x]];
                    }
                }
                values.push(sum / (block * block) as f32);
            }
        }
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        Ok(values.into_iter().map(|v| v - mean).collect())
    }
}

fn png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Brightness rises left to right.
pub fn png_horizontal() -> Vec<u8> {
    png(&RgbImage::from_fn(64, 64, |x, _| {
        let v = (x * 4) as u8;
        image::Rgb([v, v, v])
    }))
}

/// Brightness rises top to bottom.
pub fn png_vertical() -> Vec<u8> {
    png(&RgbImage::from_fn(64, 64, |_, y| {
        let v = (y * 4) as u8;
        image::Rgb([v, v, v])
    }))
}
