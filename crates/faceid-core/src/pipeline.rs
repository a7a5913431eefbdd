//! Bytes → embedding.

use crate::embedder::{EmbedError, EmbeddingEngine};
use crate::preprocess::{self, PreprocessError, Preprocessed, Preprocessor};
use crate::types::Embedding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// Everything produced while embedding one image.
pub struct FaceSample {
    pub embedding: Embedding,
    /// The decoded source image.
    pub image: RgbImage,
    pub preprocessed: Preprocessed,
}

/// Preprocessor and embedding engine, built once at startup and shared by
/// every request.
pub struct FacePipeline {
    preprocessor: Preprocessor,
    engine: EmbeddingEngine,
}

impl FacePipeline {
    pub fn new(preprocessor: Preprocessor, engine: EmbeddingEngine) -> Self {
        Self { preprocessor, engine }
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn engine(&self) -> &EmbeddingEngine {
        &self.engine
    }

    /// Decode, preprocess and embed an encoded image.
    ///
    /// Fails fast with `ModelNotLoaded` before decoding when no model is loaded.
    pub fn embed_bytes(&self, bytes: &[u8]) -> Result<FaceSample, PipelineError> {
        if !self.engine.is_loaded() {
            return Err(EmbedError::ModelNotLoaded.into());
        }
        let image = preprocess::decode(bytes)?;
        let preprocessed = self.preprocessor.preprocess(&image);
        let embedding = self.engine.embed(&preprocessed.tensor)?;
        Ok(FaceSample {
            embedding,
            image,
            preprocessed,
        })
    }
}
