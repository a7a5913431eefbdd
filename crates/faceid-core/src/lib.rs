//! faceid-core: face identification pipeline.
//!
//! Localizes a face with SCRFD (optional), normalizes it into a 112×112
//! tensor, extracts an embedding via ONNX Runtime and matches it against a
//! gallery by cosine similarity.

pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod pipeline;
pub mod preprocess;
pub mod types;

pub use detector::{Detection, FaceDetector, ScrfdDetector};
pub use embedder::{EmbedError, EmbeddingEngine, InferenceBackend, OnnxBackend};
pub use matcher::{cosine_similarity, find_best_match, CosineMatcher, Matcher, NO_MATCH_SCORE};
pub use pipeline::{FacePipeline, FaceSample, PipelineError};
pub use preprocess::{ChannelOrder, NormalizedTensor, PreprocessError, Preprocessed, Preprocessor};
pub use types::{Embedding, FaceRegion, Identity, MatchResult};
