//! Embedding extraction via ONNX Runtime.
//!
//! [`EmbeddingEngine`] owns one loaded model for the life of the process and
//! exposes a single `embed` call. The model sits behind [`InferenceBackend`]
//! so the rest of the pipeline can be exercised without model files.

use crate::preprocess::NormalizedTensor;
use crate::types::Embedding;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding model is not loaded")]
    ModelNotLoaded,
    #[error("embedding model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A loaded model that maps one input tensor to one raw output vector.
pub trait InferenceBackend: Send + Sync {
    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, EmbedError>;

    /// Short description for health and status output.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// ONNX Runtime session running an ArcFace-style embedding model.
pub struct OnnxBackend {
    session: Mutex<Session>,
    path: String,
}

impl OnnxBackend {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            path: model_path.to_string(),
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, EmbedError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::Inference("model session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(tensor.as_array().view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("embedding extraction: {e}")))?;

        Ok(raw.to_vec())
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.path)
    }
}

/// Process-wide embedding model.
pub struct EmbeddingEngine {
    backend: Option<Box<dyn InferenceBackend>>,
    expected_dim: Option<usize>,
}

impl EmbeddingEngine {
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            backend: Some(backend),
            expected_dim: None,
        }
    }

    /// Engine with no model; every `embed` fails with `ModelNotLoaded`.
    pub fn unloaded() -> Self {
        Self {
            backend: None,
            expected_dim: None,
        }
    }

    /// Reject outputs whose length differs from `dim`.
    pub fn with_expected_dim(mut self, dim: Option<usize>) -> Self {
        self.expected_dim = dim;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn describe(&self) -> Option<String> {
        self.backend.as_ref().map(|b| b.describe())
    }

    pub fn embed(&self, tensor: &NormalizedTensor) -> Result<Embedding, EmbedError> {
        let backend = self.backend.as_ref().ok_or(EmbedError::ModelNotLoaded)?;

        if tensor.shape() != NormalizedTensor::SHAPE {
            return Err(EmbedError::Inference(format!(
                "input shape {:?} does not match {:?}",
                tensor.shape(),
                NormalizedTensor::SHAPE
            )));
        }

        let raw = backend.run(tensor).map_err(|e| match e {
            EmbedError::Ort(err) => EmbedError::Inference(err.to_string()),
            other => other,
        })?;

        if raw.is_empty() {
            return Err(EmbedError::Inference("model returned an empty embedding".into()));
        }
        if let Some(dim) = self.expected_dim {
            if raw.len() != dim {
                return Err(EmbedError::Inference(format!(
                    "expected {dim}-dim embedding, got {}",
                    raw.len()
                )));
            }
        }

        Ok(Embedding::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstBackend(Vec<f32>);

    impl InferenceBackend for ConstBackend {
        fn run(&self, _tensor: &NormalizedTensor) -> Result<Vec<f32>, EmbedError> {
            Ok(self.0.clone())
        }
    }

    struct FailingBackend;

    impl InferenceBackend for FailingBackend {
        fn run(&self, _tensor: &NormalizedTensor) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Inference("provider fault".into()))
        }
    }

    fn tensor() -> NormalizedTensor {
        NormalizedTensor::from_flat(vec![0.0; 3 * 112 * 112]).unwrap()
    }

    #[test]
    fn test_unloaded_engine_refuses() {
        let engine = EmbeddingEngine::unloaded();
        assert!(!engine.is_loaded());
        assert!(matches!(engine.embed(&tensor()), Err(EmbedError::ModelNotLoaded)));
    }

    #[test]
    fn test_embed_returns_backend_output() {
        let engine = EmbeddingEngine::new(Box::new(ConstBackend(vec![0.1, 0.2, 0.3])));
        let e = engine.embed(&tensor()).unwrap();
        assert_eq!(e.values, vec![0.1, 0.2, 0.3]);
        // Repeated calls see the same read-only model.
        assert_eq!(engine.embed(&tensor()).unwrap(), e);
    }

    #[test]
    fn test_backend_failure_is_inference_error() {
        let engine = EmbeddingEngine::new(Box::new(FailingBackend));
        match engine.embed(&tensor()) {
            Err(EmbedError::Inference(msg)) => assert!(msg.contains("provider fault")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_dimension_mismatch_is_inference_error() {
        let engine =
            EmbeddingEngine::new(Box::new(ConstBackend(vec![1.0; 128]))).with_expected_dim(Some(512));
        assert!(matches!(engine.embed(&tensor()), Err(EmbedError::Inference(_))));
    }

    #[test]
    fn test_empty_output_is_inference_error() {
        let engine = EmbeddingEngine::new(Box::new(ConstBackend(vec![])));
        assert!(matches!(engine.embed(&tensor()), Err(EmbedError::Inference(_))));
    }

    #[test]
    fn test_concurrent_embed() {
        let engine = std::sync::Arc::new(EmbeddingEngine::new(Box::new(ConstBackend(vec![1.0, 2.0]))));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.embed(&tensor()).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().values, vec![1.0, 2.0]);
        }
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            OnnxBackend::load("/nonexistent/model.onnx", 1),
            Err(EmbedError::ModelNotFound(_))
        ));
    }
}
