use crate::config::Config;
use faceid_core::{EmbeddingEngine, FaceDetector, FacePipeline, OnnxBackend, Preprocessor, ScrfdDetector};

/// Build the shared pipeline from configuration.
///
/// Model failures never abort startup. A missing detector degrades to
/// full-frame preprocessing; a missing embedding model leaves the engine
/// unloaded, and every embedding request then fails with `ModelNotLoaded`.
pub fn load_pipeline(config: &Config) -> FacePipeline {
    let detector: Option<Box<dyn FaceDetector>> = match &config.detection_model_path {
        None => {
            tracing::info!("face localization disabled");
            None
        }
        Some(path) => {
            let path = path.to_string_lossy();
            match ScrfdDetector::load(
                &path,
                config.detection_score_threshold,
                config.detection_nms_threshold,
                config.intra_threads,
            ) {
                Ok(detector) => {
                    tracing::info!(path = %path, "SCRFD detector loaded");
                    Some(Box::new(detector))
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "detector unavailable, using full frames");
                    None
                }
            }
        }
    };

    let model_path = config.model_path.to_string_lossy();
    let engine = match OnnxBackend::load(&model_path, config.intra_threads) {
        Ok(backend) => {
            tracing::info!(path = %model_path, "embedding model loaded");
            EmbeddingEngine::new(Box::new(backend))
        }
        Err(e) => {
            tracing::error!(path = %model_path, error = %e, "embedding model failed to load; service degraded");
            EmbeddingEngine::unloaded()
        }
    }
    .with_expected_dim(config.embedding_dim);

    FacePipeline::new(Preprocessor::new(detector, config.channel_order), engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::from_env();
        config.model_path = dir.join("missing.onnx");
        config.detection_model_path = Some(dir.join("missing_det.onnx"));
        config
    }

    #[test]
    fn test_missing_models_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = load_pipeline(&config(dir.path()));
        assert!(!pipeline.engine().is_loaded());
        assert!(!pipeline.preprocessor().has_detector());
    }

    #[test]
    fn test_detection_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.detection_model_path = None;
        assert!(!load_pipeline(&config).preprocessor().has_detector());
    }
}
