use faceid_core::ChannelOrder;
use std::path::PathBuf;

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Path to the embedding ONNX model.
    pub model_path: PathBuf,
    /// Path to the SCRFD detection model; `None` disables localization.
    pub detection_model_path: Option<PathBuf>,
    pub detection_score_threshold: f32,
    pub detection_nms_threshold: f32,
    /// Cosine similarity threshold for a positive identification.
    pub match_threshold: f32,
    /// Expected embedding length; unset accepts whatever the model emits.
    pub embedding_dim: Option<usize>,
    /// Channel order the embedding model was trained on.
    pub channel_order: ChannelOrder,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root that artifact tokens are resolved against.
    pub data_dir: PathBuf,
    /// Artifact sub-directory under `data_dir`.
    pub face_image_dir: String,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACEID_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let db_path = std::env::var("FACEID_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        let detection_model_path = match std::env::var("FACEID_DETECTION_MODEL_PATH") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(PathBuf::from("models/det_10g.onnx")),
        };

        let channel_order = std::env::var("FACEID_CHANNEL_ORDER")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(order) => Some(order),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring FACEID_CHANNEL_ORDER");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            bind_addr: std::env::var("FACEID_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            model_path: std::env::var("FACEID_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/w600k_r50.onnx")),
            detection_model_path,
            detection_score_threshold: env_parse(
                "FACEID_DETECTION_SCORE_THRESHOLD",
                faceid_core::detector::DEFAULT_SCORE_THRESHOLD,
            ),
            detection_nms_threshold: env_parse(
                "FACEID_DETECTION_NMS_THRESHOLD",
                faceid_core::detector::DEFAULT_NMS_THRESHOLD,
            ),
            match_threshold: env_parse("FACEID_MATCH_THRESHOLD", 0.70),
            embedding_dim: std::env::var("FACEID_EMBEDDING_DIM").ok().and_then(|v| v.parse().ok()),
            channel_order,
            intra_threads: env_parse("FACEID_INTRA_THREADS", 2),
            db_path,
            data_dir,
            face_image_dir: std::env::var("FACEID_FACE_IMAGE_DIR").unwrap_or_else(|_| "face_images".to_string()),
            max_upload_bytes: env_parse("FACEID_MAX_UPLOAD_BYTES", 512 * 1024 * 1024),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
