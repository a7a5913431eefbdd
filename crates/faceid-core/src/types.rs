use serde::{Deserialize, Serialize};

/// Axis-aligned face box in source-image pixels, as reported by a detector.
///
/// Coordinates may fall partly (or entirely) outside the image; the
/// preprocessor clamps them before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector. Its length is whatever the loaded model emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]; 0.0 when either side has zero magnitude.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        crate::matcher::cosine_similarity(&self.values, &other.values)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// UUID assigned at enrollment, never reused.
    pub identity_id: String,
    /// Display name, unique among identities when created.
    pub name: String,
    pub embedding: Embedding,
    /// Only active identities take part in identification.
    pub is_active: bool,
    /// Artifact token of the stored original image.
    pub face_image_path: Option<String>,
    /// Artifact token of the stored 112×112 crop fed to the model.
    pub face_preprocessed_path: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Closest gallery entry for a probe embedding.
///
/// Carries the best candidate even when it is far from the probe; deciding
/// whether it counts as an identification is up to the caller.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Option<Identity>,
    /// Cosine similarity of the best candidate, or
    /// [`NO_MATCH_SCORE`](crate::matcher::NO_MATCH_SCORE) for an empty gallery.
    pub similarity: f32,
}

impl MatchResult {
    /// True when a candidate exists and reaches `threshold`.
    pub fn is_identified(&self, threshold: f32) -> bool {
        self.identity.is_some() && self.similarity >= threshold
    }
}
