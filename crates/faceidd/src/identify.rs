//! 1:N identification against the active gallery.

use crate::store::{IdentityStore, StoreError};
use faceid_core::{find_best_match, FacePipeline, Identity, PipelineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("No active users found")]
    EmptyGallery,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one identification request.
#[derive(Debug, Clone)]
pub struct Identification {
    /// Best candidate; `None` only when the gallery was empty.
    pub best: Option<Identity>,
    /// Similarity of `best`, rounded to four decimals.
    pub similarity: f32,
    pub identified: bool,
}

impl Identification {
    /// The matched identity, if the threshold was met.
    pub fn identity(&self) -> Option<&Identity> {
        self.best.as_ref().filter(|_| self.identified)
    }
}

/// Embed `image` and compare it against every active identity.
///
/// The gallery is read after embedding so the store lock is never held
/// across inference.
pub fn identify(
    pipeline: &FacePipeline,
    store: &dyn IdentityStore,
    image: &[u8],
    threshold: f32,
) -> Result<Identification, IdentifyError> {
    let sample = pipeline.embed_bytes(image)?;

    let gallery = store.list_active()?;
    if gallery.is_empty() {
        return Err(IdentifyError::EmptyGallery);
    }

    let result = find_best_match(&sample.embedding, &gallery);
    let identified = result.is_identified(threshold);
    let similarity = round4(result.similarity);

    tracing::info!(
        identified,
        similarity,
        candidate = result.identity.as_ref().map(|i| i.name.as_str()).unwrap_or("-"),
        gallery = gallery.len(),
        "identification complete"
    );

    Ok(Identification {
        best: result.identity,
        similarity,
        identified,
    })
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}
