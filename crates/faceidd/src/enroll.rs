//! Enrollment: single identities and bulk batches.
//!
//! Bulk enrollment is an [`Iterator`] of [`BulkEvent`]s: one `Progress` per
//! input item, in input order, then exactly one `Complete`. Each item does its
//! work inside `next()`, so a consumer that stops pulling stops production.
//! Staged identities are committed together after the last item; their
//! artifacts are deleted if the commit fails or the iterator is dropped first.

use crate::artifacts::{ArtifactError, ArtifactGuard, ArtifactKind, ArtifactStorage};
use crate::store::{IdentityStore, StoreError};
use faceid_core::{FacePipeline, Identity, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const REASON_ALREADY_REGISTERED: &str = "already registered";
pub const REASON_DUPLICATE_IN_BATCH: &str = "duplicate name in batch";

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("already registered: {0}")]
    DuplicateName(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("number of images ({images}) does not match number of names ({names})")]
    MismatchedInput { images: usize, names: usize },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EnrollError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateName(name) => EnrollError::DuplicateName(name),
            other => EnrollError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 1-based position in the batch.
    pub current: usize,
    pub total: usize,
    pub name: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub folder: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub total_folders_scanned: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BulkEvent {
    Progress(ProgressEvent),
    Complete(CompletionSummary),
}

/// Shared handles needed to enroll identities.
#[derive(Clone)]
pub struct Enroller {
    pipeline: Arc<FacePipeline>,
    store: Arc<dyn IdentityStore>,
    artifacts: Arc<ArtifactStorage>,
}

impl Enroller {
    pub fn new(pipeline: Arc<FacePipeline>, store: Arc<dyn IdentityStore>, artifacts: Arc<ArtifactStorage>) -> Self {
        Self {
            pipeline,
            store,
            artifacts,
        }
    }

    /// Enroll one identity and commit it immediately.
    pub fn enroll(&self, image: &[u8], name: &str) -> Result<Identity, EnrollError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::EmptyName);
        }
        if self.store.exists_by_name(name)? {
            return Err(EnrollError::DuplicateName(name.to_string()));
        }

        let (identity, artifacts) = self.prepare(image, name)?;
        // On failure `artifacts` drops here and removes the files.
        self.store.commit(std::slice::from_ref(&identity))?;
        artifacts.keep();

        tracing::info!(identity_id = %identity.identity_id, name, "identity enrolled");
        Ok(identity)
    }

    /// Start a bulk enrollment of `images[i]` under `names[i]`.
    ///
    /// The only error is a length mismatch, checked before any work starts.
    pub fn bulk(&self, images: Vec<Vec<u8>>, names: Vec<String>) -> Result<BulkEnrollment, EnrollError> {
        if images.len() != names.len() {
            return Err(EnrollError::MismatchedInput {
                images: images.len(),
                names: names.len(),
            });
        }
        let total = images.len();
        tracing::info!(total, "bulk enrollment started");

        Ok(BulkEnrollment {
            enroller: self.clone(),
            items: images.into_iter().zip(names).enumerate().collect::<Vec<_>>().into_iter(),
            total,
            staged: Vec::new(),
            staged_names: HashSet::new(),
            failures: Vec::new(),
            finished: false,
        })
    }

    /// Compute the embedding and write artifacts for a not-yet-persisted
    /// identity. The returned guard owns the artifacts until committed.
    fn prepare(&self, image: &[u8], name: &str) -> Result<(Identity, ArtifactGuard), EnrollError> {
        let sample = self.pipeline.embed_bytes(image)?;

        let identity_id = Uuid::new_v4().to_string();
        let mut artifacts = ArtifactGuard::new(self.artifacts.clone());
        let face_image_path = artifacts.save_image(&sample.image, &identity_id, ArtifactKind::Original)?;
        let face_preprocessed_path =
            artifacts.save_image(&sample.preprocessed.resized, &identity_id, ArtifactKind::Preprocessed)?;

        let identity = Identity {
            identity_id,
            name: name.to_string(),
            embedding: sample.embedding,
            is_active: true,
            face_image_path: Some(face_image_path),
            face_preprocessed_path: Some(face_preprocessed_path),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        Ok((identity, artifacts))
    }
}

/// Lazily-driven bulk enrollment. See the module docs for the event contract.
pub struct BulkEnrollment {
    enroller: Enroller,
    items: std::vec::IntoIter<(usize, (Vec<u8>, String))>,
    total: usize,
    staged: Vec<(Identity, ArtifactGuard)>,
    staged_names: HashSet<String>,
    failures: Vec<BulkFailure>,
    finished: bool,
}

impl BulkEnrollment {
    fn process(&mut self, image: &[u8], name: &str) -> Result<(), String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::EmptyName.to_string());
        }
        match self.enroller.store.exists_by_name(name) {
            Ok(true) => return Err(REASON_ALREADY_REGISTERED.to_string()),
            Ok(false) => {}
            Err(e) => return Err(e.to_string()),
        }
        if self.staged_names.contains(name) {
            return Err(REASON_DUPLICATE_IN_BATCH.to_string());
        }

        let (identity, artifacts) = self.enroller.prepare(image, name).map_err(|e| e.to_string())?;
        self.staged_names.insert(name.to_string());
        self.staged.push((identity, artifacts));
        Ok(())
    }

    fn finish(&mut self) -> CompletionSummary {
        let staged = std::mem::take(&mut self.staged);
        let mut success_count = staged.len();

        if !staged.is_empty() {
            let identities: Vec<Identity> = staged.iter().map(|(identity, _)| identity.clone()).collect();
            match self.enroller.store.commit(&identities) {
                Ok(()) => {
                    for (_, artifacts) in staged {
                        artifacts.keep();
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, staged = identities.len(), "bulk commit failed; batch rolled back");
                    let reason = format!("commit failed: {e}");
                    for (identity, artifacts) in staged {
                        drop(artifacts);
                        self.failures.push(BulkFailure {
                            folder: identity.name,
                            reason: reason.clone(),
                        });
                    }
                    success_count = 0;
                }
            }
        }

        let summary = CompletionSummary {
            total_folders_scanned: self.total,
            success_count,
            failed_count: self.failures.len(),
            failures: self.failures.clone(),
        };
        tracing::info!(
            total = summary.total_folders_scanned,
            success = summary.success_count,
            failed = summary.failed_count,
            "bulk enrollment finished"
        );
        summary
    }
}

impl Iterator for BulkEnrollment {
    type Item = BulkEvent;

    fn next(&mut self) -> Option<BulkEvent> {
        if self.finished {
            return None;
        }

        let Some((index, (image, name))) = self.items.next() else {
            self.finished = true;
            return Some(BulkEvent::Complete(self.finish()));
        };

        let (status, reason) = match self.process(&image, &name) {
            Ok(()) => (ItemStatus::Success, None),
            Err(reason) => {
                tracing::warn!(name = %name, reason = %reason, "bulk item failed");
                self.failures.push(BulkFailure {
                    folder: name.clone(),
                    reason: reason.clone(),
                });
                (ItemStatus::Failed, Some(reason))
            }
        };

        Some(BulkEvent::Progress(ProgressEvent {
            current: index + 1,
            total: self.total,
            name,
            status,
            reason,
        }))
    }
}

impl Drop for BulkEnrollment {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            tracing::warn!(
                staged = self.staged.len(),
                "bulk enrollment abandoned before commit; removing staged artifacts"
            );
        }
    }
}
