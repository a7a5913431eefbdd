//! Fakes shared by the unit tests in this crate.

use crate::artifacts::ArtifactStorage;
use crate::enroll::Enroller;
use crate::store::{IdentityStore, IdentityUpdate, SqliteStore, StoreError};
use faceid_core::{EmbeddingEngine, FacePipeline, Identity, Preprocessor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use crate::support::{png_horizontal, png_vertical, BlockAverage};

/// Always fails on commit and on reads other than the enrollment checks.
pub struct FailingStore;

impl IdentityStore for FailingStore {
    fn list_active(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(Vec::new())
    }
    fn exists_by_name(&self, _name: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
    fn commit(&self, _staged: &[Identity]) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
    fn get(&self, _identity_id: &str) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn list(&self, _skip: usize, _limit: usize) -> Result<Vec<Identity>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn count(&self) -> Result<usize, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn update(&self, _identity_id: &str, _update: &IdentityUpdate) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn delete(&self, _identity_id: &str) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn delete_all(&self) -> Result<Vec<Identity>, StoreError> {
        Err(StoreError::Poisoned)
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub calls: Arc<AtomicUsize>,
    pub pipeline: Arc<FacePipeline>,
    pub store: Arc<SqliteStore>,
    pub artifacts: Arc<ArtifactStorage>,
    pub enroller: Enroller,
}

impl Fixture {
    pub fn backend_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of files in the artifact directory.
    pub fn artifact_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("face_images"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let backend = BlockAverage::default();
    let calls = backend.calls.clone();
    let pipeline = Arc::new(FacePipeline::new(
        Preprocessor::without_detector(),
        EmbeddingEngine::new(Box::new(backend)),
    ));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let artifacts = Arc::new(ArtifactStorage::new(dir.path(), "face_images"));
    let enroller = Enroller::new(pipeline.clone(), store.clone(), artifacts.clone());
    Fixture {
        dir,
        calls,
        pipeline,
        store,
        artifacts,
        enroller,
    }
}
