//! On-disk image artifacts owned by identities.
//!
//! Files live under `<root>/<dir>/` as `{identity_id}.jpg` (original) and
//! `{identity_id}_preprocessed.jpg` (the 112×112 crop fed to the model).
//! The store keeps tokens of the form `<dir>/<file>`, resolved against the
//! root.

use image::RgbImage;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode artifact: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The uploaded image, re-encoded as JPEG.
    Original,
    /// The resized crop before normalization.
    Preprocessed,
}

impl ArtifactKind {
    fn file_name(self, identity_id: &str) -> String {
        match self {
            ArtifactKind::Original => format!("{identity_id}.jpg"),
            ArtifactKind::Preprocessed => format!("{identity_id}_preprocessed.jpg"),
        }
    }
}

pub struct ArtifactStorage {
    root: PathBuf,
    dir: String,
}

impl ArtifactStorage {
    pub fn new(root: impl Into<PathBuf>, dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            dir: dir.into(),
        }
    }

    /// Write `bytes` for `identity_id` and return the token to persist.
    pub fn save(&self, bytes: &[u8], identity_id: &str, kind: ArtifactKind) -> Result<String, ArtifactError> {
        let dir = self.root.join(&self.dir);
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::Write {
            path: dir.clone(),
            source,
        })?;

        let file_name = kind.file_name(identity_id);
        let path = dir.join(&file_name);
        std::fs::write(&path, bytes).map_err(|source| ArtifactError::Write { path, source })?;

        Ok(format!("{}/{}", self.dir, file_name))
    }

    /// Encode `image` as JPEG and save it.
    pub fn save_image(&self, image: &RgbImage, identity_id: &str, kind: ArtifactKind) -> Result<String, ArtifactError> {
        self.save(&encode_jpeg(image)?, identity_id, kind)
    }

    /// Absolute location of a stored token.
    pub fn resolve(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }

    /// Remove the file behind `token`. Missing files are not an error; other
    /// failures are logged and swallowed so cleanup never masks the error that
    /// triggered it.
    pub fn delete_if_exists(&self, token: &str) {
        let path = self.resolve(token);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
        }
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, ArtifactError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)?;
    Ok(bytes)
}

/// Artifacts written for an identity that is not yet committed.
///
/// Dropping the guard deletes every tracked file; [`keep`](Self::keep) hands
/// ownership over to the persisted identity instead.
pub struct ArtifactGuard {
    storage: Arc<ArtifactStorage>,
    tokens: Vec<String>,
}

impl ArtifactGuard {
    pub fn new(storage: Arc<ArtifactStorage>) -> Self {
        Self {
            storage,
            tokens: Vec::new(),
        }
    }

    /// Save an image and track it.
    pub fn save_image(&mut self, image: &RgbImage, identity_id: &str, kind: ArtifactKind) -> Result<String, ArtifactError> {
        let token = self.storage.save_image(image, identity_id, kind)?;
        self.tokens.push(token.clone());
        Ok(token)
    }

    pub fn keep(mut self) {
        self.tokens.clear();
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.storage.delete_if_exists(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> Arc<ArtifactStorage> {
        Arc::new(ArtifactStorage::new(dir.path(), "face_images"))
    }

    #[test]
    fn test_save_resolve_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let token = storage.save(b"jpeg bytes", "abc", ArtifactKind::Original).unwrap();
        assert_eq!(token, "face_images/abc.jpg");
        let path = storage.resolve(&token);
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");

        storage.delete_if_exists(&token);
        assert!(!path.exists());
        // Second delete is a no-op.
        storage.delete_if_exists(&token);
    }

    #[test]
    fn test_preprocessed_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let token = storage(&dir)
            .save(b"x", "abc", ArtifactKind::Preprocessed)
            .unwrap();
        assert_eq!(token, "face_images/abc_preprocessed.jpg");
    }

    #[test]
    fn test_save_image_writes_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let image = RgbImage::from_pixel(16, 12, image::Rgb([10, 200, 30]));
        let token = storage.save_image(&image, "img", ArtifactKind::Original).unwrap();
        let decoded = image::open(storage.resolve(&token)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let image = RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));

        let path = {
            let mut guard = ArtifactGuard::new(storage.clone());
            let token = guard.save_image(&image, "tmp", ArtifactKind::Original).unwrap();
            let path = storage.resolve(&token);
            assert!(path.exists());
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_keep_retains_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let image = RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));

        let mut guard = ArtifactGuard::new(storage.clone());
        let token = guard.save_image(&image, "kept", ArtifactKind::Preprocessed).unwrap();
        guard.keep();
        assert!(storage.resolve(&token).exists());
    }
}
