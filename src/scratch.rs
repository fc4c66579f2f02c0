use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("Failed to create scratch directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write scratch file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove scratch file {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Request-scoped file storage used to hand uploads to the classifier by path.
///
/// The directory is shared across requests but every upload gets its own
/// uuid-named file, so concurrent requests never touch each other's state.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    dir: PathBuf,
}

impl ScratchStore {
    pub async fn new(dir: PathBuf) -> Result<Self, ScratchError> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| ScratchError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub async fn persist(
        &self,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<ScratchFile, ScratchError> {
        let name = format!("{}.{}", Uuid::new_v4(), extension_for(mime_type));
        let path = self.dir.join(name);
        fs::write(&path, bytes)
            .await
            .map_err(|source| ScratchError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(ScratchFile {
            path,
            removed: false,
        })
    }
}

fn extension_for(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/bmp") => "bmp",
        _ => "jpg",
    }
}

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) -> Result<(), ScratchError> {
        self.removed = true;
        fs::remove_file(&self.path)
            .await
            .map_err(|source| ScratchError::Remove {
                path: self.path.clone(),
                source,
            })
    }
}

// Removal normally happens explicitly once the classifier has exited; the
// drop path covers cancelled requests so uploads never accumulate on disk.
impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn persist_writes_bytes_to_a_fresh_file() {
        let dir = tempdir().unwrap();
        let store = ScratchStore::new(dir.path().to_path_buf()).await.unwrap();

        let file = store.persist(b"not really a jpeg", None).await.unwrap();
        let contents = std::fs::read(file.path()).unwrap();

        assert_eq!(contents, b"not really a jpeg");
        file.remove().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_uploads_get_distinct_paths() {
        let dir = tempdir().unwrap();
        let store = ScratchStore::new(dir.path().to_path_buf()).await.unwrap();

        let first = store.persist(b"a", Some("image/png")).await.unwrap();
        let second = store.persist(b"b", Some("image/png")).await.unwrap();

        assert_ne!(first.path(), second.path());
        first.remove().await.unwrap();
        second.remove().await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let dir = tempdir().unwrap();
        let store = ScratchStore::new(dir.path().to_path_buf()).await.unwrap();

        let file = store.persist(b"a", None).await.unwrap();
        let path = file.path().to_path_buf();
        file.remove().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drop_cleans_up_unremoved_files() {
        let dir = tempdir().unwrap();
        let store = ScratchStore::new(dir.path().to_path_buf()).await.unwrap();

        let path = {
            let file = store.persist(b"a", None).await.unwrap();
            file.path().to_path_buf()
        };

        assert!(!path.exists());
    }

    #[test]
    fn extension_follows_declared_mime_type() {
        assert_eq!(extension_for(Some("image/png")), "png");
        assert_eq!(extension_for(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for(None), "jpg");
    }
}
