//! Filesystem area holding flushed capture artifacts.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CaptureError;

use super::types::Direction;

/// Directory where each connection's request and response bytes are written
/// as `{id}_request.txt` and `{id}_response.txt`.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, id: u64, direction: Direction) -> PathBuf {
        self.root.join(format!("{}_{}.txt", id, direction.as_str()))
    }

    pub async fn write(&self, id: u64, direction: Direction, data: &[u8]) -> io::Result<()> {
        tokio::fs::write(self.path(id, direction), data).await
    }

    /// Read a flushed artifact. An artifact that was never written reads as
    /// empty.
    pub async fn read(&self, id: u64, direction: Direction) -> Result<Vec<u8>, CaptureError> {
        let path = self.path(id, direction);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(CaptureError::ReadArtifact { path, source }),
        }
    }

    /// Remove the directory with everything in it and recreate it empty.
    pub async fn reset(&self) -> Result<(), CaptureError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CaptureError::RemoveArea {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| CaptureError::CreateArea {
                path: self.root.clone(),
                source,
            })?;

        debug!(dir = %self.root.display(), "artifact directory reset");
        Ok(())
    }
}
