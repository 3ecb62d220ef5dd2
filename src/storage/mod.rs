use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Local-disk asset store. Each listing image keeps two renditions: the
/// original upload (retained so regeneration never needs a re-upload) and
/// the current enhanced output, which regeneration overwrites in place.
pub struct ImageVault {
    base_path: PathBuf,
}

impl ImageVault {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        for sub in ["originals", "enhanced"] {
            std::fs::create_dir_all(base_path.join(sub))
                .map_err(|e| AppError::Storage(format!("Failed to create vault directory: {}", e)))?;
        }

        Ok(Self { base_path })
    }

    fn original_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join("originals").join(id.to_string())
    }

    fn enhanced_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join("enhanced").join(id.to_string())
    }

    pub async fn store_original(&self, id: Uuid, data: &[u8]) -> Result<()> {
        fs::write(self.original_path(id), data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write original: {}", e)))
    }

    pub async fn store_enhanced(&self, id: Uuid, data: &[u8]) -> Result<()> {
        fs::write(self.enhanced_path(id), data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write enhanced asset: {}", e)))
    }

    pub async fn load_original(&self, id: Uuid) -> Result<Vec<u8>> {
        Self::read(self.original_path(id)).await
    }

    pub async fn load_enhanced(&self, id: Uuid) -> Result<Vec<u8>> {
        Self::read(self.enhanced_path(id)).await
    }

    async fn read(path: PathBuf) -> Result<Vec<u8>> {
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound),
            Err(e) => Err(AppError::Storage(format!("Failed to read asset: {}", e))),
        }
    }

    /// Removes both renditions. Missing files are not an error.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        for path in [self.original_path(id), self.enhanced_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::Storage(format!("Failed to delete asset: {}", e)));
                }
            }
        }
        Ok(())
    }
}
