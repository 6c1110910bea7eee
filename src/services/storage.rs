//! Blob storage
//!
//! Artifacts (snapshots, exports, import reports) are stored as opaque
//! objects addressed by a relative key. `LocalBlobStore` keeps them under a
//! directory on disk; other backends only need to implement [`BlobStore`].

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::models::CompressionType;

/// Error types for blob storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object store addressed by relative keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Returns false if nothing was stored under the key
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Filesystem-backed blob store
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never observe a partial object
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

/// Requested compression for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    None,
    Gzip,
    /// Gzip when the payload reaches the configured threshold
    #[default]
    Auto,
}

impl From<bool> for CompressionMode {
    fn from(compress: bool) -> Self {
        if compress {
            CompressionMode::Gzip
        } else {
            CompressionMode::None
        }
    }
}

impl CompressionMode {
    /// Compression to apply to a payload of `len` bytes
    pub fn resolve(&self, len: usize, threshold: usize) -> CompressionType {
        match self {
            CompressionMode::None => CompressionType::None,
            CompressionMode::Gzip => CompressionType::Gzip,
            CompressionMode::Auto if len >= threshold => CompressionType::Gzip,
            CompressionMode::Auto => CompressionType::None,
        }
    }
}

pub fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1f, 0x8b])
}

/// Lowercase hex sha256
pub fn sha256_hex(bytes: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(bytes))
}

/// Content type for a stored filename, ignoring a trailing `.gz`
pub fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    let lower = lower.strip_suffix(".gz").unwrap_or(&lower);
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("ndjson") => "application/x-ndjson",
        Some("csv") => "text/csv",
        Some("xml") => "application/xml",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store.put("backups/2024/a.json", b"{}").await.unwrap();
        assert!(store.exists("backups/2024/a.json").await.unwrap());
        assert_eq!(store.get("backups/2024/a.json").await.unwrap(), b"{}");

        assert!(store.delete("backups/2024/a.json").await.unwrap());
        assert!(!store.delete("backups/2024/a.json").await.unwrap());
        assert!(matches!(
            store.get("backups/2024/a.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for key in ["../escape", "/etc/passwd", "a/../../b", "", "a\\b", "./a"] {
            assert!(
                matches!(store.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"verbatims ".repeat(200);
        let packed = gzip(&data).unwrap();
        assert!(is_gzip(&packed));
        assert!(packed.len() < data.len());
        assert_eq!(gunzip(&packed).unwrap(), data);
    }

    #[test]
    fn test_compression_mode_resolve() {
        assert_eq!(CompressionMode::Auto.resolve(10, 1024), CompressionType::None);
        assert_eq!(CompressionMode::Auto.resolve(1024, 1024), CompressionType::Gzip);
        assert_eq!(CompressionMode::from(true).resolve(1, 1024), CompressionType::Gzip);
        assert_eq!(CompressionMode::None.resolve(1 << 20, 1024), CompressionType::None);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("snapshot.json.gz"), "application/json");
        assert_eq!(content_type_for("report.NDJSON"), "application/x-ndjson");
        assert_eq!(content_type_for("export.zip"), "application/zip");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
