//! Storage of self-attested custody artifacts.

use std::{collections::HashMap, fmt, io, os::unix::fs::PermissionsExt, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};

/// The three artifacts backing the custody key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// `user_data` holds the KMS key id
    KmsKeyId,
    /// `user_data` holds the KMS ciphertext of the private key
    PrivateKey,
    /// `public_key` holds the uncompressed public key, `user_data` the address
    PublicKey,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::KmsKeyId, Self::PrivateKey, Self::PublicKey];

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::KmsKeyId => "kms_key_id.coses1",
            Self::PrivateKey => "private_key.coses1",
            Self::PublicKey => "public_key.coses1",
        }
    }

    /// Unix permissions the artifact is written with
    #[must_use]
    pub const fn mode(self) -> u32 {
        match self {
            Self::PrivateKey => 0o600,
            Self::KmsKeyId | Self::PublicKey => 0o644,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KmsKeyId => f.write_str("KMS key id"),
            Self::PrivateKey => f.write_str("private key"),
            Self::PublicKey => f.write_str("public key"),
        }
    }
}

/// Artifact storage errors. Messages never contain file system paths.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {kind} artifact: {source}")]
    Read {
        kind: ArtifactKind,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {kind} artifact: {source}")]
    Write {
        kind: ArtifactKind,
        #[source]
        source: io::Error,
    },

    #[error("Artifact directory is not usable: {0}")]
    Directory(#[source] io::Error),
}

/// Key-value storage for raw artifact bytes
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns `None` only when the artifact does not exist
    async fn get(&self, kind: ArtifactKind) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `bytes`, replacing any previous artifact
    async fn put(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StoreError>;
}

/// One file per artifact under a single directory
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    directory: PathBuf,
}

impl FileArtifactStore {
    /// Uses `directory`, creating it if missing
    ///
    /// # Errors
    /// Returns `Directory` if the directory cannot be created or is not a directory.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .await
            .map_err(StoreError::Directory)?;

        let metadata = fs::metadata(&directory)
            .await
            .map_err(StoreError::Directory)?;
        if !metadata.is_dir() {
            return Err(StoreError::Directory(io::Error::new(
                io::ErrorKind::NotADirectory,
                "not a directory",
            )));
        }

        Ok(Self { directory })
    }

    fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.directory.join(kind.file_name())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn get(&self, kind: ArtifactKind) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path(kind)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { kind, source }),
        }
    }

    async fn put(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StoreError> {
        let write_error = |source| StoreError::Write { kind, source };
        let path = self.path(kind);
        let staging = self.directory.join(format!(".{}.tmp", kind.file_name()));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(kind.mode())
            .open(&staging)
            .await
            .map_err(write_error)?;

        // The mode above is only applied on creation
        file.set_permissions(std::fs::Permissions::from_mode(kind.mode()))
            .await
            .map_err(write_error)?;
        file.write_all(bytes).await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;
        drop(file);

        fs::rename(&staging, &path).await.map_err(write_error)
    }
}

/// Artifacts held in memory, for tests and tooling
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKind, Vec<u8>>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(&self, kind: ArtifactKind) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.artifacts.read().await.get(&kind).cloned())
    }

    async fn put(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StoreError> {
        self.artifacts.write().await.insert(kind, bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_missing_artifact_is_none() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let store = FileArtifactStore::open(directory.path()).await?;

        for kind in ArtifactKind::ALL {
            assert_eq!(store.get(kind).await?, None);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_put_then_get() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let store = FileArtifactStore::open(directory.path()).await?;

        store.put(ArtifactKind::KmsKeyId, b"first").await?;
        store.put(ArtifactKind::KmsKeyId, b"second").await?;

        assert_eq!(
            store.get(ArtifactKind::KmsKeyId).await?,
            Some(b"second".to_vec())
        );
        assert!(directory.path().join("kms_key_id.coses1").is_file());
        assert!(!directory.path().join(".kms_key_id.coses1.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_file_modes() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let store = FileArtifactStore::open(directory.path()).await?;

        for kind in ArtifactKind::ALL {
            store.put(kind, b"artifact").await?;
            let metadata = std::fs::metadata(directory.path().join(kind.file_name()))?;
            assert_eq!(metadata.permissions().mode() & 0o777, kind.mode(), "{kind}");
        }
        assert_eq!(ArtifactKind::PrivateKey.mode(), 0o600);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_artifact_is_an_error() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let store = FileArtifactStore::open(directory.path()).await?;
        std::fs::create_dir(directory.path().join("private_key.coses1"))?;

        let result = store.get(ArtifactKind::PrivateKey).await;
        assert!(matches!(
            result,
            Err(StoreError::Read {
                kind: ArtifactKind::PrivateKey,
                ..
            })
        ));

        let message = result.unwrap_err().to_string();
        assert!(!message.contains(&directory.path().display().to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_must_be_a_directory() -> anyhow::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let result = FileArtifactStore::open(file.path()).await;
        assert!(matches!(result, Err(StoreError::Directory(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store() -> anyhow::Result<()> {
        let store = MemoryArtifactStore::new();
        assert_eq!(store.get(ArtifactKind::PublicKey).await?, None);

        store.put(ArtifactKind::PublicKey, b"artifact").await?;
        assert_eq!(
            store.get(ArtifactKind::PublicKey).await?,
            Some(b"artifact".to_vec())
        );
        Ok(())
    }
}
