use crate::crypto;
use crate::protocol::StoredFilePayload;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Content store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("payload is not valid JSON: {0}")]
    PayloadMalformed(#[from] serde_json::Error),

    #[error("record name {0:?} is not a plain file name")]
    InvalidName(String),

    #[error("no record named {0:?}")]
    NotFound(String),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What a `store` call did. Writing content that already exists is success,
/// not an error: identical hash means identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(String),
    AlreadyStored(String),
}

impl StoreOutcome {
    /// The on-disk record name, whichever way the call went.
    pub fn record_name(&self) -> &str {
        match self {
            StoreOutcome::Stored(name) | StoreOutcome::AlreadyStored(name) => name,
        }
    }
}

/// Durable, deduplicating store of ciphertext records keyed by content hash.
///
/// The filesystem is the only index: existence checks go straight to disk,
/// which keeps same-key write races harmless because both writers carry
/// byte-identical content.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The canonical record name for a content hash.
    pub fn record_name(hash: &str) -> String {
        format!("{hash}.txt")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse and persist a `StoredFilePayload` received as JSON.
    ///
    /// The on-disk identity is always the content hash. A payload from an
    /// older sender that omits the hash gets one derived from its ciphertext
    /// here, so no record is ever keyed by caller-supplied or
    /// timestamp-derived names.
    pub async fn store(&self, payload_json: &str) -> Result<StoreOutcome, StoreError> {
        let payload: StoredFilePayload = serde_json::from_str(payload_json)?;

        let hash = if payload.hash.is_empty() {
            debug!("payload for {} carries no hash, deriving from content", payload.filename);
            crypto::content_hash(payload.content.as_bytes())
        } else {
            payload.hash.clone()
        };

        let name = Self::record_name(&hash);
        let path = self.record_path(&name)?;

        if tokio::fs::try_exists(&path).await? {
            debug!("record {} already present, skipping write", name);
            return Ok(StoreOutcome::AlreadyStored(name));
        }

        tokio::fs::write(&path, payload.content.as_bytes()).await?;
        info!("stored record {} ({})", name, payload.filename);
        Ok(StoreOutcome::Stored(name))
    }

    /// Raw bytes of an existing record.
    pub async fn load(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.record_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Existence check. Side-effect free; an unreadable or invalid name is
    /// simply absent.
    pub async fn has(&self, name: &str) -> bool {
        match self.record_path(name) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a record.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.record_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("deleted record {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // Record names come off the wire; only a single plain path component may
    // ever reach the filesystem.
    fn record_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}
