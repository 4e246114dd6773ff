use crate::config::AttachmentConfig;
use crate::error::{AppError, AppResult};
use crate::models::Attachment;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const ALLOWED_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "text/plain",
    "text/csv",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

const MAX_FILE_NAME_LEN: usize = 255;

/// One uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub max_bytes: usize,
    pub max_count: usize,
}

impl AttachmentPolicy {
    pub fn from_config(config: &AttachmentConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_count: config.max_count,
        }
    }

    pub fn check_count(&self, count: usize) -> AppResult<()> {
        if count > self.max_count {
            return Err(AppError::AttachmentRejected(format!(
                "at most {} attachments per message",
                self.max_count
            )));
        }
        Ok(())
    }

    pub fn check_file_name(&self, file_name: &str) -> AppResult<()> {
        let bad = file_name.trim().is_empty()
            || file_name.chars().count() > MAX_FILE_NAME_LEN
            || file_name == "."
            || file_name == ".."
            || file_name.contains(['/', '\\', '\0']);
        if bad {
            return Err(AppError::AttachmentRejected(format!(
                "invalid file name: {file_name:?}"
            )));
        }
        Ok(())
    }

    /// Canonical MIME essence of an accepted type.
    pub fn check_type(&self, content_type: &str) -> AppResult<String> {
        let essence = content_type
            .parse::<mime::Mime>()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .map_err(|_| {
                AppError::AttachmentRejected(format!("unparseable content type: {content_type}"))
            })?;
        if !ALLOWED_TYPES.contains(&essence.as_str()) {
            return Err(AppError::AttachmentRejected(format!(
                "content type {essence} is not accepted"
            )));
        }
        Ok(essence)
    }

    /// Size check used while streaming, before the whole file is buffered.
    pub fn check_size(&self, file_name: &str, size: usize) -> AppResult<()> {
        if size > self.max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "{file_name} exceeds {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    pub fn check(&self, file: &UploadedFile) -> AppResult<String> {
        self.check_file_name(&file.file_name)?;
        if file.bytes.is_empty() {
            return Err(AppError::AttachmentRejected(format!(
                "{} is empty",
                file.file_name
            )));
        }
        self.check_size(&file.file_name, file.bytes.len())?;
        self.check_type(&file.content_type)
    }
}

/// Content-addressed blob storage. Blobs are written once and never replaced.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `content_hash`; a no-op when it already exists.
    async fn put(&self, content_hash: &str, bytes: Bytes) -> AppResult<()>;

    async fn get(&self, content_hash: &str) -> AppResult<Option<Bytes>>;
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root
            .join(&content_hash[0..2])
            .join(&content_hash[2..4])
            .join(content_hash)
    }
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, content_hash: &str, bytes: Bytes) -> AppResult<()> {
        if !is_hex_digest(content_hash) {
            return Err(AppError::Storage(format!("bad blob key {content_hash}")));
        }
        let path = self.path_for(content_hash);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        let staging = dir.join(format!(".{}.{}", content_hash, Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        tracing::debug!(content_hash, size = bytes.len(), "attachment blob stored");
        Ok(())
    }

    async fn get(&self, content_hash: &str) -> AppResult<Option<Bytes>> {
        if !is_hex_digest(content_hash) {
            return Ok(None);
        }
        match tokio::fs::read(self.path_for(content_hash)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, content_hash: &str, bytes: Bytes) -> AppResult<()> {
        self.blobs.entry(content_hash.to_string()).or_insert(bytes);
        Ok(())
    }

    async fn get(&self, content_hash: &str) -> AppResult<Option<Bytes>> {
        Ok(self.blobs.get(content_hash).map(|b| b.value().clone()))
    }
}

/// Validates uploads and turns them into ledger attachment references.
pub struct AttachmentService {
    policy: AttachmentPolicy,
    blobs: Arc<dyn BlobStore>,
    public_base_url: String,
}

impl AttachmentService {
    pub fn new(config: &AttachmentConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            policy: AttachmentPolicy::from_config(config),
            blobs,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Validate every file first, then store them. A rejected file means
    /// nothing is stored.
    pub async fn store_all(&self, files: Vec<UploadedFile>) -> AppResult<Vec<Attachment>> {
        self.policy.check_count(files.len())?;
        let mut checked = Vec::with_capacity(files.len());
        for file in files {
            let file_type = self.policy.check(&file)?;
            checked.push((file, file_type));
        }

        let mut attachments = Vec::with_capacity(checked.len());
        for (file, file_type) in checked {
            let content_hash = hex::encode(Sha256::digest(&file.bytes));
            let file_size = file.bytes.len() as u64;
            self.blobs.put(&content_hash, file.bytes).await?;
            attachments.push(Attachment {
                id: Uuid::new_v4(),
                url: format!("{}/{}", self.public_base_url, content_hash),
                file_name: file.file_name,
                file_type,
                file_size,
                content_hash,
                ocr_text: None,
            });
        }
        Ok(attachments)
    }
}
