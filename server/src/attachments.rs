//! Attachment staging.
//!
//! Attachments are written out before the message that references them is
//! persisted. The relay only ever carries the returned reference, never the
//! bytes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use uuid::Uuid;

use crate::error::AttachmentError;

/// Opaque, filename-like reference to a staged attachment.
pub type AttachmentRef = String;

const MAX_EXTENSION_LEN: usize = 16;
const FALLBACK_EXTENSION: &str = "bin";

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn stage(&self, name: &str, bytes: Vec<u8>) -> Result<AttachmentRef, AttachmentError>;
}

/// Stores attachments as flat files under one directory. The reference is
/// the file name, served back under `/uploads/`.
pub struct DiskAttachmentStore {
    root: PathBuf,
}

impl DiskAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl AttachmentStore for DiskAttachmentStore {
    async fn stage(&self, name: &str, bytes: Vec<u8>) -> Result<AttachmentRef, AttachmentError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let reference = format!("{}.{}", Uuid::now_v7().simple(), safe_extension(name));
        let path = self.root.join(&reference);
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(
            attachment = %reference,
            bytes = bytes.len(),
            "Attachment staged"
        );
        Ok(reference)
    }
}

/// Extension of the client-supplied name, if it is short and alphanumeric.
fn safe_extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Decode a data-URL style payload: everything after the first comma is
/// standard base64.
pub fn decode_data_url(data: &str) -> Result<Vec<u8>, AttachmentError> {
    let (_, payload) = data
        .split_once(',')
        .ok_or(AttachmentError::MissingSeparator)?;
    Ok(STANDARD.decode(payload.trim())?)
}
