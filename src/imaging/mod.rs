//! Image storage for scan photographs
//!
//! The core uploads every submitted photograph before asking the vision
//! model to look at it, so the recognition service always fetches from a
//! stable URL and the scan record keeps that URL as evidence.

mod fs_store;

pub use fs_store::FsImageStore;

use async_trait::async_trait;
use serde::Serialize;

/// Stored object handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedImage {
    /// Storage key (`{hint}/{uuid}.{ext}`)
    pub key: String,
    /// URL the recognition service and UIs fetch from
    pub url: String,
    pub content_type: String,
    pub size_bytes: usize,
    /// md5 of the payload, hex encoded
    pub etag: String,
}

/// Image storage errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid destination hint '{0}'")]
    InvalidHint(String),
    #[error("image storage I/O error: {0}")]
    Io(String),
    #[error("image storage rejected upload: {0}")]
    Rejected(String),
}

/// Object storage for photographs.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `data` under a fresh key in the `destination_hint` prefix
    /// (`checkout` / `checkin`).
    async fn upload(&self, data: &[u8], destination_hint: &str) -> Result<UploadedImage, UploadError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Best-effort content type from magic bytes. Unknown payloads are treated
/// as JPEG, which is what station cameras produce.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        _ => "image/jpeg",
    }
}
