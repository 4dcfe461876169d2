//! Filesystem-backed image store
//!
//! Writes objects under `{root}/{hint}/{uuid}.{ext}` and serves them from
//! `{public_base_url}/{hint}/{uuid}.{ext}` (a static file server or CDN
//! mounted on `root`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{sniff_content_type, ImageStore, UploadError, UploadedImage};

/// Preferred extensions when `mime_guess` offers several
const PREFERRED_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif"];

#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsImageStore {
    pub fn new<P: AsRef<Path>>(root: P, public_base_url: &str) -> Self {
        let root = root.as_ref().to_path_buf();
        info!(root = %root.display(), "Image store rooted");
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn extension_for(content_type: &str) -> &'static str {
        let Some(candidates) = mime_guess::get_mime_extensions_str(content_type) else {
            return "bin";
        };
        candidates
            .iter()
            .find(|ext| PREFERRED_EXTENSIONS.contains(*ext))
            .or_else(|| candidates.first())
            .copied()
            .unwrap_or("bin")
    }

    fn valid_hint(hint: &str) -> bool {
        !hint.is_empty()
            && hint
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn upload(&self, data: &[u8], destination_hint: &str) -> Result<UploadedImage, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if !Self::valid_hint(destination_hint) {
            return Err(UploadError::InvalidHint(destination_hint.to_string()));
        }

        let content_type = sniff_content_type(data);
        let ext = Self::extension_for(content_type);
        let key = format!("{destination_hint}/{}.{ext}", uuid::Uuid::new_v4());

        let dir = self.root.join(destination_hint);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| UploadError::Io(format!("{}: {e}", dir.display())))?;

        let path = self.root.join(&key);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| UploadError::Io(format!("{}: {e}", path.display())))?;

        let etag = format!("{:x}", md5::compute(data));
        debug!(key = %key, size_bytes = data.len(), etag = %etag, "Image stored");

        Ok(UploadedImage {
            url: format!("{}/{key}", self.public_base_url),
            key,
            content_type: content_type.to_string(),
            size_bytes: data.len(),
            etag,
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
