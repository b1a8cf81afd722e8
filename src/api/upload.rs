//! Upload acceptance rules

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};

/// Default upload size limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Which uploads are handed to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Largest accepted upload in bytes
    pub max_bytes: usize,
    /// Accepted file extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,
    /// Accepted MIME types, lowercase
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: ["jpg", "jpeg", "png", "webp", "gif", "bmp"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_content_types: [
                "image/jpeg",
                "image/png",
                "image/webp",
                "image/gif",
                "image/bmp",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl UploadPolicy {
    /// Check an upload before its bytes reach the pipeline
    ///
    /// `content_type` may carry parameters (`image/png; charset=binary`); only the
    /// media type is compared. A missing content type is accepted when the extension is.
    ///
    /// # Errors
    /// - Empty or oversized upload
    /// - Extension or content type not on the allow list
    pub fn validate(&self, file_name: &str, content_type: Option<&str>, len: usize) -> Result<()> {
        if len == 0 {
            return Err(BgRemovalError::invalid_input("Uploaded file is empty"));
        }
        if len > self.max_bytes {
            return Err(BgRemovalError::invalid_input(format!(
                "Uploaded file is {} bytes, the limit is {} bytes",
                len, self.max_bytes
            )));
        }

        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                BgRemovalError::invalid_input(format!("File '{}' has no extension", file_name))
            })?;
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(BgRemovalError::invalid_input(format!(
                "File type '.{}' is not supported",
                extension
            )));
        }

        if let Some(content_type) = content_type {
            let media_type = content_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !self.allowed_content_types.contains(&media_type) {
                return Err(BgRemovalError::invalid_input(format!(
                    "Content type '{}' is not supported",
                    media_type
                )));
            }
        }

        Ok(())
    }
}
