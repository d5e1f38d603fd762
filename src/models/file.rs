//! File attachments carried by human messages.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A file attached to a message.
///
/// `content` holds raw text for text files and a `data:<mime>;base64,`
/// URL (or bare base64) for binary files such as images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub name: String,
    /// MIME type or a logical category such as `text`.
    #[serde(rename = "type")]
    pub file_type: String,
    pub content: String,
}

impl FileAttachment {
    pub fn new(
        name: impl Into<String>,
        file_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            file_type: file_type.into(),
            content: content.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.file_type.starts_with("image/") || self.file_type == "image"
    }

    /// Split an image's content into `(media_type, base64 payload)`.
    ///
    /// Accepts data URLs and bare base64. Returns `None` when the payload
    /// does not decode.
    pub fn image_payload(&self) -> Option<(String, String)> {
        let (media_type, data) = match self.content.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',')?;
                let media_type = header.trim_end_matches(";base64");
                (media_type.to_string(), data)
            }
            None => (self.file_type.clone(), self.content.as_str()),
        };
        let data = data.trim();
        STANDARD.decode(data).ok()?;
        let media_type = if media_type.starts_with("image/") {
            media_type
        } else {
            "image/png".to_string()
        };
        Some((media_type, data.to_string()))
    }

    /// Read a file from disk, inlining text and base64-encoding images.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let mime = guess_mime(path);
        let bytes = std::fs::read(path)?;

        if mime.starts_with("image/") {
            let encoded = STANDARD.encode(&bytes);
            return Ok(Self::new(name, mime, format!("data:{};base64,{}", mime, encoded)));
        }

        match String::from_utf8(bytes) {
            Ok(text) => Ok(Self::new(name, mime, text)),
            Err(e) => Ok(Self::new(
                name,
                "application/octet-stream",
                STANDARD.encode(e.into_bytes()),
            )),
        }
    }

    /// Format content size for display (e.g., "1.2 KB").
    pub fn format_size(&self) -> String {
        let bytes = self.content.len();
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        }
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "json" => "application/json",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        _ => "text/plain",
    }
}
