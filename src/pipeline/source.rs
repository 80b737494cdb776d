//! Source resolution: normalise a caller-supplied path or `file://` URI into
//! a [`SourceFile`].
//!
//! Document pickers hand back URIs (`file:///storage/…/scan%201.pdf`) while
//! shells hand back plain paths. Both end up as a local path plus the
//! metadata the uploader needs up front: a display name for the object, a
//! MIME type for `Content-Type`, and a size for `Content-Length` and the
//! pre-flight size check. The file itself is never modified.

use crate::error::PipelineError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

const FILE_SCHEME: &str = "file://";

/// Read-only handle to a caller-owned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub local_path: PathBuf,
    /// Name the object is stored under (before provider renaming).
    pub display_name: String,
    pub declared_mime_type: String,
    pub size_bytes: u64,
}

impl SourceFile {
    /// Describe a file whose metadata the caller already knows.
    pub fn new(
        local_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        declared_mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            display_name: display_name.into(),
            declared_mime_type: declared_mime_type.into(),
            size_bytes,
        }
    }

    /// Resolve a path or `file://` URI, reading size and inferring the MIME type.
    pub async fn from_path(input: &str) -> Result<Self, PipelineError> {
        let path = local_path(input);

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_to_pipeline(&path, e))?;
        if !metadata.is_file() {
            return Err(PipelineError::NotAFile { path });
        }

        // Metadata succeeds on unreadable files; opening is the real check.
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_to_pipeline(&path, e))?;

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::NotAFile { path: path.clone() })?;
        let declared_mime_type = mime_from_extension(&path).to_string();

        debug!(
            path = %path.display(),
            size = metadata.len(),
            mime = %declared_mime_type,
            "Resolved source file"
        );

        Ok(Self {
            local_path: path,
            display_name,
            declared_mime_type,
            size_bytes: metadata.len(),
        })
    }

    /// Stat the file again and fail if it no longer has `size_bytes` bytes.
    ///
    /// `size_bytes` becomes the upload's `Content-Length`, so a stale or
    /// caller-supplied size would otherwise truncate or stall the upload.
    pub async fn verify_size(&self) -> Result<(), PipelineError> {
        let metadata = tokio::fs::metadata(&self.local_path)
            .await
            .map_err(|e| io_to_pipeline(&self.local_path, e))?;
        if !metadata.is_file() {
            return Err(PipelineError::NotAFile {
                path: self.local_path.clone(),
            });
        }
        check_size(&self.local_path, self.size_bytes, metadata.len())
    }

    /// Identifies this file in progress events.
    ///
    /// The full local path, since display names repeat across directories.
    pub fn progress_key(&self) -> String {
        self.local_path.display().to_string()
    }

    /// Reject files larger than `max_bytes`.
    pub fn ensure_within(&self, max_bytes: u64) -> Result<(), PipelineError> {
        if self.size_bytes > max_bytes {
            return Err(PipelineError::FileTooLarge {
                path: self.local_path.clone(),
                size: self.size_bytes,
                max: max_bytes,
            });
        }
        Ok(())
    }
}

/// Strip a `file://` scheme, percent-decoding what follows.
///
/// Plain paths are returned untouched: a literal `%` in a shell path is part
/// of the name.
pub fn local_path(input: &str) -> PathBuf {
    match input.strip_prefix(FILE_SCHEME) {
        Some(rest) => PathBuf::from(percent_decode_str(rest).decode_utf8_lossy().into_owned()),
        None => PathBuf::from(input),
    }
}

/// MIME type for the scanned-document formats we accept.
///
/// Unknown extensions get `b2/x-auto`, which asks the provider to sniff.
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        _ => "b2/x-auto",
    }
}

/// Hex SHA-1 of a file, read in 64 KiB chunks.
pub async fn content_sha1(path: &Path) -> Result<String, PipelineError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_to_pipeline(path, e))?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| PipelineError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn check_size(path: &Path, declared: u64, actual: u64) -> Result<(), PipelineError> {
    if declared != actual {
        return Err(PipelineError::SizeMismatch {
            path: path.to_path_buf(),
            declared,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn io_to_pipeline(path: &Path, e: std::io::Error) -> PipelineError {
    match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::FileRead {
            path: path.to_path_buf(),
            source: e,
        },
    }
}
