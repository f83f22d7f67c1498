//! Image files queued for analysis
//!
//! Uploads are checked locally (size, content type per model) before they
//! reach the admission controller or the network.

use averion_common::ModelType;
use std::path::Path;
use thiserror::Error;

/// Largest image the backend accepts (30 MiB)
pub const MAX_UPLOAD_BYTES: usize = 30 * 1024 * 1024;

const DICOM_CONTENT_TYPE: &str = "application/dicom";
const RASTER_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Local upload validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("{filename} is empty")]
    Empty { filename: String },

    #[error("{filename} is {size} bytes; maximum is {limit} bytes")]
    TooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    #[error("{filename} ({content_type}) is not a supported format for {model}")]
    UnsupportedType {
        filename: String,
        content_type: String,
        model: ModelType,
    },
}

/// One image file in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Build an upload, inferring the content type from the file extension
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = content_type_for(&filename).to_string();
        Self::new(filename, content_type, bytes)
    }

    /// Read an image from disk
    pub async fn from_path(path: &Path) -> averion_common::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                averion_common::Error::InvalidInput(format!(
                    "{} has no file name",
                    path.display()
                ))
            })?;
        Ok(Self::from_bytes(filename, bytes))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check size and format against what `model` accepts
    pub fn validate(&self, model: ModelType) -> Result<(), UploadRejection> {
        if self.bytes.is_empty() {
            return Err(UploadRejection::Empty {
                filename: self.filename.clone(),
            });
        }

        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(UploadRejection::TooLarge {
                filename: self.filename.clone(),
                size: self.bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let content_type = self.content_type.to_ascii_lowercase();
        let raster = RASTER_CONTENT_TYPES.contains(&content_type.as_str())
            || content_type == "image/jpg";
        let dicom = content_type == DICOM_CONTENT_TYPE
            || self.filename.to_ascii_lowercase().ends_with(".dcm");

        if raster || (dicom && model.accepts_dicom()) {
            Ok(())
        } else {
            Err(UploadRejection::UnsupportedType {
                filename: self.filename.clone(),
                content_type: self.content_type.clone(),
                model,
            })
        }
    }
}

/// Content type inferred from a file extension
pub fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "dcm" | "dicom" => DICOM_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}
