use crate::core::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A shared document tracked by the content index
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AcademicFile {
    pub cid: String,
    pub file_name: String,
    pub owner_id: String,
    pub size: u64,
    /// Lowercase extension including the dot, e.g. `.pdf`
    pub file_type: String,
    pub description: String,
    pub subject: String,
    pub upload_time: i64,
    pub download_count: u64,
    pub average_rating: f64,
    pub total_ratings: u64,
    /// Peers hosting a copy, owner first
    pub peer_locations: Vec<String>,
    pub is_available: bool,
    /// Full SHA-256 hex digest of the content
    pub checksum: String,
}

/// Metadata supplied alongside the bytes of an upload
#[derive(Clone, Debug, Default)]
pub struct FileMetadata {
    pub file_name: String,
    pub description: String,
    pub subject: String,
}

impl AcademicFile {
    pub fn new(
        cid: String,
        checksum: String,
        owner_id: &str,
        size: u64,
        file_type: String,
        metadata: FileMetadata,
        now: i64,
    ) -> Self {
        Self {
            cid,
            file_name: metadata.file_name,
            owner_id: owner_id.to_string(),
            size,
            file_type,
            description: metadata.description,
            subject: metadata.subject,
            upload_time: now,
            download_count: 0,
            average_rating: 0.0,
            total_ratings: 0,
            peer_locations: vec![owner_id.to_string()],
            is_available: true,
            checksum,
        }
    }

    /// Case-insensitive substring match over name, description and subject
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.file_name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.subject.to_lowercase().contains(needle)
    }
}

/// Lowercased extension of a file name, with the leading dot
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Check an upload against the size limit and the allowed type list
///
/// Returns the normalized file type on success.
pub fn validate_upload(
    file_name: &str,
    size: u64,
    max_size: u64,
    allowed_types: &[String],
) -> Result<String, ValidationError> {
    if file_name.trim().is_empty() {
        return Err(ValidationError::MissingField("file_name"));
    }

    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }

    if size > max_size {
        return Err(ValidationError::FileTooLarge { size, max: max_size });
    }

    let file_type = file_extension(file_name)
        .ok_or_else(|| ValidationError::UnsupportedType(file_name.to_string()))?;

    if !allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&file_type)) {
        return Err(ValidationError::UnsupportedType(file_type));
    }

    Ok(file_type)
}
