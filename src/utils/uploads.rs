use std::path::PathBuf;

use tokio::fs;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const MAX_KYC_FILE_BYTES: usize = 5 * 1024 * 1024;

/// Detects an accepted KYC document type from its leading bytes and returns
/// the file extension to store it under.
pub fn sniff_document_kind(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("png")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("webp")
    } else if data.starts_with(b"%PDF") {
        Some("pdf")
    } else {
        None
    }
}

/// Validates and writes an uploaded document under `{root}/{subdir}`.
/// Returns the stored path relative to `root`.
pub async fn save_kyc_file(root: &str, subdir: &str, field: &str, data: &[u8]) -> Result<String> {
    if data.is_empty() {
        return Err(Error::BadRequest(format!("{} is required", field)));
    }
    if data.len() > MAX_KYC_FILE_BYTES {
        return Err(Error::BadRequest(format!("{} must be 5 MB or smaller", field)));
    }
    let Some(ext) = sniff_document_kind(data) else {
        return Err(Error::BadRequest(format!(
            "{} must be a JPEG, PNG, WebP or PDF file",
            field
        )));
    };

    let dir: PathBuf = [root, subdir].iter().collect();
    fs::create_dir_all(&dir).await?;

    let file_name = format!("{}.{}", Uuid::new_v4(), ext);
    fs::write(dir.join(&file_name), data).await.map_err(|e| {
        tracing::error!(error = %e, field, "failed to write KYC file");
        Error::Internal(format!("Failed to save file: {}", e))
    })?;

    Ok(format!("{}/{}", subdir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_supported_formats() {
        assert_eq!(sniff_document_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpg"));
        assert_eq!(sniff_document_kind(b"\x89PNG\r\n"), Some("png"));
        assert_eq!(sniff_document_kind(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_document_kind(b"%PDF-1.7"), Some("pdf"));
        assert_eq!(sniff_document_kind(b"GIF89a"), None);
        assert_eq!(sniff_document_kind(b""), None);
    }

    #[tokio::test]
    async fn rejects_oversized_and_unknown_files() {
        let dir = std::env::temp_dir().join(format!("kyc-{}", Uuid::new_v4()));
        let root = dir.to_string_lossy().to_string();

        let big = vec![0xFFu8; MAX_KYC_FILE_BYTES + 1];
        assert!(save_kyc_file(&root, "selfies", "selfie", &big).await.is_err());
        assert!(save_kyc_file(&root, "selfies", "selfie", b"plain text").await.is_err());

        let stored = save_kyc_file(&root, "id-docs", "id_doc", b"%PDF-1.4 body")
            .await
            .unwrap();
        assert!(stored.starts_with("id-docs/"));
        assert!(stored.ends_with(".pdf"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
