use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Number of digest hex characters carried into the document id.
pub const DIGEST_PREFIX_LEN: usize = 8;

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Derives the stable identity for a document from its filename stem and the
/// SHA-256 digest of its content. No timestamp component: re-processing
/// identical content must land on the same id so duplicate queue deliveries
/// collapse into one idempotent upsert.
pub fn generate_document_id(filename: &str, digest: &str) -> Result<String, IngestError> {
    if digest.is_empty() {
        return Err(IngestError::InvalidArgument(
            "content digest is empty".to_string(),
        ));
    }

    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| IngestError::MissingFileName(filename.to_string()))?;

    let prefix = &digest[..DIGEST_PREFIX_LEN.min(digest.len())];
    Ok(format!("{}_{}", sanitize_stem(stem), prefix))
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '-' || character == '_' {
                character
            } else {
                '-'
            }
        })
        .collect()
}
