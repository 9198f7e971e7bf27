use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A file in a dataset stage, as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(rename = "eTag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl FileMeta {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            etag: None,
            content_type: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// Content-derived key of the validation cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Server eTags are quoted on the wire; quotes are not part of the identity.
    pub fn from_etag(etag: &str) -> Self {
        Self(etag.trim_matches('"').to_string())
    }

    pub fn of_content(text: &str) -> Self {
        Self(format!("sha256:{}", hex_digest(text.as_bytes())))
    }

    /// Last resort when neither an eTag nor the complete content is known.
    pub fn of_metadata(meta: &FileMeta) -> Self {
        let descriptor = format!(
            "{}/{}/{}",
            meta.key,
            meta.size,
            meta.last_modified.as_deref().unwrap_or("")
        );
        Self(format!("meta:{}", hex_digest(descriptor.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::{FileMeta, Fingerprint};

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(
            Fingerprint::from_etag("\"abc123\""),
            Fingerprint::from_etag("abc123")
        );
    }

    #[test]
    fn content_fingerprint_ignores_path() {
        let a = Fingerprint::of_content("<ead/>");
        let b = Fingerprint::of_content("<ead/>");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::of_content("<ead></ead>"));
    }

    #[test]
    fn metadata_fingerprint_changes_with_size() {
        let small = FileMeta::new("a.xml").with_size(10);
        let large = FileMeta::new("a.xml").with_size(11);
        assert_ne!(
            Fingerprint::of_metadata(&small),
            Fingerprint::of_metadata(&large)
        );
    }
}
