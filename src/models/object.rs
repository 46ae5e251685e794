//! Represents an object (blob) detected in a watched bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A single remote object returned by a listing.
///
/// Built fresh on every poll and never reused across cycles. The `uri`
/// stays empty until the object has been materialized into staging storage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Bucket holding the object.
    pub bucket: String,

    /// Full object name (path-like key within the bucket).
    pub name: String,

    /// Local staging URI, set once the object has been downloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<Url>,

    /// Size in bytes as reported by the listing.
    pub size: u64,

    /// Last modification time as reported by the listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// Entity tag, when the store provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// True for synthetic "directory" entries (names ending with `/`).
    pub is_directory: bool,
}

impl ObjectRef {
    pub fn file(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            uri: None,
            size: 0,
            updated: None,
            etag: None,
            is_directory: false,
        }
    }

    pub fn directory(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            is_directory: true,
            ..Self::file(bucket, name)
        }
    }

    /// Return a copy of this reference pointing at its staged payload.
    pub fn with_uri(self, uri: Url) -> Self {
        Self {
            uri: Some(uri),
            ..self
        }
    }

    /// Last path segment of the object name.
    pub fn file_name(&self) -> &str {
        self.name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
    }

    /// `gs://bucket/name` form, used in logs and error messages.
    pub fn gs_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }
}
