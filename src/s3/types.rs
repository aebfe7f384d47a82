//! S3 listing types and response structures

use serde::{Deserialize, Serialize};

/// Object owner as reported in listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: Option<String>,
}

/// One `<Contents>` entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Object key
    pub key: String,
    /// Last modified timestamp as sent by the server
    pub last_modified: Option<String>,
    /// ETag with the surrounding quotes stripped
    pub etag: Option<String>,
    /// Object size in bytes
    pub size: u64,
    /// Storage class (STANDARD, STANDARD_IA, GLACIER, etc.)
    pub storage_class: Option<String>,
    pub owner: Option<Owner>,
}

impl ObjectEntry {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            last_modified: None,
            etag: None,
            size,
            storage_class: None,
            owner: None,
        }
    }
}

/// Result of a ListObjects (v1) request, or the merge of several pages.
///
/// `is_truncated` and `next_marker` are `None` on a merged listing
/// produced by [`S3Client::list_bucket_all`](crate::s3::S3Client::list_bucket_all).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResult {
    /// Bucket name
    pub name: String,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub next_marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub is_truncated: Option<bool>,
    /// Objects in server order; always a sequence, even for a single entry
    pub contents: Vec<ObjectEntry>,
    /// Common prefixes (subdirectories when using a delimiter)
    pub common_prefixes: Vec<String>,
}

impl ListingResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the server reported more entries beyond this page.
    pub fn truncated(&self) -> bool {
        self.is_truncated.unwrap_or(false)
    }

    /// Keys in server order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.contents.iter().map(|obj| obj.key.as_str())
    }

    /// Marker for the page after this one: the server-provided next marker,
    /// otherwise the last key of this page.
    pub fn continuation_marker(&self) -> Option<&str> {
        self.next_marker
            .as_deref()
            .or_else(|| self.contents.last().map(|obj| obj.key.as_str()))
    }
}

/// Query parameters of a bucket listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub max_keys: Option<u32>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Query pairs in wire form; the canonicalizer sorts them.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::with_capacity(4);
        if let Some(d) = &self.delimiter {
            query.push(("delimiter".to_string(), d.clone()));
        }
        if let Some(m) = &self.marker {
            query.push(("marker".to_string(), m.clone()));
        }
        if let Some(n) = self.max_keys {
            query.push(("max-keys".to_string(), n.to_string()));
        }
        if let Some(p) = &self.prefix {
            query.push(("prefix".to_string(), p.clone()));
        }
        query
    }
}

/// One bucket of a service listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    pub name: String,
    pub creation_date: Option<String>,
}

/// Result of `GET /` (ListAllMyBuckets)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketListing {
    pub owner: Option<Owner>,
    pub buckets: Vec<BucketEntry>,
}
