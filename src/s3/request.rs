//! Request descriptions handed to the dispatcher

use crate::s3::error::{Result, S3Error};
use bytes::Bytes;
use hyper::Method;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix applied to user metadata keys
pub const METADATA_PREFIX: &str = "x-amz-meta-";

/// How a file-backed body contributes to the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadHashing {
    /// SHA256 of the file contents, read in chunks before sending
    Incremental,
    /// `UNSIGNED-PAYLOAD` in both the signature and `x-amz-content-sha256`
    Unsigned,
}

/// A body streamed from a file that is not buffered in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedBody {
    pub path: PathBuf,
    pub hashing: PayloadHashing,
}

impl StreamedBody {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            hashing: PayloadHashing::Incremental,
        }
    }

    pub fn unsigned(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            hashing: PayloadHashing::Unsigned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    InMemory(Bytes),
    Streamed(StreamedBody),
}

impl Default for Body {
    fn default() -> Self {
        Body::InMemory(Bytes::new())
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, Body::Streamed(_))
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::InMemory(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::InMemory(Bytes::from(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::InMemory(Bytes::from_static(s.as_bytes()))
    }
}

/// Logical description of one S3 request, built fresh per call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub bucket: Option<String>,
    pub key: Option<String>,
    /// Raw (not yet encoded) query pairs
    pub query: Vec<(String, String)>,
    /// Extra headers, keyed by lower-cased name
    pub headers: BTreeMap<String, String>,
    /// User metadata, sent as `x-amz-meta-<name>`
    pub metadata: BTreeMap<String, String>,
    pub body: Body,
}

impl RequestSpec {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            key: None,
            query: Vec::new(),
            headers: BTreeMap::new(),
            metadata: BTreeMap::new(),
            body: Body::default(),
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a query parameter; an empty value renders as `name=`.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn queries(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// Set a header. Names are case-insensitive; a later value replaces an earlier one.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
        self
    }

    pub fn meta(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.metadata
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn streamed(mut self, body: StreamedBody) -> Self {
        self.body = Body::Streamed(body);
        self
    }

    /// Check caller-supplied fields before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if let Some(bucket) = &self.bucket {
            if bucket.trim().is_empty() {
                return Err(S3Error::InvalidArgument(
                    "bucket name cannot be empty".to_string(),
                ));
            }
        }
        if self.key.is_some() && self.bucket.is_none() {
            return Err(S3Error::InvalidArgument(
                "object key given without a bucket".to_string(),
            ));
        }
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(S3Error::InvalidArgument(
                    "object key cannot be empty".to_string(),
                ));
            }
        }
        if self.query.iter().any(|(name, _)| name.is_empty()) {
            return Err(S3Error::InvalidArgument(
                "query parameter name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Headers plus metadata, as they will be sent.
    pub fn merged_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        for (name, value) in &self.metadata {
            headers.insert(format!("{}{}", METADATA_PREFIX, name), value.clone());
        }
        headers
    }

    /// Percent-encoded query string without the leading `?`.
    pub fn query_string(&self) -> String {
        use crate::s3::canonical::uri_encode;

        let mut out = String::new();
        for (i, (name, value)) in self.query.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(&uri_encode(name, true));
            out.push('=');
            out.push_str(&uri_encode(value, true));
        }
        out
    }
}

/// Canned ACLs accepted in `x-amz-acl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
    LogDeliveryWrite,
    AwsExecRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
            CannedAcl::BucketOwnerRead => "bucket-owner-read",
            CannedAcl::BucketOwnerFullControl => "bucket-owner-full-control",
            CannedAcl::LogDeliveryWrite => "log-delivery-write",
            CannedAcl::AwsExecRead => "aws-exec-read",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = S3Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            "bucket-owner-read" => Ok(CannedAcl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(CannedAcl::BucketOwnerFullControl),
            "log-delivery-write" => Ok(CannedAcl::LogDeliveryWrite),
            "aws-exec-read" => Ok(CannedAcl::AwsExecRead),
            other => Err(S3Error::InvalidArgument(format!(
                "invalid canned ACL: {}",
                other
            ))),
        }
    }
}
