//! Path-style vs. virtual-hosted-style addressing
//!
//! The decision is made once per request and carried unchanged into both the
//! request URL and the canonical URI, so the signature always covers the
//! resource that is actually requested.

use crate::s3::canonical::uri_encode;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "s3.amazonaws.com";

/// Where and how requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Service host, optionally with a port (`s3.amazonaws.com`, `localhost:9000`)
    pub host: String,
    /// https when true, http otherwise
    pub secure: bool,
    /// Per-request timeout handed to the transport
    pub timeout: Duration,
    /// Whether the transport retries failed exchanges
    pub retry: bool,
    /// Force path-style addressing for every bucket
    pub path_style: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: true,
            timeout: Duration::from_secs(300),
            retry: true,
            path_style: false,
        }
    }
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

/// Resolved host and (already percent-encoded) URL path of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// `<host>/<bucket>/<key>`
    PathStyle { host: String, path: String },
    /// `<bucket>.<host>/<key>`
    VirtualHosted { host: String, path: String },
}

impl Addressing {
    pub fn host(&self) -> &str {
        match self {
            Addressing::PathStyle { host, .. } | Addressing::VirtualHosted { host, .. } => host,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Addressing::PathStyle { path, .. } | Addressing::VirtualHosted { path, .. } => path,
        }
    }

    pub fn is_virtual_hosted(&self) -> bool {
        matches!(self, Addressing::VirtualHosted { .. })
    }
}

/// Whether a bucket name can be used as a DNS label prefix.
///
/// 3 to 63 characters of `[a-z0-9.-]`, starting with a letter or digit, and no
/// dot-separated label that is empty or starts or ends with `-`.
pub fn is_dns_compatible(bucket: &str) -> bool {
    if !(3..=63).contains(&bucket.len()) {
        return false;
    }

    let bytes = bucket.as_bytes();
    if !matches!(bytes[0], b'a'..=b'z' | b'0'..=b'9') {
        return false;
    }
    if !bytes
        .iter()
        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-'))
    {
        return false;
    }

    bucket
        .split('.')
        .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}

/// Resolve the host and path for a request on `bucket`/`key`.
///
/// `key` is the raw object key; it is percent-encoded here with `/` preserved.
pub fn resolve(bucket: Option<&str>, key: Option<&str>, endpoint: &EndpointConfig) -> Addressing {
    // Keys are opaque: `/x` and `x` are different objects.
    let encoded_key = key.map(|k| uri_encode(k, false));

    match bucket {
        Some(bucket) if !endpoint.path_style && is_dns_compatible(bucket) => {
            let mut path = String::with_capacity(1 + encoded_key.as_ref().map_or(0, |k| k.len()));
            path.push('/');
            if let Some(k) = &encoded_key {
                path.push_str(k);
            }
            Addressing::VirtualHosted {
                host: format!("{}.{}", bucket, endpoint.host),
                path,
            }
        }
        Some(bucket) => {
            let encoded_bucket = uri_encode(bucket, true);
            let mut path = String::with_capacity(
                2 + encoded_bucket.len() + encoded_key.as_ref().map_or(0, |k| k.len()),
            );
            path.push('/');
            path.push_str(&encoded_bucket);
            path.push('/');
            if let Some(k) = &encoded_key {
                path.push_str(k);
            }
            Addressing::PathStyle {
                host: endpoint.host.clone(),
                path,
            }
        }
        None => Addressing::PathStyle {
            host: endpoint.host.clone(),
            path: "/".to_string(),
        },
    }
}
