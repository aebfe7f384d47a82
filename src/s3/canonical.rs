//! SigV4 canonical request construction
//!
//! Produces the canonical URI, canonical query string, canonical header block,
//! signed header list and payload hash exactly as AWS recomputes them on the
//! server side. Any divergence here turns into `SignatureDoesNotMatch`.

use crate::s3::error::Result;
use crate::s3::request::{Body, PayloadHashing};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload hash sentinel for bodies that are not hashed up front
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Percent-encode everything outside the RFC 3986 unreserved set and `keep`.
pub fn uri_encode_with(s: &str, keep: &[u8]) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ if keep.contains(&byte) => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}

/// URI encode a string (RFC 3986), optionally leaving `/` as is
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    if encode_slash {
        uri_encode_with(s, &[])
    } else {
        uri_encode_with(s, b"/")
    }
}

/// Percent-decode into UTF-8 text; invalid sequences are replaced.
pub fn uri_decode(s: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned()
}

/// How a request path was turned into its canonical URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTrace {
    pub raw: String,
    pub decoded: String,
    pub canonical: String,
}

impl std::fmt::Display for PathTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "raw={:?} decoded={:?} canonical={:?}",
            self.raw, self.decoded, self.canonical
        )
    }
}

/// Canonical URI: decode, then re-encode keeping `/` literal.
pub fn canonical_uri(raw_path: &str) -> PathTrace {
    let raw = if raw_path.is_empty() { "/" } else { raw_path };
    let decoded = uri_decode(raw);
    let canonical = uri_encode(&decoded, false);
    PathTrace {
        raw: raw.to_string(),
        decoded,
        canonical,
    }
}

/// Canonical query string: every pair decoded, re-encoded (`/` included),
/// sorted by key then value, always rendered as `key=value`.
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (
                uri_encode(&uri_decode(key), true),
                uri_encode(&uri_decode(value), true),
            ),
            None => (uri_encode(&uri_decode(pair), true), String::new()),
        })
        .collect();

    params.sort_unstable();

    let mut result = String::with_capacity(query.len() + 16);
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            result.push('&');
        }
        result.push_str(k);
        result.push('=');
        result.push_str(v);
    }
    result
}

/// Canonical header block and signed header list.
///
/// Names are lower-cased and sorted, values trimmed at both ends. Names that
/// collide after lower-casing have their values joined with `,`.
pub fn canonical_headers(headers: &BTreeMap<String, String>) -> (String, String) {
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        normalized
            .entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let mut block = String::with_capacity(normalized.len() * 64);
    let mut signed = String::with_capacity(normalized.len() * 20);
    for (name, value) in &normalized {
        block.push_str(name);
        block.push(':');
        block.push_str(value);
        block.push('\n');

        if !signed.is_empty() {
            signed.push(';');
        }
        signed.push_str(name);
    }
    (block, signed)
}

/// Hex SHA256 of a byte slice, with the empty payload short-circuited.
pub fn sha256_hex(data: &[u8]) -> String {
    if data.is_empty() {
        EMPTY_SHA256.to_string()
    } else {
        hex::encode(Sha256::digest(data))
    }
}

/// Payload hash for a request body.
///
/// In-memory bodies are hashed eagerly. Streamed bodies are either hashed
/// chunk by chunk from their file or marked `UNSIGNED-PAYLOAD`.
pub async fn payload_hash(body: &Body) -> Result<String> {
    match body {
        Body::InMemory(bytes) => Ok(sha256_hex(bytes)),
        Body::Streamed(streamed) => match streamed.hashing {
            PayloadHashing::Unsigned => Ok(UNSIGNED_PAYLOAD.to_string()),
            PayloadHashing::Incremental => {
                let mut file = tokio::fs::File::open(&streamed.path).await?;
                let mut hasher = Sha256::new();
                let mut buf = vec![0u8; HASH_CHUNK_SIZE];
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
        },
    }
}

/// Canonical form of one request. Single use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalForm {
    pub method: String,
    pub canonical_uri: String,
    pub canonical_query: String,
    pub canonical_headers: String,
    pub signed_headers: String,
    pub payload_hash: String,
    pub path_trace: PathTrace,
}

impl CanonicalForm {
    /// `METHOD\nURI\nQUERY\nHEADERS\nSIGNED\nHASH`; the header block ends
    /// with its own newline, which yields the mandated blank line.
    pub fn canonical_request(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.canonical_uri,
            self.canonical_query,
            self.canonical_headers,
            self.signed_headers,
            self.payload_hash
        )
    }
}

/// Build the canonical form from a method, a `path[?query]` string, the
/// full header set to be signed, and an already computed payload hash.
pub fn canonicalize(
    method: &str,
    path_and_query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> CanonicalForm {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    };

    let path_trace = canonical_uri(path);
    let (canonical_headers, signed_headers) = canonical_headers(headers);

    CanonicalForm {
        method: method.to_ascii_uppercase(),
        canonical_uri: path_trace.canonical.clone(),
        canonical_query: canonical_query_string(query),
        canonical_headers,
        signed_headers,
        payload_hash: payload_hash.to_string(),
        path_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::request::StreamedBody;
    use bytes::Bytes;
    use std::io::Write;

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world", true), "hello%20world");
        assert_eq!(uri_encode("hello/world", true), "hello%2Fworld");
        assert_eq!(uri_encode("hello/world", false), "hello/world");
        assert_eq!(uri_encode("test@example.com", true), "test%40example.com");
        assert_eq!(uri_encode("~a-b_c.d", true), "~a-b_c.d");
        assert_eq!(uri_encode("é", true), "%C3%A9");
        assert_eq!(uri_encode_with("a:b/c", b":"), "a:b%2Fc");
    }

    #[test]
    fn test_canonical_uri_round_trip() {
        let inputs = [
            "/",
            "/photos/2024/cat.jpg",
            "/a b/c+d/$file.txt",
            "/unicode/日本語/ü",
            "/!\"#&'()*,:;<=>?@[]^`{|}",
        ];
        for input in inputs {
            let encoded = uri_encode(input, false);
            let trace = canonical_uri(&encoded);
            assert_eq!(trace.decoded, input);
            assert_eq!(trace.canonical, encoded);
        }
    }

    #[test]
    fn test_canonical_uri_normalizes_encoding() {
        let trace = canonical_uri("/test$file.text");
        assert_eq!(trace.canonical, "/test%24file.text");
        assert_eq!(canonical_uri("/a%2a").canonical, "/a%2A");
        assert_eq!(canonical_uri("").canonical, "/");
    }

    #[test]
    fn test_canonical_query_string() {
        assert_eq!(canonical_query_string(""), "");
        assert_eq!(canonical_query_string("key=value"), "key=value");
        assert_eq!(canonical_query_string("zebra=1&alpha=2"), "alpha=2&zebra=1");
        assert_eq!(canonical_query_string("lifecycle"), "lifecycle=");
        assert_eq!(
            canonical_query_string("prefix=a/b&delimiter=/"),
            "delimiter=%2F&prefix=a%2Fb"
        );
        assert_eq!(
            canonical_query_string("marker=a%20b&max-keys=10"),
            "marker=a%20b&max-keys=10"
        );
    }

    #[test]
    fn test_canonical_query_round_trip() {
        for value in ["plain", "with space", "a/b/c", "ünï", "x=y&z", "~!*'()"] {
            let query = format!("k={}", uri_encode(value, true));
            let canonical = canonical_query_string(&query);
            let encoded = canonical.strip_prefix("k=").unwrap();
            assert_eq!(uri_decode(encoded), value);
        }
    }

    #[test]
    fn test_canonical_headers_sorted_and_trimmed() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Amz-Date".to_string(), "20130524T000000Z".to_string());
        headers.insert("Host".to_string(), "  example.com ".to_string());
        headers.insert("content-type".to_string(), "text/plain;  charset=utf-8".to_string());

        let (block, signed) = canonical_headers(&headers);
        assert_eq!(
            block,
            "content-type:text/plain;  charset=utf-8\nhost:example.com\nx-amz-date:20130524T000000Z\n"
        );
        assert_eq!(signed, "content-type;host;x-amz-date");
    }

    #[test]
    fn test_empty_sha256_constant() {
        let computed = hex::encode(Sha256::digest(b""));
        assert_eq!(EMPTY_SHA256, computed);
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
    }

    #[tokio::test]
    async fn test_payload_hash_variants() {
        let body = Body::InMemory(Bytes::from_static(b"Welcome to Amazon S3."));
        assert_eq!(
            payload_hash(&body).await.unwrap(),
            "44ce7dd67c959e0d3524ffac1771dfbba87d2b6b4b4e99e42034a8b803f8b072"
        );

        assert_eq!(
            payload_hash(&Body::InMemory(Bytes::new())).await.unwrap(),
            EMPTY_SHA256
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![b'x'; HASH_CHUNK_SIZE * 2 + 17];
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let streamed = Body::Streamed(StreamedBody::new(file.path()));
        assert_eq!(payload_hash(&streamed).await.unwrap(), sha256_hex(&data));

        let unsigned = Body::Streamed(StreamedBody::unsigned(file.path()));
        assert_eq!(payload_hash(&unsigned).await.unwrap(), UNSIGNED_PAYLOAD);
    }
}
