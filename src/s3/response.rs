//! Response interpretation: XML detection, `<Error>` documents and listings
//!
//! Parsing uses byte-slice tag matching over quick-xml events with an element
//! stack, so a `<Prefix>` inside `<CommonPrefixes>` is never confused with the
//! listing's own `<Prefix>`.

use crate::s3::error::{Result, S3Error};
use crate::s3::types::{BucketEntry, BucketListing, ListingResult, ObjectEntry, Owner};
use hyper::StatusCode;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

/// Machine-readable failure reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
    pub resource: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
            resource: None,
        }
    }
}

/// A decoded body: domain data, or an `<Error>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpreted<T> {
    Data(T),
    Error(ErrorInfo),
}

/// Whether a body should be treated as XML: the declared media type is XML
/// and the text starts (after whitespace) with `<`.
pub fn is_xml(content_type: Option<&str>, body: &[u8]) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let xml_type =
        media_type == "application/xml" || media_type == "text/xml" || media_type.ends_with("+xml");

    xml_type && body.trim_ascii_start().first() == Some(&b'<')
}

/// Code from a body that starts with `(<digits>)`, e.g. `(500) Internal Server Error`.
pub fn leading_numeric_code(text: &str) -> Option<String> {
    let rest = text.trim_start().strip_prefix('(')?;
    let end = rest.find(')')?;
    let digits = &rest[..end];
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

/// Build the [`ErrorInfo`] for a failed response.
///
/// XML `<Error>` documents are decoded; anything else falls back to the
/// leading numeric code heuristic, then to the HTTP status code, with the raw
/// text as the message.
pub fn interpret_error(status: StatusCode, content_type: Option<&str>, body: &[u8]) -> ErrorInfo {
    let text = String::from_utf8_lossy(body);

    if is_xml(content_type, body) {
        match parse_error_document(body) {
            Ok(Some(info)) => return info,
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "failed to parse XML error body"),
        }
    }

    let message = if text.trim().is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        text.trim().to_string()
    };
    let code = leading_numeric_code(&text).unwrap_or_else(|| status.as_u16().to_string());
    ErrorInfo::new(code, message)
}

fn parent(stack: &[Vec<u8>]) -> &[u8] {
    stack.last().map(Vec::as_slice).unwrap_or_default()
}

/// Decode an `<Error>` document. `Ok(None)` when the root is something else.
pub fn parse_error_document(xml_data: &[u8]) -> Result<Option<ErrorInfo>> {
    let mut reader = Reader::from_reader(xml_data);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_text = String::new();
    let mut info: Option<ErrorInfo> = None;

    loop {
        let ended = match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    if name != b"Error" {
                        return Ok(None);
                    }
                    info = Some(ErrorInfo::default());
                }
                stack.push(name);
                current_text.clear();
                continue;
            }
            Event::Empty(e) => {
                current_text.clear();
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    return Ok((name == b"Error").then(ErrorInfo::default));
                }
                name
            }
            Event::Text(e) => {
                current_text.push_str(&e.unescape()?);
                continue;
            }
            Event::CData(e) => {
                current_text.push_str(&String::from_utf8_lossy(&e));
                continue;
            }
            Event::End(_) => match stack.pop() {
                Some(name) => name,
                None => continue,
            },
            Event::Eof => break,
            _ => continue,
        };

        if let Some(info) = info.as_mut() {
            if parent(&stack) == b"Error" {
                match ended.as_slice() {
                    b"Code" => info.code = std::mem::take(&mut current_text),
                    b"Message" => info.message = std::mem::take(&mut current_text),
                    b"RequestId" => info.request_id = Some(std::mem::take(&mut current_text)),
                    b"Resource" => info.resource = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
            }
        }
        current_text.clear();
    }

    Ok(info)
}

/// Parse a ListObjects (v1) `ListBucketResult`, or the `<Error>` it carries.
///
/// `Contents` is always collected into a sequence, so a single entry is a
/// one-element vector.
pub fn interpret_listing(xml_data: &[u8]) -> Result<Interpreted<ListingResult>> {
    if let Some(info) = parse_error_document(xml_data)? {
        return Ok(Interpreted::Error(info));
    }

    let mut reader = Reader::from_reader(xml_data);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_text = String::with_capacity(256);
    let mut response = ListingResult::new();
    let mut current_object: Option<ObjectEntry> = None;
    let mut current_owner: Option<Owner> = None;
    let mut saw_root = false;

    loop {
        let ended = match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    if name != b"ListBucketResult" {
                        return Err(S3Error::InvalidResponse(format!(
                            "unexpected listing root element <{}>",
                            String::from_utf8_lossy(&name)
                        )));
                    }
                    saw_root = true;
                }
                match name.as_slice() {
                    b"Contents" => current_object = Some(ObjectEntry::new(String::new(), 0)),
                    b"Owner" => current_owner = Some(Owner::default()),
                    _ => {}
                }
                stack.push(name);
                current_text.clear();
                continue;
            }
            Event::Empty(e) => {
                current_text.clear();
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    saw_root = name == b"ListBucketResult";
                    break;
                }
                name
            }
            Event::Text(e) => {
                current_text.push_str(&e.unescape()?);
                continue;
            }
            Event::CData(e) => {
                current_text.push_str(&String::from_utf8_lossy(&e));
                continue;
            }
            Event::End(_) => match stack.pop() {
                Some(name) => name,
                None => continue,
            },
            Event::Eof => break,
            _ => continue,
        };

        match (parent(&stack), ended.as_slice()) {
            (b"Contents", b"Key") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.key = std::mem::take(&mut current_text);
                }
            }
            (b"Contents", b"Size") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.size = current_text.trim().parse().map_err(|_| {
                        S3Error::InvalidResponse(format!(
                            "invalid object size {:?} for key {:?}",
                            current_text, obj.key
                        ))
                    })?;
                }
            }
            (b"Contents", b"LastModified") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.last_modified = Some(std::mem::take(&mut current_text));
                }
            }
            (b"Contents", b"ETag") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.etag = Some(current_text.trim().trim_matches('"').to_string());
                }
            }
            (b"Contents", b"StorageClass") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.storage_class = Some(std::mem::take(&mut current_text));
                }
            }
            (b"Owner", b"ID") => {
                if let Some(owner) = current_owner.as_mut() {
                    owner.id = std::mem::take(&mut current_text);
                }
            }
            (b"Owner", b"DisplayName") => {
                if let Some(owner) = current_owner.as_mut() {
                    owner.display_name = Some(std::mem::take(&mut current_text));
                }
            }
            (b"Contents", b"Owner") => {
                if let Some(obj) = current_object.as_mut() {
                    obj.owner = current_owner.take();
                }
            }
            (b"ListBucketResult", b"Contents") => {
                if let Some(obj) = current_object.take() {
                    response.contents.push(obj);
                }
            }
            (b"CommonPrefixes", b"Prefix") => {
                response
                    .common_prefixes
                    .push(std::mem::take(&mut current_text));
            }
            (b"ListBucketResult", b"Name") => {
                response.name = std::mem::take(&mut current_text);
            }
            (b"ListBucketResult", b"Prefix") => {
                response.prefix = Some(std::mem::take(&mut current_text));
            }
            (b"ListBucketResult", b"Marker") => {
                response.marker = Some(std::mem::take(&mut current_text));
            }
            (b"ListBucketResult", b"NextMarker") => {
                response.next_marker =
                    Some(std::mem::take(&mut current_text)).filter(|m| !m.is_empty());
            }
            (b"ListBucketResult", b"Delimiter") => {
                response.delimiter = Some(std::mem::take(&mut current_text));
            }
            (b"ListBucketResult", b"MaxKeys") => {
                response.max_keys = current_text.trim().parse().ok();
            }
            (b"ListBucketResult", b"IsTruncated") => {
                response.is_truncated = Some(current_text.trim().eq_ignore_ascii_case("true"));
            }
            _ => {}
        }

        current_text.clear();
    }

    if !saw_root {
        return Err(S3Error::InvalidResponse(
            "listing response has no ListBucketResult element".to_string(),
        ));
    }

    Ok(Interpreted::Data(response))
}

/// Parse a `ListAllMyBucketsResult`, or the `<Error>` it carries.
pub fn interpret_bucket_listing(xml_data: &[u8]) -> Result<Interpreted<BucketListing>> {
    if let Some(info) = parse_error_document(xml_data)? {
        return Ok(Interpreted::Error(info));
    }

    let mut reader = Reader::from_reader(xml_data);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_text = String::new();
    let mut listing = BucketListing::default();
    let mut current_bucket: Option<BucketEntry> = None;
    let mut saw_root = false;

    loop {
        let ended = match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    saw_root = name == b"ListAllMyBucketsResult";
                }
                match name.as_slice() {
                    b"Owner" => listing.owner = Some(Owner::default()),
                    b"Bucket" => {
                        current_bucket = Some(BucketEntry {
                            name: String::new(),
                            creation_date: None,
                        })
                    }
                    _ => {}
                }
                stack.push(name);
                current_text.clear();
                continue;
            }
            Event::Empty(e) => {
                current_text.clear();
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    saw_root = name == b"ListAllMyBucketsResult";
                    break;
                }
                name
            }
            Event::Text(e) => {
                current_text.push_str(&e.unescape()?);
                continue;
            }
            Event::End(_) => match stack.pop() {
                Some(name) => name,
                None => continue,
            },
            Event::Eof => break,
            _ => continue,
        };

        match (parent(&stack), ended.as_slice()) {
            (b"Owner", b"ID") => {
                if let Some(owner) = listing.owner.as_mut() {
                    owner.id = std::mem::take(&mut current_text);
                }
            }
            (b"Owner", b"DisplayName") => {
                if let Some(owner) = listing.owner.as_mut() {
                    owner.display_name = Some(std::mem::take(&mut current_text));
                }
            }
            (b"Bucket", b"Name") => {
                if let Some(bucket) = current_bucket.as_mut() {
                    bucket.name = std::mem::take(&mut current_text);
                }
            }
            (b"Bucket", b"CreationDate") => {
                if let Some(bucket) = current_bucket.as_mut() {
                    bucket.creation_date = Some(std::mem::take(&mut current_text));
                }
            }
            (b"Buckets", b"Bucket") => {
                if let Some(bucket) = current_bucket.take() {
                    listing.buckets.push(bucket);
                }
            }
            _ => {}
        }
        current_text.clear();
    }

    if !saw_root {
        return Err(S3Error::InvalidResponse(
            "service listing has no ListAllMyBucketsResult element".to_string(),
        ));
    }

    Ok(Interpreted::Data(listing))
}
