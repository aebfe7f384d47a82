//! S3 client: request dispatch, response classification and listings
//!
//! Every request goes through the same pipeline: addressing, payload hash,
//! canonical form, signature, exchange, classification. A failed exchange
//! carries its signing trace inside the returned error.

use crate::s3::addressing::{resolve, EndpointConfig};
use crate::s3::canonical::{canonical_query_string, canonical_uri, canonicalize, payload_hash};
use crate::s3::error::{Result, S3Error};
use crate::s3::request::{Body, CannedAcl, RequestSpec};
use crate::s3::response::{
    interpret_bucket_listing, interpret_error, interpret_listing, ErrorInfo, Interpreted,
};
use crate::s3::signer::{Credentials, RequestDiagnostics, S3SignerV4, DEFAULT_REGION};
use crate::s3::transport::{
    resolve_location, split_url, HttpRequest, HttpResponse, HttpTransport, HyperTransport,
    RedirectGuard, RequestBody, MAX_REDIRECTS,
};
use crate::s3::types::{BucketListing, ListParams, ListingResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use tracing::{debug, warn};

/// Explicit request target, used when a probe redirected us elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    /// Percent-encoded path with optional `?query`
    pub path_and_query: String,
}

impl Target {
    /// Target for an absolute URL, with path and query rewritten in
    /// canonical form so the URL sent matches the one signed.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, host, raw) = split_url(url)?;
        let (path, query) = raw.split_once('?').unwrap_or((raw.as_str(), ""));

        let mut path_and_query = canonical_uri(path).canonical;
        let query = canonical_query_string(query);
        if !query.is_empty() {
            path_and_query.push('?');
            path_and_query.push_str(&query);
        }
        Ok(Self {
            scheme,
            host,
            path_and_query,
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path_and_query)
    }
}

/// A signed request and the trace that produced its signature.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: HttpRequest,
    pub diagnostics: RequestDiagnostics,
}

/// Response of a successful (`2xx`) or not-found (`404`) exchange.
#[derive(Debug, Clone)]
pub struct S3Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub diagnostics: RequestDiagnostics,
}

impl S3Response {
    fn new(response: HttpResponse, diagnostics: RequestDiagnostics) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            diagnostics,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Turn this response into the error a caller should see.
    pub fn into_failure(self) -> S3Error {
        let info = interpret_error(self.status, self.content_type(), &self.body);
        self.into_error(info)
    }

    fn into_error(self, info: ErrorInfo) -> S3Error {
        S3Error::Request {
            status: self.status,
            info,
            diagnostics: Box::new(self.diagnostics),
        }
    }
}

/// SigV4-signing S3 client.
///
/// Operations run their HTTP exchanges one after another; the client holds
/// no per-request state.
pub struct S3Client<T = HyperTransport> {
    transport: T,
    signer: S3SignerV4,
    endpoint: EndpointConfig,
}

impl S3Client<HyperTransport> {
    /// Client on the hyper transport configured from `endpoint`.
    pub fn new(credentials: Credentials, endpoint: EndpointConfig) -> Result<Self> {
        let transport = HyperTransport::new(&endpoint)?;
        Ok(Self::with_transport(credentials, endpoint, transport))
    }
}

impl<T: HttpTransport> S3Client<T> {
    pub fn with_transport(credentials: Credentials, endpoint: EndpointConfig, transport: T) -> Self {
        Self {
            transport,
            signer: S3SignerV4::new(credentials),
            endpoint,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        self.signer.credentials()
    }

    /// Default target of a request: resolved addressing plus its query string.
    pub fn target(&self, spec: &RequestSpec) -> Target {
        let addressing = resolve(spec.bucket.as_deref(), spec.key.as_deref(), &self.endpoint);
        debug!(
            bucket = spec.bucket.as_deref().unwrap_or_default(),
            virtual_hosted = addressing.is_virtual_hosted(),
            host = addressing.host(),
            "resolved addressing"
        );

        let query = spec.query_string();
        let mut path_and_query = addressing.path().to_string();
        if !query.is_empty() {
            path_and_query.push('?');
            path_and_query.push_str(&query);
        }
        Target {
            scheme: self.endpoint.scheme().to_string(),
            host: addressing.host().to_string(),
            path_and_query,
        }
    }

    /// Stamp, canonicalize and sign a request at `now`.
    ///
    /// An `authorization` header already present in `spec` is sent as is and
    /// no signature is computed.
    pub async fn prepare_at(
        &self,
        spec: &RequestSpec,
        target: Option<&Target>,
        now: DateTime<Utc>,
    ) -> Result<PreparedRequest> {
        spec.validate()?;

        let target = match target {
            Some(target) => target.clone(),
            None => self.target(spec),
        };
        let url = target.url();

        let payload_hash = payload_hash(&spec.body).await?;

        let mut headers = spec.merged_headers();
        headers.insert("host".to_string(), target.host.clone());
        headers.insert(
            "x-amz-date".to_string(),
            now.format(crate::s3::signer::AMZ_DATE_FORMAT).to_string(),
        );
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());

        let body = match &spec.body {
            Body::InMemory(bytes) if bytes.is_empty() => RequestBody::Empty,
            Body::InMemory(bytes) => {
                headers
                    .entry("content-length".to_string())
                    .or_insert_with(|| bytes.len().to_string());
                RequestBody::Bytes(bytes.clone())
            }
            Body::Streamed(streamed) => {
                let len = tokio::fs::metadata(&streamed.path).await?.len();
                headers
                    .entry("content-length".to_string())
                    .or_insert_with(|| len.to_string());
                RequestBody::File {
                    path: streamed.path.clone(),
                    len,
                }
            }
        };

        let form = canonicalize(
            spec.method.as_str(),
            &target.path_and_query,
            &headers,
            &payload_hash,
        );

        let diagnostics = if headers.contains_key("authorization") {
            debug!(url = %url, "authorization supplied by caller, not signing");
            RequestDiagnostics::new(spec.method.as_str(), &url, &form, None)
        } else {
            let ctx = self.signer.sign(&form, now);
            headers.insert(
                "authorization".to_string(),
                self.signer.authorization(&ctx, &form.signed_headers),
            );
            RequestDiagnostics::new(spec.method.as_str(), &url, &form, Some(&ctx))
        };

        Ok(PreparedRequest {
            request: HttpRequest {
                method: spec.method.clone(),
                url,
                headers,
                body,
            },
            diagnostics,
        })
    }

    pub async fn prepare(&self, spec: &RequestSpec, target: Option<&Target>) -> Result<PreparedRequest> {
        self.prepare_at(spec, target, Utc::now()).await
    }

    /// Send a prepared request once and classify the response.
    ///
    /// `2xx` and `404` are returned to the caller; anything else becomes
    /// [`S3Error::Request`] carrying the decoded error and the signing trace.
    /// Redirects are not followed here; see [`dispatch`](Self::dispatch).
    pub async fn execute(&self, prepared: PreparedRequest) -> Result<S3Response> {
        let PreparedRequest {
            request,
            diagnostics,
        } = prepared;
        let response = self.exchange(&request).await?;
        classify(response, diagnostics)
    }

    async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.send(request).await?;
        debug!(method = %request.method, url = %request.url, status = %response.status, "received response");
        Ok(response)
    }

    /// Prepare, sign and send `spec`. While the transport's redirect setting
    /// is on, a `3xx` with a `Location` is re-signed against that target and
    /// sent again, at most [`MAX_REDIRECTS`] times.
    async fn send_following(&self, spec: &RequestSpec, mut target: Option<Target>) -> Result<S3Response> {
        let mut hops = 0;
        loop {
            let PreparedRequest {
                request,
                diagnostics,
            } = self.prepare(spec, target.as_ref()).await?;
            let response = self.exchange(&request).await?;

            if self.transport.follow_redirects() && hops < MAX_REDIRECTS {
                if let Some(location) = response.redirect_location() {
                    let next = resolve_location(&request.url, location)?;
                    debug!(from = %request.url, to = %next, status = %response.status, "following redirect");
                    target = Some(Target::from_url(&next)?);
                    hops += 1;
                    continue;
                }
            }
            return classify(response, diagnostics);
        }
    }

    /// Sign and send one request, following redirects by re-signing.
    ///
    /// Streamed bodies go through [`dispatch_streamed`](Self::dispatch_streamed).
    pub async fn dispatch(&self, spec: RequestSpec) -> Result<S3Response> {
        if spec.body.is_streamed() {
            return self.dispatch_streamed(spec).await;
        }
        self.send_following(&spec, None).await
    }

    /// Like [`dispatch`](Self::dispatch) for requests whose body is not needed.
    pub async fn dispatch_no_body(&self, spec: RequestSpec) -> Result<(StatusCode, HeaderMap)> {
        let response = self.dispatch(spec).await?;
        Ok((response.status, response.headers))
    }

    /// Issue a `HEAD` for the request's resource with redirect following
    /// disabled, and return the redirect location if the server sent one.
    ///
    /// The transport's redirect setting is restored whatever the outcome.
    pub async fn probe(&self, spec: &RequestSpec) -> Result<Option<String>> {
        let mut head = RequestSpec::new(Method::HEAD);
        head.bucket = spec.bucket.clone();
        head.key = spec.key.clone();
        head.query = spec.query.clone();

        let prepared = self.prepare(&head, None).await?;
        let url = prepared.request.url.clone();

        let _guard = RedirectGuard::disable(&self.transport);
        let response = self.transport.send(&prepared.request).await?;

        match response.redirect_location() {
            Some(location) => {
                let location = resolve_location(&url, location)?;
                debug!(status = %response.status, from = %url, to = %location, "probe redirected");
                Ok(Some(location))
            }
            None => {
                debug!(status = %response.status, url = %url, "probe not redirected");
                Ok(None)
            }
        }
    }

    /// Probe first, then send the real request to wherever the probe was
    /// redirected, so a non-rewindable body is written only once.
    pub async fn dispatch_streamed(&self, spec: RequestSpec) -> Result<S3Response> {
        let target = match self.probe(&spec).await? {
            Some(location) => Some(Target::from_url(&location)?),
            None => None,
        };
        self.send_following(&spec, target).await
    }

    /// One page of a bucket listing (ListObjects v1).
    pub async fn list_bucket(&self, bucket: &str, params: &ListParams) -> Result<ListingResult> {
        require_bucket(bucket)?;
        let spec = RequestSpec::new(Method::GET)
            .bucket(bucket)
            .queries(params.to_query());

        let response = self.dispatch(spec).await?;
        if response.is_not_found() {
            return Err(response.into_failure());
        }

        match interpret_listing(&response.body)? {
            Interpreted::Data(mut listing) => {
                if listing.name.is_empty() {
                    listing.name = bucket.to_string();
                }
                Ok(listing)
            }
            Interpreted::Error(info) => Err(response.into_error(info)),
        }
    }

    /// Every page of a bucket listing merged into one result.
    ///
    /// Pages are requested with the server's next marker, or the last key of
    /// the previous page, until a page is not truncated. The merged result has
    /// no `is_truncated`/`next_marker`. Any page failure fails the whole call.
    pub async fn list_bucket_all(&self, bucket: &str, params: &ListParams) -> Result<ListingResult> {
        let mut params = params.clone();
        let mut merged: Option<ListingResult> = None;
        let mut pages = 0usize;

        loop {
            let page = self.list_bucket(bucket, &params).await?;
            pages += 1;
            let truncated = page.truncated();
            let next_marker = page.continuation_marker().map(str::to_string);
            debug!(
                bucket,
                page = pages,
                keys = page.contents.len(),
                truncated,
                "fetched listing page"
            );

            match merged.as_mut() {
                None => merged = Some(page),
                Some(acc) => {
                    acc.contents.extend(page.contents);
                    acc.common_prefixes.extend(page.common_prefixes);
                }
            }

            if !truncated {
                break;
            }

            match next_marker {
                Some(marker) if params.marker.as_deref() != Some(marker.as_str()) => {
                    params.marker = Some(marker);
                }
                Some(marker) => {
                    return Err(S3Error::InvalidResponse(format!(
                        "truncated listing repeated marker {:?}",
                        marker
                    )));
                }
                None => {
                    return Err(S3Error::InvalidResponse(
                        "truncated listing page has no keys and no next marker".to_string(),
                    ));
                }
            }
        }

        let mut result = merged.unwrap_or_default();
        result.is_truncated = None;
        result.next_marker = None;
        Ok(result)
    }

    /// All buckets owned by the credentials (`GET /`).
    pub async fn list_buckets(&self) -> Result<BucketListing> {
        let response = self.dispatch(RequestSpec::new(Method::GET)).await?;
        if response.is_not_found() {
            return Err(response.into_failure());
        }
        match interpret_bucket_listing(&response.body)? {
            Interpreted::Data(listing) => Ok(listing),
            Interpreted::Error(info) => Err(response.into_error(info)),
        }
    }

    /// Create a bucket, with a location constraint outside `us-east-1`.
    pub async fn create_bucket(&self, bucket: &str, acl: Option<CannedAcl>) -> Result<()> {
        require_bucket(bucket)?;
        let mut spec = RequestSpec::new(Method::PUT).bucket(bucket);
        if let Some(acl) = acl {
            spec = spec.header("x-amz-acl", acl.as_str());
        }

        let region = self.credentials().region();
        if region != DEFAULT_REGION {
            let body = format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                region
            );
            spec = spec
                .header("content-type", "application/xml")
                .body(body.into_bytes());
        }

        let response = self.dispatch(spec).await?;
        if response.is_not_found() {
            return Err(response.into_failure());
        }
        Ok(())
    }

    /// Delete an empty bucket.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        require_bucket(bucket)?;
        let response = self
            .dispatch(RequestSpec::new(Method::DELETE).bucket(bucket))
            .await?;
        if response.is_not_found() {
            return Err(response.into_failure());
        }
        Ok(())
    }
}

/// `2xx` and `404` pass through; anything else becomes [`S3Error::Request`].
fn classify(response: HttpResponse, diagnostics: RequestDiagnostics) -> Result<S3Response> {
    let status = response.status;
    let response = S3Response::new(response, diagnostics);
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return Ok(response);
    }

    let error = response.into_failure();
    if let S3Error::Request {
        info, diagnostics, ..
    } = &error
    {
        if status == StatusCode::FORBIDDEN || !status.is_redirection() {
            warn!(
                status = %status,
                code = %info.code,
                message = %info.message,
                path = %diagnostics.path_trace,
                canonical_request = %diagnostics.canonical_request,
                string_to_sign = %diagnostics.string_to_sign,
                "request failed"
            );
        } else {
            warn!(status = %status, code = %info.code, url = %diagnostics.url, "request failed");
        }
    }
    Err(error)
}

fn require_bucket(bucket: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(S3Error::InvalidArgument(
            "bucket name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
