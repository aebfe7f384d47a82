//! HTTP transport used by the dispatcher
//!
//! - HTTP/1.1 hyper client with a tuned connection pool
//! - native-tls (OpenSSL) for TLS
//! - File bodies streamed from disk, never buffered whole
//! - Optional retry on a fixed 1,2,4,8,16,32 second schedule
//! - `3xx` responses returned as is; the dispatcher re-signs before following

use crate::s3::addressing::EndpointConfig;
use crate::s3::error::{Result, S3Error};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Delays between attempts when retry is enabled
pub const RETRY_DELAYS_SECS: [u64; 6] = [1, 2, 4, 8, 16, 32];

/// Redirect hops the dispatcher follows before giving up
pub const MAX_REDIRECTS: usize = 5;

type RequestBodyStream = UnsyncBoxBody<Bytes, std::io::Error>;

/// Body as the transport sends it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Read from disk on every attempt
    File { path: PathBuf, len: u64 },
}

/// A fully signed request ready to go on the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Lower-cased header names, including `authorization`
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Raw response with its body collected
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// `3xx` carrying a `Location` header
    pub fn redirect_location(&self) -> Option<&str> {
        if self.status.is_redirection() {
            self.location()
        } else {
            None
        }
    }
}

/// The seam between the dispatcher and the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// One exchange (with whatever retry policy the transport applies).
    /// Redirects are returned, never followed: a signed request is only
    /// valid for the host and path it was signed for.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// Whether the dispatcher should follow `3xx` + `Location` by re-signing.
    fn follow_redirects(&self) -> bool;

    fn set_follow_redirects(&self, follow: bool);
}

/// Disables redirect following until dropped, then restores the previous setting.
pub struct RedirectGuard<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
    previous: bool,
}

impl<'a, T: HttpTransport + ?Sized> RedirectGuard<'a, T> {
    pub fn disable(transport: &'a T) -> Self {
        let previous = transport.follow_redirects();
        transport.set_follow_redirects(false);
        Self {
            transport,
            previous,
        }
    }
}

impl<T: HttpTransport + ?Sized> Drop for RedirectGuard<'_, T> {
    fn drop(&mut self) {
        self.transport.set_follow_redirects(self.previous);
    }
}

/// Split an absolute URL into `(scheme, host, path_and_query)`.
pub fn split_url(url: &str) -> Result<(String, String, String)> {
    let uri: Uri = url
        .parse()
        .map_err(|e| S3Error::InvalidResponse(format!("invalid URL {:?}: {}", url, e)))?;
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| S3Error::InvalidResponse(format!("URL has no scheme: {:?}", url)))?;
    let host = uri
        .authority()
        .map(|a| a.as_str().rsplit('@').next().unwrap_or_default().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| S3Error::InvalidResponse(format!("URL has no host: {:?}", url)))?;
    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Ok((scheme.to_string(), host, path_and_query))
}

/// Resolve a `Location` value against the URL it was returned for.
pub fn resolve_location(base: &str, location: &str) -> Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }
    let (scheme, host, _) = split_url(base)?;
    if location.starts_with('/') {
        Ok(format!("{}://{}{}", scheme, host, location))
    } else {
        Ok(format!("{}://{}/{}", scheme, host, location))
    }
}

/// Whether the transport should try again after this status.
pub fn is_retryable_status(status: StatusCode) -> bool {
    !(status.is_success() || status.is_redirection() || status == StatusCode::NOT_FOUND)
}

/// Production transport on the hyper legacy client.
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, RequestBodyStream>,
    timeout: Duration,
    retry: bool,
    follow_redirects: AtomicBool,
}

impl HyperTransport {
    /// Build a transport with the endpoint's timeout and retry settings.
    ///
    /// - HTTP/1.1 only
    /// - 90s idle connection timeout, TCP_NODELAY, 90s TCP keepalive
    pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = TlsConnector::new()
            .map_err(|e| S3Error::Transport(format!("failed to build TLS connector: {}", e)))?;
        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(64)
            .set_host(false)
            .build(https);

        Ok(Self {
            client,
            timeout: endpoint.timeout,
            retry: endpoint.retry,
            follow_redirects: AtomicBool::new(true),
        })
    }

    async fn build_body(body: &RequestBody) -> Result<RequestBodyStream> {
        Ok(match body {
            RequestBody::Empty => Empty::<Bytes>::new()
                .map_err(|never| -> std::io::Error { match never {} })
                .boxed_unsync(),
            RequestBody::Bytes(bytes) => Full::new(bytes.clone())
                .map_err(|never| -> std::io::Error { match never {} })
                .boxed_unsync(),
            RequestBody::File { path, .. } => {
                let file = tokio::fs::File::open(path).await?;
                StreamBody::new(ReaderStream::new(file).map_ok(Frame::data)).boxed_unsync()
            }
        })
    }

    /// One exchange, bounded by the configured timeout.
    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        let req = builder.body(Self::build_body(&request.body).await?)?;

        let exchange = async {
            let response = self.client.request(req).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| S3Error::Transport(format!("body error: {}", e)))?
                .to_bytes();
            Ok::<_, S3Error>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| S3Error::Timeout(self.timeout))?
    }
}

/// Run `attempt` until it gives a final outcome, sleeping through `delays`
/// between tries. Transport errors, timeouts and statuses outside
/// 2xx/3xx/404 are retried; with `enabled` false the first outcome is final.
async fn retry_on_schedule<F, Fut>(
    enabled: bool,
    delays: &[u64],
    url: &str,
    mut attempt: F,
) -> Result<HttpResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpResponse>>,
{
    let mut delays = delays.iter();
    loop {
        let outcome = attempt().await;
        let retryable = match &outcome {
            Ok(response) => is_retryable_status(response.status),
            Err(S3Error::Transport(_)) | Err(S3Error::Timeout(_)) => true,
            Err(_) => false,
        };
        if !enabled || !retryable {
            return outcome;
        }
        let Some(delay) = delays.next() else {
            return outcome;
        };
        match &outcome {
            Ok(response) => warn!(status = %response.status, url, delay, "retrying request"),
            Err(e) => warn!(error = %e, url, delay, "retrying request"),
        }
        tokio::time::sleep(Duration::from_secs(*delay)).await;
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        retry_on_schedule(self.retry, &RETRY_DELAYS_SECS, &request.url, || {
            self.send_once(request)
        })
        .await
    }

    fn follow_redirects(&self) -> bool {
        self.follow_redirects.load(Ordering::SeqCst)
    }

    fn set_follow_redirects(&self, follow: bool) {
        self.follow_redirects.store(follow, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct FlagOnly(AtomicBool);

    #[async_trait]
    impl HttpTransport for FlagOnly {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse> {
            Err(S3Error::Transport("offline".to_string()))
        }

        fn follow_redirects(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn set_follow_redirects(&self, follow: bool) {
            self.0.store(follow, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_redirect_guard_restores_previous_value() {
        let transport = FlagOnly(AtomicBool::new(true));
        {
            let _guard = RedirectGuard::disable(&transport);
            assert!(!transport.follow_redirects());
        }
        assert!(transport.follow_redirects());

        transport.set_follow_redirects(false);
        {
            let _guard = RedirectGuard::disable(&transport);
        }
        assert!(!transport.follow_redirects());
    }

    #[test]
    fn test_split_url() {
        let (scheme, host, path) = split_url("https://alt-host/bucket/key?x=1").unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(host, "alt-host");
        assert_eq!(path, "/bucket/key?x=1");

        let (_, host, path) = split_url("http://localhost:9000").unwrap();
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/");

        assert!(split_url("/relative/only").is_err());
    }

    #[test]
    fn test_resolve_location() {
        assert_eq!(
            resolve_location("https://a.example/x", "https://b.example/y").unwrap(),
            "https://b.example/y"
        );
        assert_eq!(
            resolve_location("https://a.example/x", "/y?z=1").unwrap(),
            "https://a.example/y?z=1"
        );
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(!is_retryable_status(StatusCode::OK));
        assert!(!is_retryable_status(StatusCode::NO_CONTENT));
        assert!(!is_retryable_status(StatusCode::TEMPORARY_REDIRECT));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(is_retryable_status(StatusCode::FORBIDDEN));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_redirect_location_requires_3xx() {
        let mut response = HttpResponse::new(StatusCode::TEMPORARY_REDIRECT, Bytes::new());
        response
            .headers
            .insert(LOCATION, "https://alt-host/b/k".parse().unwrap());
        assert_eq!(response.redirect_location(), Some("https://alt-host/b/k"));

        response.status = StatusCode::OK;
        assert_eq!(response.redirect_location(), None);
    }

    fn status(code: u16) -> Result<HttpResponse> {
        Ok(HttpResponse::new(
            StatusCode::from_u16(code).unwrap(),
            Bytes::new(),
        ))
    }

    /// Runs the retry loop over scripted outcomes, returning the final
    /// outcome and the elapsed seconds at each attempt.
    async fn run_script(
        enabled: bool,
        script: Vec<Result<HttpResponse>>,
    ) -> (Result<HttpResponse>, Vec<u64>) {
        let start = tokio::time::Instant::now();
        let mut script = VecDeque::from(script);
        let mut attempts = Vec::new();
        let outcome = retry_on_schedule(enabled, &RETRY_DELAYS_SECS, "http://test/", || {
            attempts.push(start.elapsed().as_secs());
            let next = script
                .pop_front()
                .unwrap_or_else(|| Err(S3Error::Transport("script exhausted".to_string())));
            async move { next }
        })
        .await;
        (outcome, attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_follows_fixed_schedule() {
        let script = (0..7).map(|_| status(503)).collect();
        let (outcome, attempts) = run_script(true, script).await;

        // 1, 2, 4, 8, 16 and 32 seconds between the seven attempts
        assert_eq!(attempts, vec![0, 1, 3, 7, 15, 31, 63]);
        assert_eq!(outcome.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_first_final_outcome() {
        let script = vec![
            Err(S3Error::Transport("connection reset".to_string())),
            Err(S3Error::Timeout(Duration::from_secs(300))),
            status(500),
            status(200),
        ];
        let (outcome, attempts) = run_script(true, script).await;
        assert_eq!(attempts, vec![0, 1, 3, 7]);
        assert_eq!(outcome.unwrap().status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_and_redirects_are_not_retried() {
        for code in [404, 301, 307, 204] {
            let (outcome, attempts) = run_script(true, vec![status(code), status(200)]).await;
            assert_eq!(attempts, vec![0], "status {code} was retried");
            assert_eq!(outcome.unwrap().status.as_u16(), code);
        }

        let (outcome, attempts) = run_script(
            true,
            vec![Err(S3Error::InvalidResponse("bad".to_string())), status(200)],
        )
        .await;
        assert_eq!(attempts, vec![0]);
        assert!(matches!(outcome, Err(S3Error::InvalidResponse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled_returns_first_outcome() {
        let (outcome, attempts) = run_script(false, vec![status(503), status(200)]).await;
        assert_eq!(attempts, vec![0]);
        assert_eq!(outcome.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);

        let (outcome, attempts) = run_script(
            false,
            vec![Err(S3Error::Transport("refused".to_string())), status(200)],
        )
        .await;
        assert_eq!(attempts, vec![0]);
        assert!(matches!(outcome, Err(S3Error::Transport(_))));
    }

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// One-connection-per-request HTTP/1.1 server answering with `responses`
    /// in order and recording every raw request.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (addr, seen)
    }

    fn local_transport(retry: bool) -> HyperTransport {
        let endpoint = EndpointConfig::new("127.0.0.1")
            .with_secure(false)
            .with_retry(retry)
            .with_timeout(Duration::from_secs(10));
        HyperTransport::new(&endpoint).unwrap()
    }

    fn get(addr: &str, path: &str) -> HttpRequest {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), addr.to_string());
        headers.insert("authorization".to_string(), "AWS4-HMAC-SHA256 test".to_string());
        HttpRequest {
            method: Method::GET,
            url: format!("http://{}{}", addr, path),
            headers,
            body: RequestBody::Empty,
        }
    }

    #[tokio::test]
    async fn test_signed_redirect_is_returned_not_followed() {
        let (addr, seen) = serve(vec![
            "HTTP/1.1 307 Temporary Redirect\r\nLocation: http://127.0.0.1:9/bkt/k\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ])
        .await;
        let transport = local_transport(true);
        assert!(transport.follow_redirects());

        let response = transport.send(&get(&addr, "/bkt/k")).await.unwrap();
        assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.redirect_location(), Some("http://127.0.0.1:9/bkt/k"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("GET /bkt/k HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_on_the_wire() {
        let (addr, seen) = serve(vec![
            "HTTP/1.1 503 Slow Down\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        ])
        .await;
        let transport = local_transport(true);

        let response = transport.send(&get(&addr, "/bkt/k")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"ok");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // Same signed request both times
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_file_body_is_streamed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Welcome to Amazon S3.").unwrap();
        file.flush().unwrap();

        let (addr, seen) =
            serve(vec!["HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"]).await;
        let transport = local_transport(false);

        let mut request = get(&addr, "/bkt/upload");
        request.method = Method::PUT;
        request
            .headers
            .insert("content-length".to_string(), "21".to_string());
        request.body = RequestBody::File {
            path: file.path().to_path_buf(),
            len: 21,
        };

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("PUT /bkt/upload HTTP/1.1\r\n"));
        assert!(seen[0].ends_with("\r\n\r\nWelcome to Amazon S3."));
    }
}
