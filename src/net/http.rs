//! HTTP fallback
//!
//! Connections that do not open with the peer protocol marker land here.
//! The shipped handler serves static files from a root directory over
//! hyper's HTTP/1 connection driver; the WebSocket echo endpoint is not
//! provided.

use crate::error::RelayError;
use crate::net::PeekableStream;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, StatusCode, Uri};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Path reserved for the WebSocket echo endpoint
pub const WEBSOCKET_PATH: &str = "/ws";

/// Time a client gets to deliver a complete request head
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles a connection that is not speaking the peer protocol
///
/// The stream still holds every byte the client sent, including the prefix
/// that was peeked for classification.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    async fn handle(&self, stream: PeekableStream<TcpStream>, addr: SocketAddr) -> Result<()>;
}

/// A complete response body with its status and content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, "text/plain; charset=utf-8", body.into())
    }

    /// Convert into a hyper response that closes the connection
    pub fn into_hyper(self) -> hyper::Response<Body> {
        let mut response = hyper::Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// Serves files below a root directory
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    header_timeout: Duration,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            header_timeout: DEFAULT_HEADER_TIMEOUT,
        }
    }

    /// Bound the time a client may take to send its request head
    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Answer one request on `stream`, then close it
    ///
    /// A malformed request gets hyper's `400` and an incomplete head is
    /// dropped once the header timeout passes; both surface as `Err`.
    pub async fn serve<S>(&self, stream: S, addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let files = self.clone();
        let service = service_fn(move |request: Request<Body>| {
            let files = files.clone();
            let (parts, _body) = request.into_parts();
            async move { Ok::<_, Infallible>(files.answer(&parts.method, &parts.uri, addr).await.into_hyper()) }
        });

        let mut http = Http::new();
        http.http1_only(true)
            .http1_keep_alive(false)
            .http1_header_read_timeout(self.header_timeout);
        http.serve_connection(stream, service)
            .await
            .map_err(|e| RelayError::http_error(format!("Serving {} failed: {}", addr, e)))?;
        Ok(())
    }

    /// Build the response for a parsed request target
    ///
    /// Only the path of the target counts, so origin-form and absolute-form
    /// requests resolve the same file.
    pub async fn answer(&self, method: &Method, uri: &Uri, addr: SocketAddr) -> Response {
        let raw_path = uri.path();
        let path = match urlencoding::decode(raw_path) {
            Ok(path) => path.into_owned(),
            Err(e) => {
                let err = RelayError::http_error_full("Invalid percent-encoding", raw_path, e.to_string());
                warn!("Read request ERROR from {}: {}", addr, err);
                return Response::text(400, "Bad request");
            }
        };

        info!("Request from {}: {} {}", addr, method, path);
        let response = self.respond(&path).await;
        debug!("Responding {} to {} ({} bytes)", response.status, addr, response.body.len());
        response
    }

    /// Build the response for a decoded request path
    pub async fn respond(&self, path: &str) -> Response {
        let path = clean_path(path);
        if path == WEBSOCKET_PATH {
            return Response::text(501, "WebSocket endpoint not available");
        }

        let file_path = self.root.join(path.trim_start_matches('/'));
        match tokio::fs::metadata(&file_path).await {
            Ok(meta) if meta.is_dir() => {
                let index = file_path.join("index.html");
                if tokio::fs::metadata(&index).await.map(|m| m.is_file()).unwrap_or(false) {
                    return read_file(&index).await;
                }
                match list_dir(&file_path).await {
                    Ok(entries) => Response::text(200, format!("Index of {}:\n\n{}", path, entries.join("\n"))),
                    Err(e) => error_response(&e),
                }
            }
            Ok(_) => read_file(&file_path).await,
            Err(e) => error_response(&e),
        }
    }
}

#[async_trait]
impl FallbackHandler for StaticFiles {
    async fn handle(&self, stream: PeekableStream<TcpStream>, addr: SocketAddr) -> Result<()> {
        self.serve(stream, addr).await
    }
}

/// Normalize a request path: collapse `.` and `..`, never climb above `/`
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Guess a content type from a file extension
pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn read_file(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(contents) => Response::new(200, content_type(path), contents),
        Err(e) => error_response(&e),
    }
}

async fn list_dir(path: &Path) -> io::Result<Vec<String>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(entries)
}

fn error_response(err: &io::Error) -> Response {
    match err.kind() {
        io::ErrorKind::NotFound => Response::text(404, "Not found!"),
        io::ErrorKind::PermissionDenied => Response::text(403, "Forbidden"),
        _ => Response::text(500, format!("Internal server error: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("p2p-relay-{}-{}-{}", tag, std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    async fn exchange(files: &StaticFiles, request: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(request).await.unwrap();

        let mut server = PeekableStream::new(server);
        server.peek_exact(4).await.unwrap();
        let _ = files.serve(server, addr()).await;

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/a/./b/"), "/a/b");
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
    }

    #[test]
    fn test_into_hyper() {
        let response = Response::text(404, "Not found!").into_hyper();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.headers()[CONNECTION], "close");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("index.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_respond_file_dir_and_missing() {
        let root = scratch_dir("respond");
        std::fs::write(root.join("hello.txt"), "hi").unwrap();
        std::fs::create_dir_all(root.join("sub/inner")).unwrap();
        std::fs::write(root.join("sub/a.txt"), "a").unwrap();
        std::fs::create_dir_all(root.join("site")).unwrap();
        std::fs::write(root.join("site/index.html"), "<h1>home</h1>").unwrap();

        let files = StaticFiles::new(&root);

        let file = files.respond("/hello.txt").await;
        assert_eq!(file.status, 200);
        assert_eq!(&file.body[..], b"hi");

        let listing = files.respond("/sub").await;
        assert_eq!(listing.status, 200);
        assert_eq!(&listing.body[..], b"Index of /sub:\n\na.txt\ninner/");

        let index = files.respond("/site/").await;
        assert_eq!(index.status, 200);
        assert_eq!(index.content_type, "text/html; charset=utf-8");
        assert_eq!(&index.body[..], b"<h1>home</h1>");

        let missing = files.respond("/nope").await;
        assert_eq!(missing.status, 404);
        assert_eq!(&missing.body[..], b"Not found!");

        let escape = files.respond("/../hello.txt").await;
        assert_eq!(escape.status, 200);

        assert_eq!(files.respond("/ws").await.status, 501);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_serve_over_stream() {
        let root = scratch_dir("serve");
        std::fs::write(root.join("page.html"), "<p>x</p>").unwrap();
        let files = StaticFiles::new(&root);

        let response = exchange(&files, b"GET /page.html HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("<p>x</p>"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_serve_decodes_path_and_drops_query() {
        let root = scratch_dir("decode");
        std::fs::write(root.join("read me.txt"), "decoded").unwrap();
        let files = StaticFiles::new(&root);

        let response = exchange(&files, b"GET /read%20me.txt?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("decoded"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_serve_absolute_form_target() {
        let root = scratch_dir("absolute");
        std::fs::write(root.join("index.html"), "<h1>abs</h1>").unwrap();
        let files = StaticFiles::new(&root);

        let response = exchange(&files, b"GET http://localhost/index.html HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("<h1>abs</h1>"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_serve_bad_request() {
        let files = StaticFiles::new(scratch_dir("bad"));

        let response = exchange(&files, b"HELLO\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        std::fs::remove_dir_all(files.root()).unwrap();
    }

    #[tokio::test]
    async fn test_incomplete_head_times_out() {
        let files = StaticFiles::new(scratch_dir("slow")).with_header_timeout(Duration::from_millis(200));
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let served = tokio::time::timeout(Duration::from_secs(5), files.serve(server, addr())).await;
        assert!(served.is_ok(), "serve still waiting on an incomplete head");

        std::fs::remove_dir_all(files.root()).unwrap();
    }
}
