use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::StashConfig;
use crate::storage::{BlobBackend, BlobStore};
use crate::uploads::UPLOADS_ROUTE;

const MAX_REQUEST_HEAD: usize = 16 * 1024;
const CACHE_FOREVER: &str = "public, max-age=31536000";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run<B: BlobBackend + ?Sized + 'static>(
    config: &StashConfig,
    store: BlobStore<B>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!("Serving {} on {}", config.namespace(), config.listen_address);
    serve(listener, store).await
}

pub async fn serve<B: BlobBackend + ?Sized + 'static>(
    listener: TcpListener,
    store: BlobStore<B>,
) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!("connection from {}", peer);
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, &store).await {
                        error!("connection error for {}: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl Response {
    fn text(status: u16, body: &'static str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "text/plain; charset=utf-8".to_string())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn encode_head(&self) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if self.header("Content-Length").is_none() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");
        head
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Maps a request line onto a response.
pub async fn respond<B: BlobBackend + ?Sized>(
    store: &BlobStore<B>,
    method: &str,
    target: &str,
) -> Response {
    if method != "GET" && method != "HEAD" {
        return Response::text(405, "Method not allowed");
    }

    let path = target.split(['?', '#']).next().unwrap_or_default();
    if path == "/health" {
        return Response::text(200, "OK");
    }

    let key = match path.strip_prefix(UPLOADS_ROUTE) {
        Some(raw) if !raw.is_empty() => match urlencoding::decode(raw) {
            Ok(key) => key,
            Err(_) => {
                debug!("undecodable upload path {:?}", raw);
                return Response::text(404, "File not found");
            }
        },
        _ => return Response::text(404, "Not found"),
    };

    match store.get(&key).await {
        Ok(Some(object)) => {
            Response {
                status: 200,
                headers: vec![
                    ("Content-Type", object.metadata.mime_type),
                    ("Content-Length", object.content.len().to_string()),
                    ("Cache-Control", CACHE_FOREVER.to_string()),
                    ("ETag", format!("\"{:08x}\"", crc32fast::hash(&object.content))),
                ],
                body: object.content,
            }
        }
        Ok(None) => Response::text(404, "File not found"),
        Err(e) => {
            error!("failed to read '{}': {}", key, e);
            Response::text(500, "Storage unavailable")
        }
    }
}

async fn read_request_head(socket: &mut TcpStream) -> anyhow::Result<Option<String>> {
    let mut head = Vec::new();
    let mut buffer = [0; 1024];

    loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        head.extend_from_slice(&buffer[..n]);

        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            head.truncate(end);
            return Ok(Some(String::from_utf8_lossy(&head).into_owned()));
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Err(anyhow::anyhow!("request head exceeds {} bytes", MAX_REQUEST_HEAD));
        }
    }
}

/// Discards unread input for a moment so closing does not reset the
/// connection before the client has read the response.
async fn drain(socket: &mut TcpStream) {
    let mut buffer = [0; 1024];
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Ok(n) = socket.read(&mut buffer).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

async fn handle_connection<B: BlobBackend + ?Sized>(
    mut socket: TcpStream,
    store: &BlobStore<B>,
) -> anyhow::Result<()> {
    let head = match read_request_head(&mut socket).await {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!("rejecting request: {}", e);
            let response = Response::text(400, "Bad request");
            socket.write_all(response.encode_head().as_bytes()).await?;
            socket.write_all(&response.body).await?;
            socket.shutdown().await?;
            drain(&mut socket).await;
            return Ok(());
        }
    };

    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let response = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => {
            let response = respond(store, method, target).await;
            info!("{} {} -> {}", method, target, response.status);
            if method == "HEAD" {
                socket.write_all(response.encode_head().as_bytes()).await?;
                socket.shutdown().await?;
                return Ok(());
            }
            response
        }
        _ => {
            warn!("malformed request line {:?}", request_line);
            Response::text(400, "Bad request")
        }
    };

    socket.write_all(response.encode_head().as_bytes()).await?;
    socket.write_all(&response.body).await?;
    socket.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobFile, LocalStorage, MemoryStorage};

    async fn store_with_photo() -> BlobStore<MemoryStorage> {
        let store = BlobStore::new(MemoryStorage::new());
        store
            .set("avatar/1-abc.png", &BlobFile::new("me.png", "image/png", 1, vec![1u8, 2, 3]))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_serves_stored_file_with_cache_headers() {
        let store = store_with_photo().await;
        let response = respond(&store, "GET", "/uploads/avatar/1-abc.png").await;

        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("image/png"));
        assert_eq!(response.header("Content-Length"), Some("3"));
        assert_eq!(response.header("Cache-Control"), Some("public, max-age=31536000"));
        let etag = format!("\"{:08x}\"", crc32fast::hash(&[1, 2, 3]));
        assert_eq!(response.header("ETag"), Some(etag.as_str()));
        assert_eq!(&response.body[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let store = store_with_photo().await;
        let response = respond(&store, "GET", "/uploads/avatar/nope.png").await;

        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], b"File not found");
    }

    #[tokio::test]
    async fn test_routing_edges() {
        let store = store_with_photo().await;

        assert_eq!(respond(&store, "GET", "/health").await.status, 200);
        assert_eq!(respond(&store, "GET", "/uploads/").await.status, 404);
        assert_eq!(respond(&store, "GET", "/elsewhere").await.status, 404);
        assert_eq!(respond(&store, "DELETE", "/uploads/avatar/1-abc.png").await.status, 405);
        assert_eq!(
            respond(&store, "GET", "/uploads/avatar/1-abc.png?v=2").await.status,
            200
        );
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let store = store_with_photo().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, store));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /uploads/avatar/1-abc.png HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();

        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: image/png\r\n"));
        assert!(raw.ends_with(&[1, 2, 3]));
    }

    async fn send(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        raw
    }

    #[tokio::test]
    async fn test_head_over_tcp_has_headers_only() {
        let store = store_with_photo().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, store));

        let raw = send(addr, b"HEAD /uploads/avatar/1-abc.png HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.contains(&format!("ETag: \"{:08x}\"\r\n", crc32fast::hash(&[1, 2, 3]))));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_oversized_request_head_is_400() {
        let store = store_with_photo().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, store));

        let mut request = b"GET /uploads/avatar/1-abc.png HTTP/1.1\r\nX-Filler: ".to_vec();
        request.extend(std::iter::repeat(b'a').take(MAX_REQUEST_HEAD + 1024));
        let raw = send(addr, &request).await;
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_uploaded_path_resolves() {
        let store = BlobStore::new(MemoryStorage::new());
        for name in ["pic.we bp", "pic.p#g", "pic.a?b", "me.png"] {
            let file = BlobFile::new(name, "image/webp", 7, "RIFF");
            let path = crate::uploads::upload(&store, "my avatar", &file).await.unwrap();

            let response = respond(&store, "GET", &path).await;
            assert_eq!(response.status, 200, "{} served from {}", name, path);
            assert_eq!(&response.body[..], b"RIFF");
        }
    }

    #[tokio::test]
    async fn test_percent_encoded_keys_are_decoded() {
        let store = BlobStore::new(MemoryStorage::new());
        store
            .set("docs/a b.txt", &BlobFile::new("a b.txt", "text/plain", 1, "hi"))
            .await
            .unwrap();

        assert_eq!(respond(&store, "GET", "/uploads/docs/a%20b.txt").await.status, 200);
        assert_eq!(respond(&store, "GET", "/uploads/docs%2Fa%20b.txt").await.status, 200);
        assert_eq!(respond(&store, "GET", "/uploads/docs/%FF").await.status, 404);
    }

    #[tokio::test]
    async fn test_local_store_odd_paths_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(LocalStorage::new(dir.path(), "uploads-dev"));

        for target in ["/uploads/a//b", "/uploads/../x", "/uploads/dir/"] {
            assert_eq!(respond(&store, "GET", target).await.status, 404, "{}", target);
        }
    }
}
