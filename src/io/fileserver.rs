//! Static file server for offline content
//!
//! Serves the offline library directory over plain HTTP on the local
//! network so the browser frontend can stream audio from it. Supports a
//! single `Range: bytes=` range per request, which is what the media
//! element asks for when seeking.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept connections until the shutdown signal fires.
pub async fn serve(root: PathBuf, port: u16, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(event = "fileserver_listening", port);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, _remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(event = "fileserver_accept_failed", error = %e);
                        continue;
                    }
                };
                let root = root.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(root.clone(), req));
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(event = "fileserver_conn_error", error = %e);
                    }
                });
            }
        }
    }
    info!(event = "fileserver_stopped");
    Ok(())
}

async fn handle(
    root: PathBuf,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED));
    }
    let Some(path) = resolve(&root, req.uri().path()) else {
        return Ok(status(StatusCode::NOT_FOUND));
    };
    let range = req
        .headers()
        .get(hyper::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match read_file(&path, range.as_deref()).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(event = "fileserver_read_failed", path = %path.display(), error = %e);
            Ok(status(StatusCode::NOT_FOUND))
        }
    }
}

/// Map a request path onto the library directory, refusing anything that
/// tries to climb out of it.
fn resolve(root: &Path, raw: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    for part in relative.components() {
        match part {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(root.join(relative))
}

async fn read_file(path: &Path, range: Option<&str>) -> std::io::Result<Response<Full<Bytes>>> {
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();

    let span = match range {
        Some(header) => match parse_range(header, total) {
            Some(span) => Some(span),
            None => {
                let response = Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(hyper::header::CONTENT_RANGE, format!("bytes */{total}"))
                    .body(Full::new(Bytes::new()));
                return Ok(response.unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)));
            }
        },
        None => None,
    };

    let (start, end) = span.unwrap_or((0, total.saturating_sub(1)));
    let len = if total == 0 { 0 } else { end - start + 1 };
    let mut buf = vec![0u8; len as usize];
    if len > 0 {
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;
    }

    let mut builder = Response::builder()
        .header(hyper::header::CONTENT_TYPE, content_type(path))
        .header(hyper::header::ACCEPT_RANGES, "bytes")
        .header(hyper::header::CONTENT_LENGTH, len);
    builder = if span.is_some() {
        builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(hyper::header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
    } else {
        builder.status(StatusCode::OK)
    };
    Ok(builder
        .body(Full::new(Bytes::from(buf)))
        .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)))
}

/// Parse a single `bytes=` range. Multi-range requests are not supported
/// and read as unsatisfiable.
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') || total == 0 {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let span = if start.is_empty() {
        // suffix form: last N bytes
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (total.saturating_sub(suffix), total - 1)
    } else {
        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() { total - 1 } else { end.parse().ok()? };
        (start, end.min(total - 1))
    };
    if span.0 > span.1 || span.0 >= total {
        return None;
    }
    Some(span)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("m4b") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("json") => "application/json",
        Some("html") => "text/html",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = Path::new("/library");
        assert_eq!(resolve(root, "/books/one.mp3"), Some(PathBuf::from("/library/books/one.mp3")));
        assert_eq!(resolve(root, "/a%20b.mp3"), Some(PathBuf::from("/library/a b.mp3")));
        assert!(resolve(root, "/../etc/passwd").is_none());
        assert!(resolve(root, "/books/../../etc/passwd").is_none());
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_range("bytes=200-", 1000), Some((200, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
        // end clamped to the file size
        assert_eq!(parse_range("bytes=900-5000", 1000), Some((900, 999)));
    }

    #[test]
    fn test_parse_range_rejects_bad_specs() {
        assert!(parse_range("bytes=0-99,200-299", 1000).is_none());
        assert!(parse_range("bytes=5000-", 1000).is_none());
        assert!(parse_range("bytes=9-3", 1000).is_none());
        assert!(parse_range("bytes=-0", 1000).is_none());
        assert!(parse_range("items=0-5", 1000).is_none());
    }

    #[tokio::test]
    async fn test_read_file_serves_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, b"0123456789").unwrap();

        let response = read_file(&path, Some("bytes=2-5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[hyper::header::CONTENT_RANGE],
            "bytes 2-5/10"
        );

        let full = read_file(&path, None).await.unwrap();
        assert_eq!(full.status(), StatusCode::OK);
        assert_eq!(full.headers()[hyper::header::CONTENT_LENGTH], "10");
    }
}
