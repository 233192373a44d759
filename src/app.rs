//! 路由装配：GET 浏览/下载，POST 上传，附带追踪与安全头。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::get;
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::storage::Storage;
use crate::{files, http, upload};

/// 构建应用路由；`upload_max_size` 为 0 时不限制请求体大小。
pub fn build_router(storage: Arc<Storage>, upload_max_size: u64) -> Router {
    let body_limit = if upload_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(upload_max_size).unwrap_or(usize::MAX))
    };

    Router::new()
        .route("/", get(files::serve_entry).post(upload::upload_files))
        .route(
            "/{*path}",
            get(files::serve_entry).post(upload::upload_files),
        )
        .layer(body_limit)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(http::request_span)
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION};
    use axum::http::{Request, Response, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::DEFAULT_UPLOAD_MAX_SIZE;
    use crate::error::NOT_FOUND_HTML;
    use crate::upload::test_support::{Part, content_type, multipart_body};

    struct TestServer {
        _temp: TempDir,
        root: std::path::PathBuf,
        router: Router,
    }

    fn make_server(prefix: &str) -> TestServer {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("docs")).expect("create docs");
        std::fs::write(temp.path().join("outside.txt"), b"secret").expect("write outside");
        let root = std::fs::canonicalize(root).expect("canonicalize");
        let storage = Arc::new(Storage::new(root.clone(), prefix));
        TestServer {
            _temp: temp,
            root,
            router: build_router(storage, DEFAULT_UPLOAD_MAX_SIZE),
        }
    }

    async fn send(server: &TestServer, request: Request<Body>) -> Response<Body> {
        server
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    async fn get(server: &TestServer, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        send(server, request).await
    }

    async fn post_files(server: &TestServer, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
        let body = multipart_body(parts);
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, content_type())
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .expect("request");
        send(server, request).await
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    async fn body_text(response: Response<Body>) -> String {
        String::from_utf8(body_bytes(response).await).expect("utf-8 body")
    }

    fn header<'a>(
        response: &'a Response<Body>,
        name: impl axum::http::header::AsHeaderName,
    ) -> &'a str {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn upload_then_list_and_download() {
        let server = make_server("/files/");

        let response =
            post_files(&server, "/files/docs/", &[Part::file("report.txt", b"hello")]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header(&response, LOCATION), "/files/docs/?uploaded=1");

        let listing = get(&server, "/files/docs/").await;
        assert_eq!(listing.status(), StatusCode::OK);
        assert!(header(&listing, CONTENT_TYPE).starts_with("text/html"));
        let html = body_text(listing).await;
        assert!(html.contains(r#"href="/files/docs/report.txt""#));

        let download = get(&server, "/files/docs/report.txt").await;
        assert_eq!(download.status(), StatusCode::OK);
        assert_eq!(body_bytes(download).await, b"hello");
    }

    #[tokio::test]
    async fn upload_multiple_files_reports_count() {
        let server = make_server("/");

        let response = post_files(
            &server,
            "/",
            &[Part::file("a.txt", b"1"), Part::file("b.txt", b"2")],
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header(&response, LOCATION), "/?uploaded=2");
        assert_eq!(std::fs::read(server.root.join("a.txt")).expect("read"), b"1");
        assert_eq!(std::fs::read(server.root.join("b.txt")).expect("read"), b"2");

        let listing = body_text(get(&server, "/?uploaded=2").await).await;
        assert!(listing.contains(r#"<span style="font-weight: bold">2</span> files have been uploaded."#));
    }

    #[tokio::test]
    async fn upload_accepts_long_filename() {
        let server = make_server("/");
        let name = format!("{}.txt", "a".repeat(240));

        let response = post_files(&server, "/", &[Part::file(&name, b"long")]).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header(&response, LOCATION), "/?uploaded=1");
        assert_eq!(std::fs::read(server.root.join(&name)).expect("read"), b"long");
    }

    #[tokio::test]
    async fn query_noise_does_not_change_get_result() {
        let server = make_server("/");
        std::fs::write(server.root.join("a.txt"), b"abc").expect("write");

        let download = get(&server, "/a.txt?uploaded=1&uploaded=2").await;
        assert_eq!(download.status(), StatusCode::OK);
        assert_eq!(body_bytes(download).await, b"abc");

        let listing = get(&server, "/?uploaded=2&uploaded=oops&x").await;
        assert_eq!(listing.status(), StatusCode::OK);
        assert!(body_text(listing).await.contains(
            r#"<span style="font-weight: bold">2</span> files have been uploaded."#
        ));

        let missing = get(&server, "/missing.txt?uploaded=1&uploaded=2").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_upload_listing_has_no_notice() {
        let server = make_server("/");
        let listing = body_text(get(&server, "/docs/?uploaded=0").await).await;
        assert!(!listing.contains("files have been uploaded"));
    }

    #[tokio::test]
    async fn upload_redirect_appends_slash_to_directory() {
        let server = make_server("/files");
        let response = post_files(&server, "/files/docs", &[Part::file("x.txt", b"x")]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header(&response, LOCATION), "/files/docs/?uploaded=1");
    }

    #[tokio::test]
    async fn upload_without_content_length_ingests_nothing() {
        let server = make_server("/");
        let request = Request::builder()
            .method("POST")
            .uri("/docs/")
            .header(CONTENT_TYPE, content_type())
            .body(Body::empty())
            .expect("request");

        let response = send(&server, request).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header(&response, LOCATION), "/docs/?uploaded=0");
    }

    #[tokio::test]
    async fn malformed_upload_is_server_error() {
        let server = make_server("/");
        let body = b"this is not multipart".to_vec();
        let request = Request::builder()
            .method("POST")
            .uri("/docs/")
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .expect("request");

        let response = send(&server, request).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn upload_to_missing_directory_is_not_found() {
        let server = make_server("/");
        let response = post_files(&server, "/nope/", &[Part::file("a.txt", b"1")]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!server.root.join("nope").exists());
    }

    #[tokio::test]
    async fn upload_traversal_filename_stays_in_directory() {
        let server = make_server("/");
        let response =
            post_files(&server, "/docs/", &[Part::file("../../escape.txt", b"x")]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(server.root.join("docs/escape.txt").is_file());
        assert!(!server.root.join("escape.txt").exists());
        assert!(!server._temp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn hidden_files_are_not_listed() {
        let server = make_server("/");
        std::fs::write(server.root.join(".secret"), b"x").expect("write");
        std::fs::write(server.root.join("visible.txt"), b"x").expect("write");

        let html = body_text(get(&server, "/").await).await;

        assert!(!html.contains(".secret"));
        assert!(html.contains("visible.txt"));
        assert!(html.contains(r#"href="/docs/""#));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let server = make_server("/files/");
        let response = get(&server, "/files/does/not/exist").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(header(&response, CONTENT_TYPE).starts_with("text/html"));
        assert_eq!(body_text(response).await, NOT_FOUND_HTML);
    }

    #[tokio::test]
    async fn content_type_follows_extension() {
        let server = make_server("/");
        std::fs::write(server.root.join("pixel.png"), [0x89, b'P', b'N', b'G']).expect("write");
        std::fs::write(server.root.join("notes.txt"), b"text").expect("write");
        std::fs::write(server.root.join("blob.unknownext"), b"?").expect("write");

        let png = get(&server, "/pixel.png").await;
        assert!(header(&png, CONTENT_TYPE).starts_with("image/"));
        let txt = get(&server, "/notes.txt").await;
        assert!(header(&txt, CONTENT_TYPE).starts_with("text/"));
        assert_eq!(header(&txt, CONTENT_LENGTH), "4");
        let blob = get(&server, "/blob.unknownext").await;
        assert_eq!(header(&blob, CONTENT_TYPE), "application/octet-stream");
    }

    #[tokio::test]
    async fn traversal_requests_serve_root_listing() {
        let server = make_server("/");
        for uri in ["/../outside.txt", "/%2e%2e/outside.txt", "/docs/%2e%2e/%2e%2e/"] {
            let response = get(&server, uri).await;
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let body = body_text(response).await;
            assert!(!body.contains("secret"), "{uri}");
            assert!(body.contains("<h1>Path /</h1>"), "{uri}");
        }
    }

    #[tokio::test]
    async fn prefix_root_without_trailing_slash_lists_root() {
        let server = make_server("/files/");
        let response = get(&server, "/files").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains(r#"action="/files/""#));
    }

    #[tokio::test]
    async fn conditional_get_returns_not_modified() {
        let server = make_server("/");
        std::fs::write(server.root.join("cached.txt"), b"data").expect("write");

        let first = get(&server, "/cached.txt").await;
        let etag = header(&first, ETAG).to_string();
        assert!(!etag.is_empty());

        let request = Request::builder()
            .uri("/cached.txt")
            .header(IF_NONE_MATCH, etag)
            .body(Body::empty())
            .expect("request");
        let second = send(&server, request).await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert!(body_bytes(second).await.is_empty());
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let server = make_server("/");
        let response = get(&server, "/").await;
        assert_eq!(header(&response, "x-content-type-options"), "nosniff");
        assert_eq!(header(&response, "x-frame-options"), "DENY");
    }

    #[tokio::test]
    async fn other_methods_are_rejected() {
        let server = make_server("/");
        let request = Request::builder()
            .method("DELETE")
            .uri("/docs/")
            .body(Body::empty())
            .expect("request");
        let response = send(&server, request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(server.root.join("docs").is_dir());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(temp.path()).expect("canonicalize");
        let router = build_router(Arc::new(Storage::new(root.clone(), "/")), 16);
        let body = multipart_body(&[Part::file("big.bin", &[7u8; 256])]);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, content_type())
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .expect("request");

        let response = router.oneshot(request).await.expect("router is infallible");

        assert!(response.status().is_server_error() || response.status().is_client_error());
        assert!(!root.join("big.bin").exists());
    }
}
