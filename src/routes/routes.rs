//! Defines every route the gateway serves.
//!
//! ## Structure
//! - **Path-keyed storage** (`/api/storage`)
//!   - `POST   /upload`           : upload one file (field `file`)
//!   - `POST   /upload-multiple`  : upload up to ten files (field `files`)
//!   - `GET    /files`            : list stored files, newest first
//!   - `DELETE /files`            : bulk delete, JSON body `{"keys": [...]}`
//!   - `GET    /files/{key}`      : file details
//!   - `DELETE /files/{key}`      : delete one file
//!   - `GET    /files/{key}/view` : stream inline
//!   - `GET    /download/{key}`   : stream as attachment
//!   - `GET    /preview/{key}`    : URL of the inline view
//!
//! - **Indexed storage** (`/api/s3`)
//!   - `GET    /files`            : list records (user_id, task_id, limit, offset)
//!   - `POST   /files`            : upload (file, owner_id, task_id) → 201
//!   - `GET    /files/{file_id}`  : stream bytes
//!   - `DELETE /files/{file_id}`  : soft delete → 204
//!
//! - **Service**: `/`, `/api/health`, `/healthz`, `/readyz`

use crate::{
    handlers::{
        health_handlers::{api_health, healthz, readyz, root_redirect},
        s3_handlers, storage_handlers,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::{AllowHeaders, CorsLayer};

/// Build the full router. Request bodies above `max_upload_bytes` are
/// rejected before they reach a store; browsers on `client_url` may call
/// every route with credentials.
pub fn routes(max_upload_bytes: usize, client_url: &str) -> Router<AppState> {
    Router::new()
        .route("/", get(root_redirect))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/health", get(api_health))
        .nest("/api/storage", storage_routes())
        .nest("/api/s3", s3_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors_layer(client_url))
}

/// CORS for the client UI. Credentials rule out wildcards, so the origin is
/// exact, methods are listed and request headers are mirrored.
fn cors_layer(client_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    match HeaderValue::from_str(client_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(err) => {
            tracing::warn!(
                "client URL {:?} is not a valid origin ({}); cross-origin requests are refused",
                client_url,
                err
            );
            layer
        }
    }
}

fn storage_routes() -> Router<AppState> {
    use storage_handlers::*;

    Router::new()
        .route("/upload", post(upload_file))
        .route("/upload-multiple", post(upload_files))
        .route("/files", get(list_files).delete(delete_files))
        .route("/files/{key}", get(get_file_info).delete(delete_file))
        .route("/files/{key}/view", get(view_file))
        .route("/download/{key}", get(download_file))
        .route("/preview/{key}", get(preview_file))
}

fn s3_routes() -> Router<AppState> {
    use s3_handlers::*;

    Router::new()
        .route("/files", get(list_files).post(upload_file))
        .route("/files/{file_id}", get(get_file).delete(delete_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        local_store::LocalFileStore, metadata_index::test_index, staged_store::StagedObjectStore,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "gateway-test-boundary";

    struct Harness {
        app: Router,
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let index = test_index().await;

        let files = LocalFileStore::new(&root);
        files.init().await.unwrap();
        let objects = StagedObjectStore::new(index.clone(), &root);
        objects.init().await.unwrap();

        let state = AppState {
            files: Arc::new(files),
            objects: Arc::new(objects),
            index,
            probe_dirs: vec![root.clone()],
            client_url: "http://client.test".into(),
        };
        Harness {
            app: routes(1024 * 1024, "http://client.test").with_state(state),
            _dir: dir,
            root,
        }
    }

    enum Part<'a> {
        File(&'a str, &'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: text/plain\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                            name, value
                        )
                        .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart(parts)))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::delete(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn root_redirects_to_client() {
        let h = harness().await;
        let response = send(&h.app, get("/")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://client.test"
        );
    }

    #[tokio::test]
    async fn client_origin_passes_cors_preflight() {
        let h = harness().await;
        let request = Request::options("/api/storage/files")
            .header(header::ORIGIN, "http://client.test")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = send(&h.app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://client.test"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap()
                .contains("DELETE")
        );
    }

    #[tokio::test]
    async fn other_origins_get_no_cors_grant() {
        let h = harness().await;
        let request = Request::get("/api/s3/files")
            .header(header::ORIGIN, "http://elsewhere.test")
            .body(Body::empty())
            .unwrap();
        let response = send(&h.app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );

        let request = Request::get("/api/s3/files")
            .header(header::ORIGIN, "http://client.test")
            .body(Body::empty())
            .unwrap();
        let response = send(&h.app, request).await;
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://client.test"
        );
    }

    #[tokio::test]
    async fn readiness_passes_on_a_healthy_node() {
        let h = harness().await;
        let response = send(&h.app, get("/readyz")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);
    }

    #[tokio::test]
    async fn storage_upload_view_download_delete() {
        let h = harness().await;

        let response = send(
            &h.app,
            multipart_request(
                "/api/storage/upload",
                &[Part::File("file", "notes.txt", b"hello gateway")],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        let key = body["file"]["key"].as_str().unwrap().to_string();
        assert!(key.ends_with("-notes.txt"));
        assert_eq!(body["file"]["originalName"], "notes.txt");
        assert_eq!(body["file"]["size"], 13);

        let response = send(&h.app, get(&format!("/api/storage/files/{}/view", key))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        assert_eq!(text(response).await, "hello gateway");

        let response = send(&h.app, get(&format!("/api/storage/download/{}", key))).await;
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"notes.txt\""));

        let response = send(&h.app, get("/api/storage/files")).await;
        let body = json(response).await;
        assert_eq!(body["count"], 1);

        let response = send(&h.app, delete(&format!("/api/storage/files/{}", key))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&h.app, get(&format!("/api/storage/files/{}", key))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"], "File not found");
    }

    #[tokio::test]
    async fn storage_rejects_traversal_keys() {
        let h = harness().await;
        std::fs::write(h.root.join("secret.txt"), b"top secret").unwrap();

        for uri in [
            "/api/storage/files/..%2Fsecret.txt/view",
            "/api/storage/download/..%252Fsecret.txt",
            "/api/storage/files/%2E%2E%2Fsecret.txt",
        ] {
            let response = send(&h.app, get(uri)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(json(response).await["error"], "Invalid key");
        }

        let response = send(&h.app, delete("/api/storage/files/..%2Fsecret.txt")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.root.join("secret.txt").exists());
    }

    #[tokio::test]
    async fn storage_upload_without_file_is_rejected() {
        let h = harness().await;
        let response = send(
            &h.app,
            multipart_request("/api/storage/upload", &[Part::Text("note", "nothing")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn storage_bulk_delete_reports_per_key() {
        let h = harness().await;
        let response = send(
            &h.app,
            multipart_request(
                "/api/storage/upload-multiple",
                &[
                    Part::File("files", "a.txt", b"a"),
                    Part::File("files", "b.txt", b"b"),
                ],
            ),
        )
        .await;
        let body = json(response).await;
        let keys: Vec<String> = body["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys.len(), 2);

        let payload = serde_json::json!({ "keys": [keys[0], keys[1], "../etc/passwd"] });
        let request = Request::delete("/api/storage/files")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let body = json(send(&h.app, request).await).await;
        assert_eq!(body["deleted"].as_array().unwrap().len(), 2);
        assert_eq!(body["errors"][0]["error"], "Invalid key");

        let request = Request::delete("/api/storage/files")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"keys": []}"#))
            .unwrap();
        let response = send(&h.app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "No keys provided");
    }

    #[tokio::test]
    async fn s3_upload_list_download_delete() {
        let h = harness().await;

        let response = send(
            &h.app,
            multipart_request(
                "/api/s3/files",
                &[
                    Part::Text("owner_id", "alice"),
                    Part::Text("task_id", "t-1"),
                    Part::File("file", "report.txt", b"quarterly"),
                ],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json(response).await;
        let file_id = created["file_id"].as_str().unwrap().to_string();
        assert_eq!(created["owner_id"], "alice");
        assert_eq!(created["task_id"], "t-1");
        assert_eq!(created["size"], 9);

        let body = json(send(&h.app, get("/api/s3/files?user_id=alice&limit=abc")).await).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let body = json(send(&h.app, get("/api/s3/files?user_id=bob")).await).await;
        assert!(body.as_array().unwrap().is_empty());

        let response = send(&h.app, get(&format!("/api/s3/files/{}", file_id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"report.txt\""
        );
        assert_eq!(text(response).await, "quarterly");

        let response = send(&h.app, delete(&format!("/api/s3/files/{}", file_id))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&h.app, get(&format!("/api/s3/files/{}", file_id))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["code"], "NOT_FOUND");

        let body = json(send(&h.app, get("/api/s3/files?user_id=alice")).await).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn s3_owner_falls_back_to_gateway_header() {
        let h = harness().await;
        let mut request = multipart_request(
            "/api/s3/files",
            &[Part::File("file", "a.txt", b"abc")],
        );
        request
            .headers_mut()
            .insert("x-user-id", "carol".parse().unwrap());
        let response = send(&h.app, request).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json(response).await["owner_id"], "carol");

        let request = Request::get("/api/s3/files")
            .header("x-user-id", "carol")
            .body(Body::empty())
            .unwrap();
        let body = json(send(&h.app, request).await).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn s3_upload_errors_carry_codes() {
        let h = harness().await;

        let response = send(
            &h.app,
            multipart_request("/api/s3/files", &[Part::Text("owner_id", "alice")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["code"], "NO_FILE");

        let response = send(
            &h.app,
            multipart_request("/api/s3/files", &[Part::File("file", "a.txt", b"abc")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["error"], "Incorrect request");
        assert_eq!(body["code"], "MISSING_OWNER_ID");
        assert_eq!(std::fs::read_dir(h.root.join("s3_temp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn s3_unknown_ids_are_not_found() {
        let h = harness().await;
        for uri in [
            "/api/s3/files/not-a-uuid".to_string(),
            format!("/api/s3/files/{}", uuid::Uuid::new_v4()),
        ] {
            let response = send(&h.app, get(&uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            let response = send(&h.app, delete(&uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let h = harness().await;
        let big = vec![b'x'; 2 * 1024 * 1024];
        let response = send(
            &h.app,
            multipart_request("/api/storage/upload", &[Part::File("file", "big.bin", &big)]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(std::fs::read_dir(h.root.join("files")).unwrap().next().is_none());
    }
}
