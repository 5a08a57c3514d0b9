mod common;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::*;
use serde_json::json;

fn jpeg_upload_body() -> Vec<u8> {
    MultipartBuilder::new()
        .file("media", "photo.jpg", "image/jpeg", &[0xFFu8; 5 * 1024])
        .text("projectId", "p1")
        .text("userEmail", "ana@example.com")
        .text("chapter", "Famille")
        .finish()
}

#[tokio::test]
async fn options_preflight_returns_ok_with_cors() {
    let env = test_env();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/upload")
        .header(header::ORIGIN, "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = call(&env.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn bare_options_still_returns_ok() {
    let env = test_env();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/upload")
        .body(Body::empty())
        .unwrap();
    let response = call(&env.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsupported_method_gets_structured_405() {
    let env = test_env();
    let request = Request::builder()
        .method("GET")
        .uri("/upload")
        .body(Body::empty())
        .unwrap();
    let response = call(&env.router, request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Method not allowed");
}

#[tokio::test]
async fn missing_media_part_is_400_with_no_side_effects() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .text("projectId", "p1")
        .text("userEmail", "ana@example.com")
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "No file provided");
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.store.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_project_id_is_400() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .file("media", "photo.jpg", "image/jpeg", b"data")
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Missing projectId");
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_file_is_a_distinct_400_before_any_network_call() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .file("media", "photo.jpg", "image/jpeg", &[])
        .text("projectId", "p1")
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Uploaded file is empty");
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn direct_upload_happy_path() {
    let env = test_env();
    let response = call(&env.router, post_multipart("/upload", jpeg_upload_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["success"], true);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert_eq!(file["fileType"], "image");
    assert!(!file["cloudinaryUrl"].as_str().unwrap().is_empty());
    assert_eq!(file["originalName"], "photo.jpg");
    assert_eq!(file["fileSize"], 5 * 1024);
    assert_eq!(file["supabaseId"], "rec-1");
    assert_eq!(file["width"], 1920);

    // Folder namespacing flows through to the hosted URL.
    assert!(file["cloudinaryUrl"]
        .as_str()
        .unwrap()
        .contains("montage/p1/Famille"));

    let rows = env.store.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].project_id, "p1");
    assert_eq!(rows[0].chapter.as_deref(), Some("Famille"));
    assert_eq!(rows[0].resolution.as_deref(), Some("1920x1080"));
}

#[tokio::test]
async fn store_failure_still_returns_200_with_null_record_id() {
    let env = test_env_failing_store();
    let response = call(&env.router, post_multipart("/upload", jpeg_upload_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let file = &body["files"][0];
    assert!(!file["cloudinaryUrl"].as_str().unwrap().is_empty());
    assert!(file["supabaseId"].is_null());
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.store.inserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn media_host_failure_is_fatal_500() {
    let env = test_env_failing_host();
    let response = call(&env.router, post_multipart("/upload", jpeg_upload_body())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    assert_eq!(env.store.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_chapter_style_is_dropped_not_fatal() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .file("media", "photo.jpg", "image/jpeg", b"data")
        .text("projectId", "p1")
        .text("userEmail", "ana@example.com")
        .text("chapterStyle", "{not valid json")
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rows = env.store.rows.lock().unwrap();
    assert!(rows[0].chapter_style.is_none());
}

#[tokio::test]
async fn well_formed_chapter_style_is_persisted() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .file("media", "photo.jpg", "image/jpeg", b"data")
        .text("projectId", "p1")
        .text("userEmail", "ana@example.com")
        .text("chapterStyle", r#"{"font":"Inter","fontSize":"2xl"}"#)
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rows = env.store.rows.lock().unwrap();
    let style = rows[0].chapter_style.as_ref().unwrap();
    assert_eq!(style["font"], "Inter");
}

#[tokio::test]
async fn base64_encoded_body_is_accepted() {
    let env = test_env();
    let encoded = BASE64.encode(jpeg_upload_body());
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(encoded))
        .unwrap();
    let response = call(&env.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["files"][0]["fileSize"], 5 * 1024);
}

#[tokio::test]
async fn extra_file_parts_are_discarded() {
    let env = test_env();
    let body = MultipartBuilder::new()
        .file("bonus", "sneaky.bin", "application/octet-stream", &[0u8; 64])
        .file("media", "photo.jpg", "image/jpeg", b"real-data")
        .file("media", "second.jpg", "image/jpeg", b"ignored")
        .text("projectId", "p1")
        .finish();
    let response = call(&env.router, post_multipart("/upload", body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["originalName"], "photo.jpg");
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 1);
}

// =======================================================================
// Chunked phases
// =======================================================================

async fn init_session(env: &TestEnv, total_chunks: u32) -> String {
    let response = call(
        &env.router,
        post_json(
            "/upload/init",
            json!({
                "fileName": "movie.mp4",
                "fileSize": 30,
                "fileType": "video/mp4",
                "totalChunks": total_chunks,
                "projectId": "p1",
                "userEmail": "ana@example.com",
                "chapter": "Famille"
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["uploadId"].as_str().unwrap().to_string()
}

fn chunk_body(upload_id: &str, index: u32, total: u32, data: &[u8]) -> Vec<u8> {
    MultipartBuilder::new()
        .file("chunk", "movie.mp4", "application/octet-stream", data)
        .text("uploadId", upload_id)
        .text("chunkIndex", &index.to_string())
        .text("totalChunks", &total.to_string())
        .text("fileName", "movie.mp4")
        .finish()
}

#[tokio::test]
async fn chunked_flow_yields_direct_upload_shape() {
    let env = test_env();
    let upload_id = init_session(&env, 3).await;

    for index in 0..3u32 {
        let response = call(
            &env.router,
            post_multipart("/upload/chunk", chunk_body(&upload_id, index, 3, &[index as u8; 10])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["received"], index as u64 + 1);
    }

    let response = call(
        &env.router,
        post_json(
            "/upload/finalize",
            json!({ "uploadId": upload_id, "fileName": "movie.mp4" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["success"], true);
    let file = &body["files"][0];
    assert_eq!(file["fileType"], "video");
    assert_eq!(file["originalName"], "movie.mp4");
    assert_eq!(file["fileSize"], 30);
    assert_eq!(file["supabaseId"], "rec-1");
    assert!(!file["cloudinaryUrl"].as_str().unwrap().is_empty());

    // Metadata carried from init reaches the persisted row.
    let rows = env.store.rows.lock().unwrap();
    assert_eq!(rows[0].project_id, "p1");
    assert_eq!(rows[0].chapter.as_deref(), Some("Famille"));
}

#[tokio::test]
async fn finalize_with_missing_chunks_is_rejected() {
    let env = test_env();
    let upload_id = init_session(&env, 3).await;

    for index in 0..2u32 {
        call(
            &env.router,
            post_multipart("/upload/chunk", chunk_body(&upload_id, index, 3, b"aaaaaaaaaa")),
        )
        .await;
    }

    let response = call(
        &env.router,
        post_json(
            "/upload/finalize",
            json!({ "uploadId": upload_id, "fileName": "movie.mp4" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Expected 3 chunks, received 2"));
    assert_eq!(env.host.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_chunk_index_is_tolerated() {
    let env = test_env();
    let upload_id = init_session(&env, 2).await;

    call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body(&upload_id, 0, 2, &[1u8; 10])),
    )
    .await;
    // Re-send index 0 with a different payload, then complete.
    call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body(&upload_id, 0, 2, &[2u8; 12])),
    )
    .await;
    call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body(&upload_id, 1, 2, &[3u8; 5])),
    )
    .await;

    let response = call(
        &env.router,
        post_json("/upload/finalize", json!({ "uploadId": upload_id })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // The overwritten payload wins: 12 + 5 bytes.
    assert_eq!(body["files"][0]["fileSize"], 17);
}

#[tokio::test]
async fn chunk_for_unknown_session_is_404() {
    let env = test_env();
    let response = call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body("no-such-session", 0, 1, b"data")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chunk_index_out_of_range_is_400() {
    let env = test_env();
    let upload_id = init_session(&env, 3).await;
    let response = call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body(&upload_id, 5, 3, b"data")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chunk_with_mismatched_total_is_400() {
    let env = test_env();
    let upload_id = init_session(&env, 3).await;
    let response = call(
        &env.router,
        post_multipart("/upload/chunk", chunk_body(&upload_id, 0, 7, b"data")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn init_rejects_zero_chunks() {
    let env = test_env();
    let response = call(
        &env.router,
        post_json(
            "/upload/init",
            json!({ "fileName": "movie.mp4", "totalChunks": 0 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn init_issues_fresh_session_ids() {
    let env = test_env();
    let first = init_session(&env, 2).await;
    let second = init_session(&env, 2).await;
    assert_ne!(first, second);
}
