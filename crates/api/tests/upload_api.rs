//! Integration tests for the session upload endpoint.

mod common;

use axum::http::StatusCode;
use common::{body_json, frame_archive, post_upload, Part};
use serde_json::json;

fn metadata(user: &str, session: &str) -> String {
    json!({
        "userId": user,
        "sessionId": session,
        "timestamp": 1_714_564_800,
        "sessionDuration": 2.5,
        "frameCount": 5,
        "framerate": 10,
        "userData": {
            "device": "iPhone15,2 (iPhone)",
            "country": "EN-GB",
            "platform": "ios",
            "appVersion": "1.4.2"
        }
    })
    .to_string()
}

fn scratch_is_empty(root: &std::path::Path) -> bool {
    match std::fs::read_dir(root.join("tmp")) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Test: a complete upload produces a video, a record, and a summary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_records_session() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let archive = frame_archive(5);
    let meta = metadata("user-42", "sess-1");
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "screenshots.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["sessionId"], "sess-1");
    assert_eq!(json["videoFile"], "session_sess-1.mp4");
    assert_eq!(json["sessionDuration"], 2.5);
    assert_eq!(json["frameCount"], 5);
    assert_eq!(json["actualImageCount"], 5);
    assert_eq!(json["videoSize"], "1.00 KB");
    assert_eq!(json["effectiveFPS"], 2.0);
    assert!(json["originalSize"].as_str().unwrap().ends_with(" B"));
    assert!(json["compressionRatio"].as_str().unwrap().ends_with('%'));

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let partition = dir.path().join("videos").join("user-42").join(&date);
    assert!(partition.join("session_sess-1.mp4").is_file());

    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(partition.join("session_sess-1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["sessionStartTime"], 1_714_564_797.5);
    assert_eq!(record["userData"]["deviceCommercialName"], "iPhone 14 Pro");
    assert_eq!(record["userData"]["languageCode"], "EN");
    assert_eq!(record["platform"], "ios");
    assert_eq!(record["appVersion"], "1.4.2");
    assert_eq!(record["geo"]["countryCode"], "XX");

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("users/user-42/latest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["totalSessions"], 1);
    assert_eq!(summary["totalFrames"], 5);
    assert_eq!(summary["lastSessionId"], "sess-1");

    assert!(scratch_is_empty(dir.path()));
}

// ---------------------------------------------------------------------------
// Test: forwarded client address reaches the geo record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forwarded_for_header_sets_client_ip() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let archive = frame_archive(2);
    let meta = json!({"userId": "u", "sessionId": "s"}).to_string();
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.1"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let record_path = dir
        .path()
        .join("videos/u")
        .join(date)
        .join("session_s.json");
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(record_path).unwrap()).unwrap();
    assert_eq!(record["geo"]["ip"], "203.0.113.7");
}

// ---------------------------------------------------------------------------
// Test: missing parts are rejected with 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_metadata_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let archive = frame_archive(3);
    let response = post_upload(
        app,
        &[Part::File {
            name: "screenshots",
            filename: "a.zip",
            data: &archive,
        }],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("metadata"));
}

#[tokio::test]
async fn missing_archive_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let meta = metadata("u", "s");
    let response = post_upload(
        app,
        &[Part::Text {
            name: "metadata",
            value: &meta,
        }],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("screenshots"));
}

#[tokio::test]
async fn metadata_without_user_id_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let archive = frame_archive(3);
    let meta = json!({"sessionId": "s"}).to_string();
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("userId"));
}

// ---------------------------------------------------------------------------
// Test: an archive with no images is a client error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn archive_without_frames_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let archive = frame_archive(0);
    let meta = metadata("u", "s");
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "No images found in archive");
    assert!(!dir.path().join("videos").exists());
    assert!(scratch_is_empty(dir.path()));
}

// ---------------------------------------------------------------------------
// Test: encoder failure is a 500 and leaves no partial output
// ---------------------------------------------------------------------------

#[tokio::test]
async fn encoder_failure_returns_500() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::failing_encoder());

    let archive = frame_archive(4);
    let meta = metadata("u", "s");
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Video conversion failed");
    assert!(!dir.path().join("videos").exists());
    assert!(!dir.path().join("users").exists());
    assert!(scratch_is_empty(dir.path()));
}

// ---------------------------------------------------------------------------
// Test: bodies above the upload limit are refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_upload_returns_413() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(dir.path(), common::working_encoder());

    let huge = vec![0u8; 2 * 1024 * 1024];
    let meta = metadata("u", "s");
    let response = post_upload(
        app,
        &[
            Part::Text {
                name: "metadata",
                value: &meta,
            },
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &huge,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// ---------------------------------------------------------------------------
// Test: a request that outlives the timeout gets a JSON 408
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_timeout_returns_json_408() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.request_timeout_secs = 1;
    let encoder = std::sync::Arc::new(common::SlowEncoder {
        delay: std::time::Duration::from_secs(3),
    });
    let app = common::build_test_app_with_config(config, encoder);

    let archive = frame_archive(2);
    let meta = metadata("u", "s");
    let response = post_upload(
        app,
        &[
            Part::File {
                name: "screenshots",
                filename: "a.zip",
                data: &archive,
            },
            Part::Text {
                name: "metadata",
                value: &meta,
            },
        ],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let content_type = response.headers().get("content-type").unwrap();
    assert_eq!(content_type, "application/json");
    let json = body_json(response).await;
    assert_eq!(json["code"], "REQUEST_TIMEOUT");
    assert_eq!(json["error"], "Request timed out");
    assert!(!dir.path().join("videos").exists());
    assert!(scratch_is_empty(dir.path()));
}
