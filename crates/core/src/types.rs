//! Shared data model for session uploads and the records they produce.
//!
//! [`UploadMetadata`] is the boundary type: the untrusted JSON attached to an
//! archive upload is deserialized with defaults into it exactly once, so the
//! rest of the pipeline works with concrete values instead of dynamic lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// All timestamps in records are UTC.
pub type Timestamp = DateTime<Utc>;

/// Free-form key/value payload supplied by the capture client.
pub type JsonMap = Map<String, Value>;

/// Nominal capture rate assumed when the client does not send one.
pub const DEFAULT_FRAMERATE: u32 = 10;

// ---------------------------------------------------------------------------
// Upload metadata
// ---------------------------------------------------------------------------

/// Wire shape of the `metadata` multipart part. Every field is optional here;
/// defaults are applied in [`UploadMetadata::parse`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUploadMetadata {
    user_id: Option<Value>,
    session_id: Option<Value>,
    timestamp: Option<f64>,
    session_duration: Option<f64>,
    frame_count: Option<u64>,
    framerate: Option<u32>,
    user_data: Option<JsonMap>,
}

/// Client-supplied metadata for one archive upload, with defaults applied.
///
/// `session_duration` and `frame_count` are client-reported and are never
/// trusted for correctness; the pipeline re-derives the actual image count.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub user_id: String,
    pub session_id: String,
    /// Epoch seconds at which the client finished the session.
    pub timestamp: i64,
    /// Elapsed wall-clock seconds, never negative.
    pub session_duration: f64,
    /// Frame count claimed by the client (may diverge from the archive).
    pub frame_count: u64,
    /// Nominal capture framerate, never zero.
    pub framerate: u32,
    pub user_data: JsonMap,
}

impl UploadMetadata {
    /// Parse the metadata JSON, filling defaults relative to `received_at`.
    ///
    /// Fails only when the payload is not a JSON object or lacks a usable
    /// `userId`.
    pub fn parse(raw: &str, received_at: Timestamp) -> Result<Self, CoreError> {
        let raw: RawUploadMetadata = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid metadata JSON: {e}")))?;

        let user_id = raw
            .user_id
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| CoreError::Validation("Metadata is missing userId".into()))?;

        let timestamp = raw
            .timestamp
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|t| t as i64)
            .unwrap_or_else(|| received_at.timestamp());

        let session_id = raw
            .session_id
            .as_ref()
            .and_then(scalar_to_string)
            .unwrap_or_else(|| generate_session_id(timestamp));

        let session_duration = raw
            .session_duration
            .filter(|d| d.is_finite())
            .unwrap_or(0.0)
            .max(0.0);

        Ok(Self {
            user_id,
            session_id,
            timestamp,
            session_duration,
            frame_count: raw.frame_count.unwrap_or(0),
            framerate: raw
                .framerate
                .filter(|f| *f > 0)
                .unwrap_or(DEFAULT_FRAMERATE),
            user_data: raw.user_data.unwrap_or_default(),
        })
    }

    /// String field of `user_data`, or `"unknown"`.
    pub fn user_data_str(&self, key: &str) -> String {
        self.user_data
            .get(key)
            .and_then(scalar_to_string)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Accept both JSON strings and numbers as identifiers; blank strings count
/// as absent.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{timestamp}_{8 hex chars}`.
fn generate_session_id(timestamp: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{timestamp}_{}", &suffix[..8])
}

// ---------------------------------------------------------------------------
// Geolocation
// ---------------------------------------------------------------------------

/// Coarse location metadata for the uploading client.
///
/// Never absent from a record: lookups that fail produce a degraded record
/// with placeholder values and `error` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRecord {
    pub ip: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
    pub isp: String,
    pub org: String,
    pub flag: String,
    pub fetched_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized user data
// ---------------------------------------------------------------------------

/// Locale decomposition attached when `country` looks like `PT-BR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub language: String,
    pub country: String,
    pub locale: String,
}

/// `userData` after device/locale enrichment.
///
/// Known derived fields are typed; everything the client sent that the
/// normalizer does not own is carried untouched in `passthrough`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_commercial_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_info: Option<RegionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_resolution: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_depth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_font_size: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_language: Option<Value>,
    #[serde(flatten)]
    pub passthrough: JsonMap,
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// One persisted record per uploaded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub session_start_time: f64,
    pub session_duration: f64,
    pub frame_count: u64,
    pub actual_image_count: u64,
    pub framerate: u32,
    pub user_data: NormalizedUserData,
    pub geo: GeoRecord,
    pub received_at: Timestamp,
    pub video_file: String,
    pub original_zip_size: u64,
    pub video_size: u64,
    pub compression_ratio: f64,
    pub platform: String,
    pub app_version: String,
    #[serde(rename = "effectiveFPS")]
    pub effective_fps: f64,
}

/// Rolling per-user state, rewritten after every completed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestUserSummary {
    pub user_id: String,
    pub last_session_id: String,
    pub last_session_time: i64,
    pub user_data: NormalizedUserData,
    pub geo: GeoRecord,
    pub received_at: Timestamp,
    pub total_sessions: u64,
    pub total_frames: u64,
    pub platform: String,
    pub app_version: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
