//! Derived session statistics and response formatting.

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Percentage saved by encoding, rounded to one decimal. `0` when the
/// original archive size is zero.
pub fn compression_ratio(original_zip_size: u64, video_size: u64) -> f64 {
    if original_zip_size == 0 {
        return 0.0;
    }
    round1((1.0 - video_size as f64 / original_zip_size as f64) * 100.0)
}

/// Frames actually received per second of session, rounded to one decimal.
/// `0` when the duration is unknown.
pub fn effective_fps(actual_image_count: u64, session_duration: f64) -> f64 {
    if session_duration <= 0.0 {
        return 0.0;
    }
    round1(actual_image_count as f64 / session_duration)
}

/// Epoch seconds at which capture started.
pub fn session_start_time(timestamp: i64, session_duration: f64) -> f64 {
    timestamp as f64 - session_duration
}

/// Whether the claimed and extracted frame counts differ by more than
/// `tolerance`.
pub fn frame_count_diverges(claimed: u64, actual: u64, tolerance: u64) -> bool {
    claimed.abs_diff(actual) > tolerance
}

/// Render a byte count with 1024-based units and two decimals, e.g.
/// `"976.56 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
