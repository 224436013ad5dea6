//! SRT/WebVTT subtitle normalization for the subtitle relay.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// `HH:MM:SS,mmm` or `HH:MM:SS.mmm`
static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,}):(\d{2}):(\d{2})[.,](\d{3})").expect("static regex"));

pub const VTT_CONTENT_TYPE: &str = "text/vtt; charset=utf-8";

/// Shift every cue timestamp by `offset_ms`, clamping at zero.
///
/// Shifted timestamps are always written in WebVTT form (`.` separator).
pub fn shift_timestamps(content: &str, offset_ms: i64) -> String {
    if offset_ms == 0 {
        return content.to_string();
    }

    TIMESTAMP
        .replace_all(content, |caps: &Captures| {
            let field = |i: usize| caps[i].parse::<i64>().unwrap_or(0);
            let total = field(1) * 3_600_000 + field(2) * 60_000 + field(3) * 1_000 + field(4);
            format_timestamp((total + offset_ms).max(0))
        })
        .into_owned()
}

fn format_timestamp(ms: i64) -> String {
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        ms % 1_000
    )
}

/// Convert SRT to WebVTT; WebVTT input only gets its line endings normalized.
pub fn to_webvtt(content: &str) -> String {
    let content = content
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    if content.trim_start().starts_with("WEBVTT") {
        return content;
    }

    let cues = TIMESTAMP.replace_all(&content, "$1:$2:$3.$4");
    format!("WEBVTT\n\n{cues}")
}

/// Parse an `offset` query value in seconds (fractions allowed) to milliseconds.
pub fn parse_offset(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map(|secs| (secs * 1000.0).round() as i64)
        .unwrap_or(0)
}
