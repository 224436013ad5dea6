use crate::{
    error::{RelayError, Result},
    metrics,
    relay::{request::profile_headers, target::parse_target_url},
    server::state::AppState,
    subtitle::{VTT_CONTENT_TYPE, parse_offset, shift_timestamps, to_webvtt},
};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SubtitleParams {
    pub url: Option<String>,
    /// Seconds to shift every cue by; may be negative or fractional
    pub offset: Option<String>,
}

/// `GET /subtitle?url=<url>[&offset=<seconds>]`: fetch SRT or WebVTT, serve WebVTT.
pub async fn serve_subtitle(
    State(state): State<AppState>,
    Query(params): Query<SubtitleParams>,
) -> Result<Response> {
    let start = Instant::now();

    let raw = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(RelayError::MissingParameter("url"))?;
    let url = parse_target_url(raw)?;
    state.guard.check(&url)?;

    let profile = state
        .profiles
        .resolve(None, url.host_str().unwrap_or_default())?;

    info!("Fetching subtitle {}", url);

    let response = state
        .http_client
        .get(url.clone())
        .headers(profile_headers(&profile, None))
        .timeout(state.timeouts.manifest)
        .send()
        .await
        .inspect_err(|_| metrics::record_origin_error())?;

    let status = response.status();
    if !status.is_success() {
        metrics::record_origin_error();
        metrics::record_request("subtitle", RelayError::UpstreamStatus(status).status().as_u16());
        return Err(RelayError::UpstreamStatus(status));
    }

    let text = response.text().await?;
    let vtt = to_webvtt(&shift_timestamps(&text, parse_offset(params.offset.as_deref())));

    metrics::record_request("subtitle", 200);
    metrics::record_duration("subtitle", start);

    Ok((
        [
            (header::CONTENT_TYPE, VTT_CONTENT_TYPE),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        vtt,
    )
        .into_response())
}
