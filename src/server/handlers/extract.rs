use crate::{
    error::{RelayError, Result},
    relay::{request::profile_headers, target::parse_target_url},
    server::state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    pub page: Option<String>,
    /// Optional profile hint for the page fetch
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub page: String,
    pub media: String,
    /// Ready-to-play relay link for `media`
    pub relay: String,
}

/// `GET /extract?page=<url>`: find the media URL behind an embed page.
pub async fn extract_media(
    State(state): State<AppState>,
    Query(params): Query<ExtractParams>,
) -> Result<Json<ExtractResponse>> {
    let raw = params
        .page
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(RelayError::MissingParameter("page"))?;
    let page = parse_target_url(raw)?;
    state.guard.check(&page)?;

    let profile = state.profiles.resolve(
        params.domain.as_deref().filter(|d| !d.is_empty()),
        page.host_str().unwrap_or_default(),
    )?;
    let extractor = state
        .extractors
        .find(&page)
        .ok_or_else(|| RelayError::Extraction(format!("no extractor handles {page}")))?;

    let media = extractor
        .extract(&state.http_client, &page, profile_headers(&profile, None))
        .await?;
    state.guard.check(&media)?;

    info!("Extractor '{}' found {} in {}", extractor.id(), media, page);

    Ok(Json(ExtractResponse {
        page: page.to_string(),
        relay: state.endpoint.link(&media),
        media: media.to_string(),
    }))
}
