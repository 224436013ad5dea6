use crate::{
    error::{RelayError, Result},
    hls::{PLAYLIST_CONTENT_TYPE, PlaylistRewriter},
    metrics,
    relay::{
        BodyKind, RelayParams, RelayRequest, classify,
        classify::shape_of,
        passthrough::passthrough,
    },
    server::state::AppState,
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, warn};

/// Largest playlist body the relay will buffer for rewriting.
const MAX_PLAYLIST_BYTES: usize = 4 * 1024 * 1024;

/// `GET|HEAD <relay endpoint>?url=...` (or `?domain=...&path=...`)
pub async fn relay(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<RelayParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let target = params.resolve(&state.profiles)?;
    state.guard.check(&target.url)?;

    info!(
        "Relaying {} {} (profile: {})",
        method, target.url, target.profile.id
    );

    relay_target(&state, RelayRequest::new(method, target, &headers)).await
}

/// Fetch an already-guarded target and relay it as a playlist or as bytes.
pub(crate) async fn relay_target(state: &AppState, request: RelayRequest) -> Result<Response> {
    let start = Instant::now();
    let mut kind = shape_of(&request.target);

    let result = fetch_and_relay(state, &request, &mut kind).await;

    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status(),
    };
    metrics::record_request(kind.label(), status.as_u16());
    metrics::record_duration(kind.label(), start);

    result
}

async fn fetch_and_relay(
    state: &AppState,
    request: &RelayRequest,
    kind: &mut BodyKind,
) -> Result<Response> {
    let mut upstream = send(state, request, true).await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *kind = classify(content_type.as_deref(), upstream.url());

    if *kind == BodyKind::Binary {
        let head_only = request.method == Method::HEAD;
        return Ok(passthrough(
            upstream,
            &request.profile,
            state.shutdown.child_token(),
            head_only,
        ));
    }

    if request.method == Method::HEAD {
        return Ok(playlist_response(String::new()));
    }

    // A ranged fetch that turned out to be a playlist is useless: refetch whole.
    if request.forwards_range() {
        info!("Range sent for playlist {}, refetching without it", request.target);
        upstream = send(state, request, false).await?;
    }

    let base = upstream.url().clone();
    let deadline = state.timeouts.manifest;
    let body = timeout(deadline, read_playlist(upstream))
        .await
        .map_err(|_| {
            warn!("Playlist body from {} stalled past {:?}", base, deadline);
            metrics::record_origin_error();
            RelayError::UpstreamTimeout(deadline)
        })??;
    let rewritten = PlaylistRewriter::new(&base, &state.endpoint).rewrite_bytes(&body)?;

    Ok(playlist_response(rewritten))
}

/// Buffer a playlist body, refusing anything over [`MAX_PLAYLIST_BYTES`].
async fn read_playlist(mut upstream: reqwest::Response) -> Result<Vec<u8>> {
    let too_large = || {
        RelayError::ManifestParse(format!("playlist larger than {MAX_PLAYLIST_BYTES} bytes"))
    };

    if upstream
        .content_length()
        .is_some_and(|len| len > MAX_PLAYLIST_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = upstream.chunk().await? {
        if body.len() + chunk.len() > MAX_PLAYLIST_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Send the origin request; non-2xx upstream answers become errors.
///
/// Waiting for response headers is bounded by the manifest timeout for every
/// fetch, segments included.
async fn send(state: &AppState, request: &RelayRequest, with_range: bool) -> Result<reqwest::Response> {
    let deadline = state.timeouts.manifest;
    let response = timeout(
        deadline,
        request
            .build(&state.http_client, &state.timeouts, with_range)
            .send(),
    )
    .await
    .map_err(|_| {
        warn!("Upstream {} sent no headers within {:?}", request.target, deadline);
        metrics::record_origin_error();
        RelayError::UpstreamTimeout(deadline)
    })?
    .map_err(|e| {
        warn!("Upstream fetch of {} failed: {}", request.target, e);
        metrics::record_origin_error();
        RelayError::from(e)
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!("Upstream {} answered {}", request.target, status);
        metrics::record_origin_error();
        return Err(RelayError::UpstreamStatus(status));
    }

    Ok(response)
}

fn playlist_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}
