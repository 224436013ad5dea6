use crate::{
    error::{RelayError, Result},
    relay::{RelayRequest, Target, request::profile_headers},
    server::{handlers::relay::relay_target, state::AppState},
    token::fetch_token,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use tracing::info;
use url::Url;

/// `GET /channel/{profile}/{channel}`: live channel by id, with token handshake
/// for profiles that need one.
pub async fn serve_channel(
    State(state): State<AppState>,
    Path((profile_id, channel)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let profile = state
        .profiles
        .get(&profile_id)
        .ok_or_else(|| RelayError::UnknownProfile(profile_id.clone()))?;
    let template = profile.channel.as_ref().ok_or_else(|| {
        RelayError::InvalidTarget(format!("profile '{profile_id}' has no channel template"))
    })?;

    if !is_channel_id(&channel) {
        return Err(RelayError::InvalidTarget(format!("bad channel id '{channel}'")));
    }

    let mut manifest = parse_template_url(&template.manifest_for(&channel))?;
    state.guard.check(&manifest)?;

    let mut issued = None;
    if let Some(bootstrap) = template.bootstrap_for(&channel) {
        let bootstrap = parse_template_url(&bootstrap)?;
        state.guard.check(&bootstrap)?;

        let key = format!("{profile_id}:{channel}");
        let bootstrap_headers = profile_headers(&profile, None);
        let token = state
            .tokens
            .get_or_bootstrap(&key, || {
                fetch_token(
                    &state.bootstrap_client,
                    &bootstrap,
                    bootstrap_headers,
                    state.timeouts.manifest,
                )
            })
            .await?;

        manifest.query_pairs_mut().append_pair("token", &token);
        issued = Some((key, token));
    }

    info!("Serving channel {} via profile '{}'", channel, profile.id);

    let request = RelayRequest::new(method, Target { url: manifest, profile }, &headers);
    let result = relay_target(&state, request).await;

    if let Err(RelayError::UpstreamStatus(status)) = &result
        && (*status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN)
        && let Some((key, token)) = &issued
    {
        state.tokens.invalidate(key, token).await;
    }

    result
}

fn parse_template_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| RelayError::InvalidTarget(format!("{raw}: {e}")))
}

/// Channel ids are substituted into URL templates; keep them to one path segment.
fn is_channel_id(channel: &str) -> bool {
    !channel.is_empty()
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !channel.contains("..")
}
