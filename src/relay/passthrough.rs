//! Binary passthrough: stream segment bytes to the player unmodified.

use crate::metrics;
use crate::profile::OriginProfile;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt, stream::BoxStream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upstream headers copied onto a passthrough response. Nothing else is.
pub const PASSTHROUGH_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CACHE_CONTROL,
    header::ETAG,
];

/// Build the player response from an upstream response.
///
/// Status is copied verbatim (including `206`). With `head_only` the body is
/// dropped and only status and headers are relayed.
pub fn passthrough(
    upstream: reqwest::Response,
    profile: &OriginProfile,
    abort: CancellationToken,
    head_only: bool,
) -> Response {
    let status = upstream.status();

    let mut headers = HeaderMap::new();
    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    if let Some(forced) = profile
        .segment_content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, forced);
    }

    let body = if head_only {
        Body::empty()
    } else {
        Body::from_stream(PassthroughStream::new(upstream.bytes_stream(), abort))
    };

    (status, headers, body).into_response()
}

/// Upstream body stream tied to the lifetime of the player's connection.
///
/// When the player disconnects, hyper drops the response body. Dropping this
/// stream before the upstream finished cancels `abort` and releases the
/// upstream connection. Cancelling `abort` from outside (shutdown) ends the
/// stream early.
pub struct PassthroughStream {
    inner: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    abort: CancellationToken,
    finished: bool,
}

impl PassthroughStream {
    pub fn new<S>(upstream: S, abort: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        let inner = upstream
            .take_until(abort.clone().cancelled_owned())
            .boxed();

        Self {
            inner,
            abort,
            finished: false,
        }
    }
}

impl Stream for PassthroughStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.poll_next_unpin(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.finished = true;
        }
        poll
    }
}

impl Drop for PassthroughStream {
    fn drop(&mut self) {
        if !self.finished {
            self.abort.cancel();
            debug!("Client went away mid-segment, upstream fetch aborted");
            metrics::record_segment_abort();
        }
    }
}
