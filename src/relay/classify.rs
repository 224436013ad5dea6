use url::Url;

/// What an upstream response body is, and therefore how it is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// HLS playlist, rewritten line by line
    Playlist,
    /// Anything else, streamed through untouched
    Binary,
}

impl BodyKind {
    /// Metric label for requests of this kind.
    pub fn label(self) -> &'static str {
        match self {
            BodyKind::Playlist => "playlist",
            BodyKind::Binary => "segment",
        }
    }
}

/// Decide between playlist and binary segment.
///
/// An `mpegurl` Content-Type wins. Generic types (`application/octet-stream`,
/// `text/plain`, ...) and a missing header fall back to the URL path, since
/// some origins serve playlists as binary.
pub fn classify(content_type: Option<&str>, url: &Url) -> BodyKind {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();

    if content_type.contains("mpegurl") {
        return BodyKind::Playlist;
    }

    if is_ambiguous(&content_type) {
        return shape_of(url);
    }

    BodyKind::Binary
}

/// Classify by URL path extension alone.
///
/// Used before fetching to decide whether a Range header may be forwarded.
pub fn shape_of(url: &Url) -> BodyKind {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        BodyKind::Playlist
    } else {
        BodyKind::Binary
    }
}

fn is_ambiguous(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    matches!(
        essence,
        "" | "application/octet-stream"
            | "binary/octet-stream"
            | "application/binary"
            | "text/plain"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn mpegurl_content_types_are_playlists() {
        let u = url("https://o.example/stream");
        assert_eq!(classify(Some("application/vnd.apple.mpegurl"), &u), BodyKind::Playlist);
        assert_eq!(classify(Some("application/x-mpegURL"), &u), BodyKind::Playlist);
        assert_eq!(classify(Some("audio/mpegurl; charset=utf-8"), &u), BodyKind::Playlist);
    }

    #[test]
    fn content_type_wins_over_extension() {
        let u = url("https://o.example/seg1.ts");
        assert_eq!(classify(Some("application/vnd.apple.mpegurl"), &u), BodyKind::Playlist);

        let u = url("https://o.example/index.m3u8");
        assert_eq!(classify(Some("video/mp2t"), &u), BodyKind::Binary);
    }

    #[test]
    fn octet_stream_falls_back_to_extension() {
        let u = url("https://o.example/live/index.m3u8?token=x");
        assert_eq!(classify(Some("application/octet-stream"), &u), BodyKind::Playlist);
        assert_eq!(classify(Some("text/plain; charset=utf-8"), &u), BodyKind::Playlist);
        assert_eq!(classify(None, &u), BodyKind::Playlist);
    }

    #[test]
    fn everything_else_is_binary() {
        let u = url("https://o.example/seg1.ts");
        assert_eq!(classify(Some("application/octet-stream"), &u), BodyKind::Binary);
        assert_eq!(classify(None, &u), BodyKind::Binary);
        assert_eq!(classify(Some("video/mp4"), &url("https://o.example/a.m4s")), BodyKind::Binary);
        assert_eq!(
            classify(Some("application/dash+xml"), &url("https://o.example/a.mpd")),
            BodyKind::Binary
        );
    }

    #[test]
    fn shape_ignores_query() {
        assert_eq!(shape_of(&url("https://o.example/a.ts?f=x.m3u8")), BodyKind::Binary);
        assert_eq!(shape_of(&url("https://o.example/A.M3U8")), BodyKind::Playlist);
    }
}
