pub mod rewriter;

pub use rewriter::{PlaylistLine, PlaylistRewriter};

/// Content-Type of every rewritten HLS playlist.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
