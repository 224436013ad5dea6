//! HLS playlist rewriter.
//!
//! Every URI reference in a playlist is resolved against the playlist's
//! final URL and replaced by a relay link, so the player fetches variants,
//! segments, keys and init maps through the relay too:
//!
//! - plain URI lines are replaced entirely
//! - tag lines with a `URI="..."` attribute (`EXT-X-KEY`, `EXT-X-MAP`,
//!   `EXT-X-MEDIA`, `EXT-X-I-FRAME-STREAM-INF`, `EXT-X-PART`, ...) get only
//!   the quoted value replaced
//! - every other line is copied byte for byte, line endings included
//!
//! The rewriter does no access control. Each rewritten link is checked by
//! the allow-list guard when the player requests it.

use crate::error::{RelayError, Result};
use crate::relay::resolve::{RelayEndpoint, resolve};
use tracing::debug;
use url::Url;

const URI_ATTRIBUTE: &str = "URI=\"";

/// One playlist line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    Blank,
    /// A tag or comment with nothing to rewrite
    Comment(&'a str),
    /// A tag carrying one or more `URI="..."` attributes
    UriAttribute {
        tag: &'a str,
        /// Byte spans of each quoted value (quotes excluded)
        uris: Vec<(usize, usize)>,
    },
    PlainUri(&'a str),
}

impl<'a> PlaylistLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.is_empty() {
            return PlaylistLine::Blank;
        }
        if !trimmed.starts_with('#') {
            return PlaylistLine::PlainUri(trimmed);
        }

        let uris = uri_attribute_spans(line);
        if uris.is_empty() {
            return PlaylistLine::Comment(line);
        }

        let tag = trimmed.split(':').next().unwrap_or(trimmed);
        PlaylistLine::UriAttribute { tag, uris }
    }
}

/// Spans of every quoted `URI` attribute value in a tag line.
///
/// Only matches `URI` as a whole attribute name, i.e. preceded by `:` or `,`
/// (spaces or tabs in between are tolerated).
pub fn uri_attribute_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = line[search_from..].find(URI_ATTRIBUTE) {
        let marker = search_from + offset;
        let value_start = marker + URI_ATTRIBUTE.len();
        let Some(closing) = line[value_start..].find('"') else {
            break;
        };
        let value_end = value_start + closing;

        let at_boundary = matches!(
            line[..marker].trim_end_matches([' ', '\t']).as_bytes().last(),
            Some(b':' | b',')
        );
        if at_boundary {
            spans.push((value_start, value_end));
        }
        search_from = value_end + 1;
    }

    spans
}

/// Rewrites playlists for one relay endpoint.
#[derive(Debug, Clone)]
pub struct PlaylistRewriter<'a> {
    base: &'a Url,
    endpoint: &'a RelayEndpoint,
}

impl<'a> PlaylistRewriter<'a> {
    /// `base` is the playlist's final URL after redirects.
    pub fn new(base: &'a Url, endpoint: &'a RelayEndpoint) -> Self {
        Self { base, endpoint }
    }

    /// Rewrite a raw upstream body.
    ///
    /// # Errors
    /// [`RelayError::ManifestParse`] if the body is not UTF-8 text starting
    /// with `#EXTM3U`, or a URI line cannot be resolved. Nothing is returned
    /// half-rewritten.
    pub fn rewrite_bytes(&self, body: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(body)
            .map_err(|e| RelayError::ManifestParse(format!("playlist is not UTF-8: {e}")))?;
        self.rewrite(text)
    }

    pub fn rewrite(&self, playlist: &str) -> Result<String> {
        let header = playlist.trim_start_matches('\u{feff}').trim_start();
        if !header.starts_with("#EXTM3U") {
            return Err(RelayError::ManifestParse(
                "playlist does not start with #EXTM3U".to_string(),
            ));
        }

        let mut out = String::with_capacity(playlist.len() * 2);
        let mut rewritten = 0usize;

        for raw in playlist.split_inclusive('\n') {
            let (line, terminator) = split_terminator(raw);

            match PlaylistLine::parse(line) {
                PlaylistLine::Blank | PlaylistLine::Comment(_) => out.push_str(line),
                PlaylistLine::PlainUri(reference) => match self.rewrite_reference(reference)? {
                    Some(link) => {
                        out.push_str(&link);
                        rewritten += 1;
                    }
                    None => out.push_str(line),
                },
                PlaylistLine::UriAttribute { uris, .. } => {
                    let mut cursor = 0;
                    for (start, end) in uris {
                        out.push_str(&line[cursor..start]);
                        match self.rewrite_reference(&line[start..end])? {
                            Some(link) => {
                                out.push_str(&link);
                                rewritten += 1;
                            }
                            None => out.push_str(&line[start..end]),
                        }
                        cursor = end;
                    }
                    out.push_str(&line[cursor..]);
                }
            }

            out.push_str(terminator);
        }

        debug!("Rewrote {} URIs in playlist from {}", rewritten, self.base);
        Ok(out)
    }

    /// Relay link for one reference, or `None` when it must stay untouched
    /// (already a relay link, or a non-HTTP scheme such as `skd://`/`data:`).
    fn rewrite_reference(&self, reference: &str) -> Result<Option<String>> {
        if self.endpoint.is_relay_reference(reference) {
            return Ok(None);
        }

        let absolute = resolve(self.base, reference).map_err(|e| {
            RelayError::ManifestParse(format!("unresolvable URI '{reference}': {e}"))
        })?;

        if !matches!(absolute.scheme(), "http" | "https") || self.endpoint.is_relay_target(&absolute)
        {
            return Ok(None);
        }

        Ok(Some(self.endpoint.link(&absolute)))
    }
}

fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}
