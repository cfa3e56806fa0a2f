//! Stable content identifiers.
//!
//! Text is whitespace-collapsed (case preserved) before hashing; media references are
//! reduced to a canonical source id first, so `https://youtu.be/ID` and
//! `https://www.youtube.com/watch?v=ID&t=30` share one fingerprint.

use sha2::{Digest, Sha256};

use super::error::{PipelineError, PipelineResult};
use super::types::{ContentFingerprint, ContentInput};

const TEXT_DOMAIN: &str = "text:";
const MEDIA_DOMAIN: &str = "media:";
const YOUTUBE_ID_LEN: usize = 11;

pub fn fingerprint(input: &ContentInput) -> PipelineResult<ContentFingerprint> {
    let material = match input {
        ContentInput::Text(text) => {
            let normalized = normalize_text(text);
            if normalized.is_empty() {
                return Err(PipelineError::invalid_input("text is empty"));
            }
            format!("{TEXT_DOMAIN}{normalized}")
        }
        ContentInput::Media(reference) => {
            format!("{MEDIA_DOMAIN}{}", canonical_media_id(reference)?)
        }
    };

    Ok(ContentFingerprint::from_hex(sha256_hex(&material)))
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical identifier for a media reference.
///
/// YouTube links become `youtube:<id>`; any other http(s) URL is reduced to
/// lowercase host plus path and query, without scheme, fragment or trailing slash.
pub fn canonical_media_id(reference: &str) -> PipelineResult<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::invalid_input("media reference is empty"));
    }

    let rest = strip_scheme(trimmed)
        .ok_or_else(|| PipelineError::invalid_input("media reference must be an http(s) URL"))?;
    let rest = rest.split('#').next().unwrap_or_default();

    let (authority, path_and_query) = match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if host.is_empty() || (!host.contains('.') && host != "localhost") {
        return Err(PipelineError::invalid_input("media reference has no valid host"));
    }

    if is_youtube_host(&host) {
        let id = youtube_video_id(&host, path_and_query).ok_or_else(|| {
            PipelineError::invalid_input("unrecognized YouTube link, expected a video URL")
        })?;
        return Ok(format!("youtube:{id}"));
    }

    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = path_and_query.trim_end_matches('/');
    Ok(format!("{host}{path}"))
}

fn strip_scheme(url: &str) -> Option<&str> {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    if lower.starts_with("https://") {
        Some(&url[8..])
    } else if lower.starts_with("http://") {
        Some(&url[7..])
    } else {
        None
    }
}

fn is_youtube_host(host: &str) -> bool {
    matches!(
        host,
        "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be"
    )
}

fn youtube_video_id(host: &str, path_and_query: &str) -> Option<String> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path_and_query, ""),
    };
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    let candidate = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") | None => query.split('&').find_map(|pair| {
                pair.strip_prefix("v=").map(str::to_string)
            }),
            Some("shorts") | Some("embed") | Some("live") | Some("v") => {
                segments.next().map(str::to_string)
            }
            Some(_) => None,
        }
    }?;

    is_valid_youtube_id(&candidate).then_some(candidate)
}

fn is_valid_youtube_id(id: &str) -> bool {
    id.len() == YOUTUBE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
