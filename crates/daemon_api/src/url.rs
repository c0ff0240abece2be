use ::url::Url;

use crate::error::DaemonApiError;

/// Default daemon address for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Normalize a configured base URL to the daemon root.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are dropped
/// 3) a trailing `/api` segment is dropped, since endpoints add it back
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    trimmed
        .strip_suffix("/api")
        .unwrap_or(trimmed)
        .to_string()
}

/// `POST` target that streams one agent turn for a conversation.
pub fn stream_endpoint(base_url: &str, conversation_id: &str) -> Result<Url, DaemonApiError> {
    endpoint(
        base_url,
        &["api", "conversations", conversation_id, "messages", "stream"],
    )
}

/// `GET` target returning one conversation with its ordered messages.
pub fn conversation_endpoint(base_url: &str, conversation_id: &str) -> Result<Url, DaemonApiError> {
    endpoint(base_url, &["api", "conversations", conversation_id])
}

/// `GET` target listing conversations, optionally scoped to one participant.
pub fn conversations_endpoint(
    base_url: &str,
    participant: Option<&str>,
) -> Result<Url, DaemonApiError> {
    let mut url = endpoint(base_url, &["api", "conversations"])?;
    if let Some(participant) = participant.map(str::trim).filter(|value| !value.is_empty()) {
        url.query_pairs_mut().append_pair("participant", participant);
    }
    Ok(url)
}

fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, DaemonApiError> {
    let normalized = normalize_base_url(base_url);
    let mut url = Url::parse(&normalized)
        .map_err(|error| DaemonApiError::InvalidBaseUrl(format!("{normalized}: {error}")))?;
    url.path_segments_mut()
        .map_err(|_| DaemonApiError::InvalidBaseUrl(format!("{normalized}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
