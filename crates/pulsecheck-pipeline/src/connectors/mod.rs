//! Platform wire adapters.
//!
//! A [`PlatformConnector`] reads records from a source's streams; a
//! [`PostingConnector`] publishes to a target platform. Bluesky and X are
//! both, Discord is a source only.

mod bluesky;
mod discord;
mod x;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulsecheck_core::{AppConfig, Cursor, Record, Source, TargetPlatform};
use reqwest::StatusCode;
use thiserror::Error;

use crate::retry::Transient;

pub use bluesky::BlueskyConnector;
pub use discord::DiscordConnector;
pub use x::XConnector;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Network failure, timeout before send, or a 5xx response.
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("rate limited by platform")]
    RateLimited { retry_after: Option<Duration> },

    /// The stream does not exist or is no longer readable.
    #[error("stream gone: {0}")]
    StreamGone(String),

    /// The platform refused the content.
    #[error("rejected by platform: {0}")]
    Rejected(String),

    /// The request may have been applied; the response never arrived.
    #[error("ambiguous outcome: {0}")]
    Ambiguous(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// More unseen records than one read may page through; reading on
    /// would skip the oldest of them.
    #[error("backlog exceeds page budget: {0}")]
    Backlog(String),

    #[error("connector setup failed: {0}")]
    Setup(String),
}

impl Transient for ConnectorError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transient(_) | ConnectorError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    fn source(&self) -> Source;

    /// Stream identifiers this connector reads (channels, mention feeds).
    fn streams(&self) -> Vec<String>;

    /// Records of `stream_id` newer than `since`, oldest first, at most
    /// `max_count`.
    async fn list_new(
        &self,
        stream_id: &str,
        since: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, ConnectorError>;
}

#[async_trait]
pub trait PostingConnector: Send + Sync {
    fn target(&self) -> TargetPlatform;

    /// Publish `text`, returning the platform's id for the new post.
    async fn post(&self, text: &str) -> Result<String, ConnectorError>;

    /// Look for a recent post of ours with exactly `text`.
    async fn find_post(&self, text: &str) -> Result<Option<String>, ConnectorError>;
}

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client, ConnectorError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("pulsecheck/0.1")
        .build()
        .map_err(|e| ConnectorError::Setup(e.to_string()))
}

/// Map a send failure. A timeout on a request that may already have
/// reached the server is ambiguous when `ambiguous_on_timeout` is set.
pub(crate) fn send_error(err: &reqwest::Error, ambiguous_on_timeout: bool) -> ConnectorError {
    if err.is_timeout() && ambiguous_on_timeout && !err.is_connect() {
        ConnectorError::Ambiguous(err.to_string())
    } else {
        ConnectorError::Transient(err.to_string())
    }
}

/// Map a non-success HTTP status.
pub(crate) fn status_error(
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
    gone_is_stream: bool,
) -> ConnectorError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED => ConnectorError::Unauthorized(body),
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE if gone_is_stream => {
            ConnectorError::StreamGone(format!("{status}: {body}"))
        }
        s if s.is_server_error() => ConnectorError::Transient(format!("{status}: {body}")),
        _ => ConnectorError::Rejected(format!("{status}: {body}")),
    }
}

pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Source and posting connectors built from configured credentials.
#[derive(Default)]
pub struct Connectors {
    pub sources: Vec<Arc<dyn PlatformConnector>>,
    pub targets: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
}

/// Build a connector for every platform whose credentials are configured.
///
/// Unconfigured platforms are skipped with a warning.
///
/// # Errors
///
/// Returns [`ConnectorError::Setup`] if an HTTP client cannot be built.
pub fn build_connectors(config: &AppConfig) -> Result<Connectors, ConnectorError> {
    let mut connectors = Connectors::default();
    let timeout = config.http_timeout_secs;

    match &config.discord {
        Some(creds) if !creds.channel_ids.is_empty() => {
            let discord = Arc::new(DiscordConnector::new(
                &creds.bot_token,
                creds.channel_ids.clone(),
                timeout,
            )?);
            connectors.sources.push(discord);
        }
        Some(_) => tracing::warn!("DISCORD_CHANNEL_IDS is empty, Discord collection disabled"),
        None => tracing::warn!("Discord credentials not configured, Discord collection disabled"),
    }

    if let Some(creds) = &config.bluesky {
        let bluesky = Arc::new(BlueskyConnector::new(
            &creds.handle,
            &creds.app_password,
            timeout,
        )?);
        connectors.sources.push(bluesky.clone());
        connectors.targets.insert(TargetPlatform::Bluesky, bluesky);
    } else {
        tracing::warn!("Bluesky credentials not configured, skipping Bluesky");
    }

    if let Some(creds) = &config.x {
        let x = Arc::new(XConnector::new(&creds.bearer_token, &creds.user_id, timeout)?);
        connectors.sources.push(x.clone());
        connectors.targets.insert(TargetPlatform::X, x);
    } else {
        tracing::warn!("X credentials not configured, skipping X");
    }

    Ok(connectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_rate_limited_are_retried() {
        assert!(ConnectorError::Transient("x".into()).is_transient());
        assert!(ConnectorError::RateLimited { retry_after: None }.is_transient());
        assert!(!ConnectorError::Ambiguous("x".into()).is_transient());
        assert!(!ConnectorError::StreamGone("x".into()).is_transient());
        assert!(!ConnectorError::Rejected("x".into()).is_transient());
        assert!(!ConnectorError::Unauthorized("x".into()).is_transient());
        assert!(!ConnectorError::Setup("x".into()).is_transient());
        assert!(!ConnectorError::Backlog("x".into()).is_transient());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new(), None, true),
            ConnectorError::StreamGone(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new(), None, false),
            ConnectorError::Rejected(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new(), None, true),
            ConnectorError::Transient(_)
        ));
        assert!(matches!(
            status_error(
                StatusCode::TOO_MANY_REQUESTS,
                String::new(),
                Some(Duration::from_secs(3)),
                true
            ),
            ConnectorError::RateLimited {
                retry_after: Some(_)
            }
        ));
    }
}
