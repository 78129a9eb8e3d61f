//! Bluesky (AT Protocol) reader and poster.
//!
//! The source stream is the account's mention notifications. Notification
//! URIs are not ordered, so the stream uses a recent-id window cursor and
//! pages back until it reaches an id the window already holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecheck_core::{Cursor, Record, Source, TargetPlatform};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{
    build_http_client, retry_after_header, send_error, status_error, ConnectorError,
    PlatformConnector, PostingConnector,
};

const DEFAULT_BASE_URL: &str = "https://bsky.social/xrpc";
const MAX_PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 20;
const FIND_POST_SCAN: usize = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Deserialize)]
struct NotificationPage {
    #[serde(default)]
    notifications: Vec<Notification>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    uri: String,
    reason: String,
    author: Author,
    #[serde(default)]
    record: serde_json::Value,
    indexed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct AuthorFeed {
    #[serde(default)]
    feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    post: FeedPost,
}

#[derive(Debug, Deserialize)]
struct FeedPost {
    uri: String,
    #[serde(default)]
    record: serde_json::Value,
}

pub struct BlueskyConnector {
    client: Client,
    handle: String,
    app_password: String,
    base_url: String,
    session: Mutex<Option<Session>>,
}

impl BlueskyConnector {
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn new(handle: &str, app_password: &str, timeout_secs: u64) -> Result<Self, ConnectorError> {
        Self::with_base_url(handle, app_password, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a connector against a custom XRPC base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        handle: &str,
        app_password: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            handle: handle.to_owned(),
            app_password: app_password.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            session: Mutex::new(None),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn create_session(&self) -> Result<Session, ConnectorError> {
        let response = self
            .client
            .post(self.endpoint("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": self.handle,
                "password": self.app_password,
            }))
            .send()
            .await
            .map_err(|e| send_error(&e, false))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST => {
                    ConnectorError::Unauthorized(format!("createSession: {body}"))
                }
                _ => status_error(status, body, retry_after, false),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ConnectorError::Transient(format!("createSession parse error: {e}")))
    }

    async fn session(&self, refresh: bool) -> Result<Session, ConnectorError> {
        let mut guard = self.session.lock().await;
        if !refresh {
            if let Some(session) = guard.as_ref() {
                return Ok(session.clone());
            }
        }
        let session = self.create_session().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Send an authenticated request, re-creating the session once if the
    /// access token was rejected. Non-auth failures come back as responses.
    async fn send_authed<F>(&self, build: F, ambiguous_on_timeout: bool) -> Result<Response, ConnectorError>
    where
        F: Fn(&Session) -> RequestBuilder,
    {
        let session = self.session(false).await?;
        let response = build(&session)
            .bearer_auth(&session.access_jwt)
            .send()
            .await
            .map_err(|e| send_error(&e, ambiguous_on_timeout))?;

        let status = response.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::BAD_REQUEST {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let expired = status == StatusCode::UNAUTHORIZED
            || body.contains("ExpiredToken")
            || body.contains("InvalidToken");
        if !expired {
            return Err(ConnectorError::Rejected(format!("{status}: {body}")));
        }

        tracing::debug!(handle = %self.handle, "Bluesky session expired, re-authenticating");
        let session = self.session(true).await?;
        let response = build(&session)
            .bearer_auth(&session.access_jwt)
            .send()
            .await
            .map_err(|e| send_error(&e, ambiguous_on_timeout))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Unauthorized(body));
        }
        Ok(response)
    }

    async fn error_for(response: Response, gone_is_stream: bool) -> ConnectorError {
        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        status_error(status, body, retry_after, gone_is_stream)
    }

    fn to_record(&self, notification: Notification) -> Option<Record> {
        let text = notification
            .record
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let created = notification
            .record
            .get("createdAt")
            .and_then(serde_json::Value::as_str)
            .or(notification.indexed_at.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let Some(created_at) = created else {
            tracing::warn!(
                record_id = %notification.uri,
                "skipping Bluesky mention without a parseable timestamp"
            );
            return None;
        };
        Some(Record {
            source: Source::Bluesky,
            stream_id: self.handle.clone(),
            record_id: notification.uri,
            text,
            created_at,
            author: notification.author.handle,
        })
    }
}

#[async_trait]
impl PlatformConnector for BlueskyConnector {
    fn source(&self) -> Source {
        Source::Bluesky
    }

    fn streams(&self) -> Vec<String> {
        vec![self.handle.clone()]
    }

    async fn list_new(
        &self,
        _stream_id: &str,
        since: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, ConnectorError> {
        let limit = if since.is_some() {
            MAX_PAGE_SIZE
        } else {
            max_count.clamp(1, MAX_PAGE_SIZE)
        }
        .to_string();
        let mut page_cursor: Option<String> = None;
        let mut newest_first: Vec<Notification> = Vec::new();
        let mut complete = false;

        for _ in 0..MAX_PAGES {
            let url = self.endpoint("app.bsky.notification.listNotifications");
            let response = self
                .send_authed(
                    |_| {
                        let mut query: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
                        if let Some(c) = page_cursor.as_deref() {
                            query.push(("cursor", c));
                        }
                        self.client.get(&url).query(&query)
                    },
                    false,
                )
                .await?;
            if !response.status().is_success() {
                return Err(Self::error_for(response, true).await);
            }
            let page: NotificationPage = response.json().await.map_err(|e| {
                ConnectorError::Transient(format!("listNotifications parse error: {e}"))
            })?;

            let reached_known = since.is_some_and(|c| {
                page.notifications.iter().any(|n| c.covers(&n.uri))
            });
            newest_first.extend(page.notifications);

            // Without a cursor there is no known position to reach; the
            // newest page is the starting point.
            if since.is_none() || reached_known {
                complete = true;
                break;
            }
            match page.cursor {
                Some(next) => page_cursor = Some(next),
                None => {
                    complete = true;
                    break;
                }
            }
        }
        if !complete {
            return Err(ConnectorError::Backlog(format!(
                "no known mention within {MAX_PAGES} pages of notifications"
            )));
        }

        let mut records: Vec<Record> = newest_first
            .into_iter()
            .rev()
            .filter(|n| n.reason == "mention")
            .filter(|n| !since.is_some_and(|c| c.covers(&n.uri)))
            .filter_map(|n| self.to_record(n))
            .collect();
        records.truncate(max_count);
        Ok(records)
    }
}

#[async_trait]
impl PostingConnector for BlueskyConnector {
    fn target(&self) -> TargetPlatform {
        TargetPlatform::Bluesky
    }

    async fn post(&self, text: &str) -> Result<String, ConnectorError> {
        let url = self.endpoint("com.atproto.repo.createRecord");
        let created_at = Utc::now().to_rfc3339();
        let response = self
            .send_authed(
                |session| {
                    self.client.post(&url).json(&serde_json::json!({
                        "repo": session.did,
                        "collection": "app.bsky.feed.post",
                        "record": {
                            "$type": "app.bsky.feed.post",
                            "text": text,
                            "createdAt": created_at,
                        }
                    }))
                },
                true,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, false).await);
        }
        let created: CreatedRecord = response
            .json()
            .await
            .map_err(|e| ConnectorError::Ambiguous(format!("createRecord parse error: {e}")))?;
        Ok(created.uri)
    }

    async fn find_post(&self, text: &str) -> Result<Option<String>, ConnectorError> {
        let url = self.endpoint("app.bsky.feed.getAuthorFeed");
        let limit = FIND_POST_SCAN.to_string();
        let response = self
            .send_authed(
                |session| {
                    self.client
                        .get(&url)
                        .query(&[("actor", session.did.as_str()), ("limit", limit.as_str())])
                },
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, false).await);
        }
        let feed: AuthorFeed = response
            .json()
            .await
            .map_err(|e| ConnectorError::Transient(format!("getAuthorFeed parse error: {e}")))?;

        Ok(feed
            .feed
            .into_iter()
            .find(|item| {
                item.post.record.get("text").and_then(serde_json::Value::as_str) == Some(text)
            })
            .map(|item| item.post.uri))
    }
}

#[cfg(test)]
#[path = "bluesky_test.rs"]
mod tests;
