//! X (Twitter) API v2 reader and poster.
//!
//! The source stream is the authenticated user's mentions. Tweet ids are
//! monotonic, so the stream uses a watermark cursor and `since_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecheck_core::{Cursor, Record, Source, TargetPlatform};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{
    build_http_client, retry_after_header, send_error, status_error, ConnectorError,
    PlatformConnector, PostingConnector,
};

const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";
const MIN_PAGE_SIZE: usize = 5;
const MAX_PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 20;
const FIND_POST_SCAN: &str = "20";

#[derive(Debug, Deserialize)]
struct TweetPage {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<String>,
    author_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    data: CreatedTweetData,
}

#[derive(Debug, Deserialize)]
struct CreatedTweetData {
    id: String,
}

pub struct XConnector {
    client: Client,
    bearer_token: String,
    user_id: String,
    base_url: String,
}

impl XConnector {
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn new(bearer_token: &str, user_id: &str, timeout_secs: u64) -> Result<Self, ConnectorError> {
        Self::with_base_url(bearer_token, user_id, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a connector against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        bearer_token: &str,
        user_id: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            bearer_token: bearer_token.to_owned(),
            user_id: user_id.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn error_for(response: Response, gone_is_stream: bool) -> ConnectorError {
        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        // X answers duplicate content and policy violations with 403.
        if status == StatusCode::FORBIDDEN && !gone_is_stream {
            return ConnectorError::Rejected(format!("{status}: {body}"));
        }
        status_error(status, body, retry_after, gone_is_stream)
    }

    fn to_record(stream_id: &str, tweet: Tweet) -> Option<Record> {
        let created_at = tweet
            .created_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let Some(created_at) = created_at else {
            tracing::warn!(
                stream_id,
                record_id = %tweet.id,
                "skipping X mention without a parseable created_at"
            );
            return None;
        };
        Some(Record {
            source: Source::X,
            stream_id: stream_id.to_owned(),
            record_id: tweet.id,
            text: tweet.text,
            created_at,
            author: tweet.author_id.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PlatformConnector for XConnector {
    fn source(&self) -> Source {
        Source::X
    }

    fn streams(&self) -> Vec<String> {
        vec![self.user_id.clone()]
    }

    async fn list_new(
        &self,
        stream_id: &str,
        since: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, ConnectorError> {
        let since_id = since.and_then(Cursor::watermark).map(|id| id.to_string());
        // Catching up pages newest first down to since_id, so take full
        // pages to reach it in as few requests as possible.
        let page_size = if since_id.is_some() {
            MAX_PAGE_SIZE
        } else {
            max_count.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
        }
        .to_string();
        let url = format!("{}/users/{stream_id}/mentions", self.base_url);

        let mut tweets: Vec<Tweet> = Vec::new();
        let mut next_token: Option<String> = None;
        let mut reached_since = false;
        for _ in 0..MAX_PAGES {
            let mut query: Vec<(&str, &str)> = vec![
                ("max_results", page_size.as_str()),
                ("tweet.fields", "created_at,author_id"),
            ];
            if let Some(id) = since_id.as_deref() {
                query.push(("since_id", id));
            }
            if let Some(token) = next_token.as_deref() {
                query.push(("pagination_token", token));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.bearer_token)
                .query(&query)
                .send()
                .await
                .map_err(|e| send_error(&e, false))?;
            if !response.status().is_success() {
                return Err(Self::error_for(response, true).await);
            }
            let page: TweetPage = response
                .json()
                .await
                .map_err(|e| ConnectorError::Transient(format!("mentions parse error: {e}")))?;
            tweets.extend(page.data);

            // X pages newest first; with a since_id the oldest unseen
            // mentions are on the last page.
            match (since_id.as_ref(), page.meta.next_token) {
                (Some(_), Some(token)) => next_token = Some(token),
                _ => {
                    reached_since = true;
                    break;
                }
            }
        }
        if !reached_since {
            return Err(ConnectorError::Backlog(format!(
                "more than {MAX_PAGES} pages of mentions since {}",
                since_id.as_deref().unwrap_or_default()
            )));
        }

        let mut records: Vec<Record> = tweets
            .into_iter()
            .filter_map(|t| Self::to_record(stream_id, t))
            .collect();
        records.sort_by_key(|r| r.numeric_id().unwrap_or(u64::MAX));
        records.dedup_by(|a, b| a.record_id == b.record_id);
        records.truncate(max_count);
        Ok(records)
    }
}

#[async_trait]
impl PostingConnector for XConnector {
    fn target(&self) -> TargetPlatform {
        TargetPlatform::X
    }

    async fn post(&self, text: &str) -> Result<String, ConnectorError> {
        let response = self
            .client
            .post(format!("{}/tweets", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| send_error(&e, true))?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, false).await);
        }
        let created: CreatedTweet = response
            .json()
            .await
            .map_err(|e| ConnectorError::Ambiguous(format!("create tweet parse error: {e}")))?;
        Ok(created.data.id)
    }

    async fn find_post(&self, text: &str) -> Result<Option<String>, ConnectorError> {
        let response = self
            .client
            .get(format!("{}/users/{}/tweets", self.base_url, self.user_id))
            .bearer_auth(&self.bearer_token)
            .query(&[("max_results", FIND_POST_SCAN)])
            .send()
            .await
            .map_err(|e| send_error(&e, false))?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, false).await);
        }
        let page: TweetPage = response
            .json()
            .await
            .map_err(|e| ConnectorError::Transient(format!("user tweets parse error: {e}")))?;
        Ok(page
            .data
            .into_iter()
            .find(|t| t.text == text)
            .map(|t| t.id))
    }
}
