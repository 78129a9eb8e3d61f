//! Discord channel reader over the REST API.
//!
//! Message ids are snowflakes, so channels use a watermark cursor and
//! `after=` paging. Discord is never a posting target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecheck_core::{Cursor, Record, Source};
use reqwest::Client;
use serde::Deserialize;

use super::{
    build_http_client, retry_after_header, send_error, status_error, ConnectorError,
    PlatformConnector,
};

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: String,
    author: DiscordAuthor,
}

#[derive(Debug, Deserialize)]
struct DiscordAuthor {
    username: String,
}

pub struct DiscordConnector {
    client: Client,
    bot_token: String,
    channel_ids: Vec<String>,
    base_url: String,
}

impl DiscordConnector {
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn new(
        bot_token: &str,
        channel_ids: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Self, ConnectorError> {
        Self::with_base_url(bot_token, channel_ids, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a connector against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        bot_token: &str,
        channel_ids: Vec<String>,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            bot_token: bot_token.to_owned(),
            channel_ids,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn to_record(channel_id: &str, message: DiscordMessage) -> Option<Record> {
        let created_at = match DateTime::parse_from_rfc3339(&message.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(
                    stream_id = channel_id,
                    record_id = %message.id,
                    error = %e,
                    "skipping Discord message with unparseable timestamp"
                );
                return None;
            }
        };
        Some(Record {
            source: Source::Discord,
            stream_id: channel_id.to_owned(),
            record_id: message.id,
            text: message.content,
            created_at,
            author: message.author.username,
        })
    }
}

#[async_trait]
impl PlatformConnector for DiscordConnector {
    fn source(&self) -> Source {
        Source::Discord
    }

    fn streams(&self) -> Vec<String> {
        self.channel_ids.clone()
    }

    async fn list_new(
        &self,
        stream_id: &str,
        since: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, ConnectorError> {
        let limit = max_count.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query: Vec<(&str, String)> = vec![("limit", limit)];
        if let Some(after) = since.and_then(Cursor::watermark) {
            query.push(("after", after.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/channels/{stream_id}/messages", self.base_url))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .query(&query)
            .send()
            .await
            .map_err(|e| send_error(&e, false))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body, retry_after, true));
        }

        let messages: Vec<DiscordMessage> = response
            .json()
            .await
            .map_err(|e| ConnectorError::Transient(format!("Discord response parse error: {e}")))?;

        let mut records: Vec<Record> = messages
            .into_iter()
            .filter_map(|m| Self::to_record(stream_id, m))
            .collect();
        // Discord pages newest first; ids that fail to parse sort last and
        // are dropped downstream.
        records.sort_by_key(|r| r.numeric_id().unwrap_or(u64::MAX));
        records.truncate(max_count);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_connector(base_url: &str) -> DiscordConnector {
        DiscordConnector::with_base_url("bot-token", vec!["chan-1".to_string()], 30, base_url)
            .expect("client construction should not fail")
    }

    fn message(id: &str, content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "channel_id": "chan-1",
            "content": content,
            "timestamp": "2025-03-01T12:00:00.000000+00:00",
            "author": { "id": "u1", "username": "ana" }
        })
    }

    #[tokio::test]
    async fn list_new_pages_after_watermark_and_sorts_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/chan-1/messages"))
            .and(header("authorization", "Bot bot-token"))
            .and(query_param("after", "100"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                message("103", "third"),
                message("101", "first"),
                message("102", "second")
            ])))
            .mount(&server)
            .await;

        let cursor = Cursor::HighWatermark { id: 100 };
        let records = test_connector(&server.uri())
            .list_new("chan-1", Some(&cursor), 50)
            .await
            .expect("list should succeed");

        let ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);
        assert_eq!(records[0].author, "ana");
        assert_eq!(records[0].source, Source::Discord);
    }

    #[tokio::test]
    async fn missing_channel_is_stream_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Channel"))
            .mount(&server)
            .await;

        let err = test_connector(&server.uri())
            .list_new("chan-1", None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::StreamGone(_)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = test_connector(&server.uri())
            .list_new("chan-1", None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Transient(_)));
    }

    #[tokio::test]
    async fn first_run_omits_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/chan-1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let records = test_connector(&server.uri())
            .list_new("chan-1", None, 10)
            .await
            .unwrap();
        assert!(records.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].url.query().unwrap_or("").contains("after="));
    }
}
