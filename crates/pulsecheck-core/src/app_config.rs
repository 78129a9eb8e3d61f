use crate::types::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    HuggingFace,
    Lexicon,
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierKind::HuggingFace => write!(f, "huggingface"),
            ClassifierKind::Lexicon => write!(f, "lexicon"),
        }
    }
}

#[derive(Clone)]
pub struct DiscordCredentials {
    pub bot_token: String,
    pub channel_ids: Vec<String>,
}

#[derive(Clone)]
pub struct BlueskyCredentials {
    pub handle: String,
    pub app_password: String,
}

#[derive(Clone)]
pub struct XCredentials {
    pub bearer_token: String,
    pub user_id: String,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub score_batch_size: usize,
    pub fetch_batch_size: usize,
    pub confidence_threshold: f64,
    pub rate_capacity: u32,
    pub rate_refill_secs: u64,
    pub classifier: ClassifierKind,
    pub hf_api_token: Option<String>,
    pub hf_model: String,
    pub discord: Option<DiscordCredentials>,
    pub bluesky: Option<BlueskyCredentials>,
    pub x: Option<XCredentials>,
}

impl AppConfig {
    /// Sources whose credentials are configured.
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<Source> {
        let mut sources = Vec::new();
        if self.discord.is_some() {
            sources.push(Source::Discord);
        }
        if self.bluesky.is_some() {
            sources.push(Source::Bluesky);
        }
        if self.x.is_some() {
            sources.push(Source::X);
        }
        sources
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("log_level", &self.log_level)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("score_batch_size", &self.score_batch_size)
            .field("fetch_batch_size", &self.fetch_batch_size)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("rate_capacity", &self.rate_capacity)
            .field("rate_refill_secs", &self.rate_refill_secs)
            .field("classifier", &self.classifier)
            .field(
                "hf_api_token",
                &self.hf_api_token.as_ref().map(|_| "[redacted]"),
            )
            .field("hf_model", &self.hf_model)
            .field(
                "discord_channel_ids",
                &self.discord.as_ref().map(|d| &d.channel_ids),
            )
            .field("bluesky_handle", &self.bluesky.as_ref().map(|b| &b.handle))
            .field("x_user_id", &self.x.as_ref().map(|x| &x.user_id))
            .finish()
    }
}
