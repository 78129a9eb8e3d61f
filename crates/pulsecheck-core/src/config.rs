use crate::app_config::{
    AppConfig, BlueskyCredentials, ClassifierKind, DiscordCredentials, XCredentials,
};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_positive_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let value = or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if value == 0 {
            return Err(invalid(var, "must be greater than zero".to_string()));
        }
        Ok(value)
    };

    let database_url = require("DATABASE_URL")?;
    let log_level = or_default("PULSECHECK_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("PULSECHECK_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("PULSECHECK_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("PULSECHECK_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http_timeout_secs = parse_u64("PULSECHECK_HTTP_TIMEOUT_SECS", "30")?;
    let max_retries = parse_u32("PULSECHECK_MAX_RETRIES", "3")?;
    let retry_backoff_base_ms = parse_u64("PULSECHECK_RETRY_BACKOFF_BASE_MS", "1000")?;
    let score_batch_size = parse_positive_usize("PULSECHECK_SCORE_BATCH_SIZE", "32")?;
    let fetch_batch_size = parse_positive_usize("PULSECHECK_FETCH_BATCH_SIZE", "100")?;
    let confidence_threshold =
        parse_confidence(&or_default("PULSECHECK_CONFIDENCE_THRESHOLD", "0.8"))?;

    let rate_capacity = parse_u32("PULSECHECK_RATE_CAPACITY", "5")?;
    if rate_capacity == 0 {
        return Err(invalid(
            "PULSECHECK_RATE_CAPACITY",
            "must be greater than zero".to_string(),
        ));
    }
    let rate_refill_secs = parse_u64("PULSECHECK_RATE_REFILL_SECS", "12")?;

    let classifier = parse_classifier(&or_default("PULSECHECK_CLASSIFIER", "huggingface"))?;
    let hf_api_token = optional("HF_API_TOKEN");
    let hf_model = or_default("HF_MODEL", "distilbert-base-uncased-finetuned-sst-2-english");

    let discord = match (optional("DISCORD_BOT_TOKEN"), optional("DISCORD_CHANNEL_IDS")) {
        (Some(bot_token), Some(ids)) => Some(DiscordCredentials {
            bot_token,
            channel_ids: split_list(&ids),
        }),
        (Some(bot_token), None) => Some(DiscordCredentials {
            bot_token,
            channel_ids: Vec::new(),
        }),
        _ => None,
    };

    let bluesky = match (optional("BLUESKY_HANDLE"), optional("BLUESKY_APP_PASSWORD")) {
        (Some(handle), Some(app_password)) => Some(BlueskyCredentials {
            handle,
            app_password,
        }),
        _ => None,
    };

    let x = match (optional("X_BEARER_TOKEN"), optional("X_USER_ID")) {
        (Some(bearer_token), Some(user_id)) => Some(XCredentials {
            bearer_token,
            user_id,
        }),
        _ => None,
    };

    Ok(AppConfig {
        database_url,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http_timeout_secs,
        max_retries,
        retry_backoff_base_ms,
        score_batch_size,
        fetch_batch_size,
        confidence_threshold,
        rate_capacity,
        rate_refill_secs,
        classifier,
        hf_api_token,
        hf_model,
        discord,
        bluesky,
        x,
    })
}

/// Parse a confidence threshold, which must lie in `[0.0, 1.0]`.
fn parse_confidence(raw: &str) -> Result<f64, ConfigError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: "PULSECHECK_CONFIDENCE_THRESHOLD".to_string(),
            reason: e.to_string(),
        })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidEnvVar {
            var: "PULSECHECK_CONFIDENCE_THRESHOLD".to_string(),
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

fn parse_classifier(s: &str) -> Result<ClassifierKind, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "huggingface" | "hf" => Ok(ClassifierKind::HuggingFace),
        "lexicon" => Ok(ClassifierKind::Lexicon),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PULSECHECK_CLASSIFIER".to_string(),
            reason: format!("unknown classifier \"{other}\" (expected huggingface or lexicon)"),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
