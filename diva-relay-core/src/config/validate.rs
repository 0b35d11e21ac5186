//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.workspace.trim().is_empty() {
        errors.push("workspace must not be empty".to_string());
    }
    if config.gateway.turn_timeout_s == 0 {
        errors.push("gateway.turn_timeout_s must be > 0".to_string());
    }
    if config.gateway.chat_queue_depth == 0 {
        errors.push("gateway.chat_queue_depth must be > 0".to_string());
    }
    if config.cron.tick_interval_ms == 0 {
        errors.push("cron.tick_interval_ms must be > 0".to_string());
    }
    if !matches!(config.logging.format.as_str(), "text" | "json") {
        errors.push(format!(
            "logging.format must be 'text' or 'json', got '{}'",
            config.logging.format
        ));
    }

    let line = &config.channels.line;
    if line.enabled {
        if line.channel_secret.trim().is_empty() {
            errors.push("channels.line.channel_secret is required when line is enabled".to_string());
        }
        if line.channel_access_token.trim().is_empty() {
            errors.push(
                "channels.line.channel_access_token is required when line is enabled".to_string(),
            );
        }
        if !line.webhook_path.starts_with('/') {
            errors.push("channels.line.webhook_path must start with '/'".to_string());
        }
        if line.webhook_port == 0 {
            errors.push("channels.line.webhook_port must be > 0".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
