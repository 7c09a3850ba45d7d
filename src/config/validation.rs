use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_tutor(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.max_body_bytes == 0 {
        return Err(validation_err("server.max_body_bytes must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    url::Url::parse(&upstream.base_url)
        .map_err(|err| validation_err(format!("upstream.base_url is not a valid URL: {err}")))?;
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err(format!(
            "upstream.api_key cannot be empty (set it in the file or via {})",
            super::API_KEY_ENV
        )));
    }
    if upstream.model.trim().is_empty() {
        return Err(validation_err("upstream.model cannot be empty"));
    }
    if upstream.delta_shapes.is_empty() {
        return Err(validation_err("upstream.delta_shapes cannot be empty"));
    }
    if upstream.stream_idle_timeout_secs == 0 {
        return Err(validation_err(
            "upstream.stream_idle_timeout_secs must be greater than 0",
        ));
    }
    let max_tokens = &upstream.max_tokens;
    if max_tokens.general == 0 || max_tokens.tutor == 0 || max_tokens.image_recognition == 0 {
        return Err(validation_err(
            "upstream.max_tokens values must be greater than 0",
        ));
    }
    if let Some(proxy) = upstream.proxy.as_deref() {
        let valid = ["http://", "https://"]
            .iter()
            .any(|scheme| proxy.starts_with(scheme));
        if !valid {
            return Err(validation_err(
                "upstream.proxy must start with http:// or https://",
            ));
        }
    }
    Ok(())
}

fn validate_tutor(config: &AppConfig) -> Result<(), ConfigError> {
    let tutor = &config.tutor;
    if tutor.history_limit == 0 {
        return Err(validation_err("tutor.history_limit must be greater than 0"));
    }
    if tutor.encouragements.is_empty() {
        return Err(validation_err("tutor.encouragements cannot be empty"));
    }
    let prompts = &tutor.system_prompts;
    for (name, prompt) in [
        ("homepage", &prompts.homepage),
        ("course_tutor", &prompts.course_tutor),
        ("canvas_coding", &prompts.canvas_coding),
        ("image_recognition", &prompts.image_recognition),
    ] {
        if prompt.trim().is_empty() {
            return Err(validation_err(format!(
                "tutor.system_prompts.{name} cannot be empty"
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED", "TRACE",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is not one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
