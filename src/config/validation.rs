use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_model_config(config)?;
    validate_log_level(config)?;
    validate_protocol_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.body_limit_bytes == 0 {
        return Err(validation_err(
            "server.body_limit_bytes must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    if server.admission_timeout_ms == Some(0) {
        return Err(validation_err(
            "server.admission_timeout_ms must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_model_config(config: &AppConfig) -> Result<(), ConfigError> {
    let model = &config.model;
    if model.embedding_dim == 0 {
        return Err(validation_err("model.embedding_dim must be greater than 0"));
    }
    if let Some(name) = model.name.as_deref() {
        if name.trim().is_empty() {
            return Err(validation_err("model.name cannot be blank when set"));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_protocol_features(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    if features.sniffer_threshold == 0 {
        return Err(validation_err(
            "features.sniffer_threshold must be greater than 0",
        ));
    }
    if features.function_call_marker.is_empty() {
        return Err(validation_err(
            "features.function_call_marker cannot be empty",
        ));
    }
    if features.default_max_tokens == 0 || features.default_max_length == 0 {
        return Err(validation_err(
            "features.default_max_tokens and features.default_max_length must be greater than 0",
        ));
    }
    Ok(())
}
