//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.client.connect_timeout_secs == 0 {
        errors.push("client.connect_timeout_secs must be > 0".to_string());
    }
    if config.client.request_timeout_secs == 0 {
        errors.push("client.request_timeout_secs must be > 0".to_string());
    }

    let endpoints = [
        ("production", &config.client.endpoints.production),
        ("development", &config.client.endpoints.development),
    ];
    for (name, base) in endpoints {
        let base = base.trim();
        if base.is_empty() {
            errors.push(format!("client.endpoints.{} must not be empty", name));
        } else if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            errors.push(format!(
                "client.endpoints.{} must use a ws:// or wss:// scheme",
                name
            ));
        }
    }

    if config.logging.level.trim().is_empty() {
        errors.push("logging.level must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.client.connect_timeout_secs = 0;
        config.client.request_timeout_secs = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("client.connect_timeout_secs"));
        assert!(err.contains("client.request_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_non_websocket_endpoint() {
        let mut config = Config::default();
        config.client.endpoints.development = "https://channel-dev.example".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("client.endpoints.development"));
    }
}
