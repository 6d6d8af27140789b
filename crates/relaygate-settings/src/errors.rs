use thiserror::Error;

/// Failure to produce a usable [`crate::GatewaySettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read gateway settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("gateway settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gateway setting rejected: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_file_names_json() {
        let err: SettingsError = serde_json::from_str::<serde_json::Value>("{port:")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("gateway settings are not valid JSON"));
    }

    #[test]
    fn rejected_value_carries_reason() {
        let err = SettingsError::InvalidValue("backend.maxAttempts must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "gateway setting rejected: backend.maxAttempts must be at least 1"
        );
    }
}
