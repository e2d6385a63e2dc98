use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let toml_err = toml::from_str::<toml::Value>("port = ").unwrap_err();
        let err = AppError::from(toml_err);
        assert!(err.to_string().starts_with("TOML deserialization failed"));

        let err = AppError::Config("Invalid KPI_PORT value: 'x'".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid KPI_PORT value: 'x'");
    }
}
