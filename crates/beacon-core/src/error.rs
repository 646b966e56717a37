use thiserror::Error;

/// Top-level error type for Beacon.
///
/// Subsystem crates define their own error types and convert into or out of
/// `BeaconError` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for BeaconError {
    fn from(err: toml::de::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BeaconError {
    fn from(err: toml::ser::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        BeaconError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(BeaconError, &str)> = vec![
            (
                BeaconError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                BeaconError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                BeaconError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
            (
                BeaconError::Validation("name must not be empty".to_string()),
                "Validation error: name must not be empty",
            ),
            (
                BeaconError::NotFound("rule 42".to_string()),
                "Not found: rule 42",
            ),
            (BeaconError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: BeaconError = io_err.into();
        assert!(matches!(err, BeaconError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let beacon_err: BeaconError = err.unwrap_err().into();
        assert!(matches!(beacon_err, BeaconError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let beacon_err: BeaconError = err.unwrap_err().into();
        assert!(matches!(beacon_err, BeaconError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
