use thiserror::Error;

use crate::fetch::FetchError;

/// A single listing could not be turned into a usable product. Never aborts
/// the surrounding batch; the offending item is dropped or marked ineligible.
#[derive(Error, Debug)]
#[error("extraction error: {0}")]
pub struct ExtractionError(pub String);

/// The outbound delivery transport failed before an attempt could be judged.
/// Logged at the runner boundary; cooldown state is left untouched so the
/// product stays eligible next cycle.
#[derive(Error, Debug)]
#[error("notification error: {0}")]
pub struct NotificationError(pub String);

#[derive(Error, Debug)]
pub enum AppError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unknown {kind} '{name}' requested by task configuration")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_conversion() {
        let fetch_err = FetchError::Timeout("no response after 20s".to_string());
        let app_err: AppError = fetch_err.into();
        assert!(matches!(app_err, AppError::Fetch(_)));
    }

    #[test]
    fn test_unknown_plugin_message() {
        let err = AppError::UnknownPlugin {
            kind: "source",
            name: "yahoo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown source 'yahoo' requested by task configuration"
        );
    }

    #[test]
    fn test_extraction_error_display() {
        let err = ExtractionError("missing price field".to_string());
        assert_eq!(err.to_string(), "extraction error: missing price field");
    }
}
