//! Domain error types.
//!
//! Only fatal conditions live here. A week that produces no trade (empty
//! ranking, empty laggard set, exhausted calendar, empty path) is an
//! ordinary `None`, never an error.

/// Top-level error type for laggard.
#[derive(Debug, thiserror::Error)]
pub enum LaggardError {
    #[error("data unavailable: {what}")]
    DataUnavailable { what: String },

    #[error("malformed input in {source_name}: {reason}")]
    MalformedInput { source_name: String, reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("failed to export {path}: {reason}")]
    Export { path: String, reason: String },
}

impl LaggardError {
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        LaggardError::MalformedInput {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        LaggardError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&LaggardError> for std::process::ExitCode {
    fn from(err: &LaggardError) -> Self {
        let code: u8 = match err {
            LaggardError::Export { .. } => 1,
            LaggardError::ConfigParse { .. }
            | LaggardError::ConfigMissing { .. }
            | LaggardError::ConfigInvalid { .. } => 2,
            LaggardError::Database { .. } | LaggardError::DatabaseQuery { .. } => 3,
            LaggardError::DataUnavailable { .. } => 5,
            LaggardError::MalformedInput { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
