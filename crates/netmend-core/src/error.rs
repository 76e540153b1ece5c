//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("device {label:?} in lab {lab_id} has no ip")]
    EmptyIdentity { lab_id: String, label: String },

    #[error("device {0} is configured more than once")]
    DuplicateIdentity(String),

    #[error("device {0} enables neither ping nor http, so it has no primary probe")]
    NoPrimaryProbe(String),

    #[error("device {0} enables an http check without a url")]
    MissingHttpUrl(String),

    #[error("device {0} has ssh credentials without a username")]
    MissingSshUsername(String),
}
