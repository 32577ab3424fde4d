use std::path::PathBuf;
use thiserror::Error;

/// Common error type for the digest pipeline.
#[derive(Error, Debug)]
pub enum DigestError {
    /// Configuration file does not exist.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Configuration failed to parse or violated an invariant.
    #[error("configuration error: {0}")]
    Config(String),

    /// A `${NAME}` placeholder referenced an unset environment variable.
    #[error("environment variable '{0}' referenced in config but not set")]
    MissingEnvVar(String),

    /// No delivery with the requested name exists.
    #[error("unknown delivery '{0}'")]
    DeliveryNotFound(String),

    /// A delivery referenced a feed id absent from the configuration.
    #[error("delivery '{delivery}' references unknown feed id '{feed_id}'")]
    UnknownFeedId { delivery: String, feed_id: String },

    /// Fetching or parsing a single feed failed. Recovered by the
    /// collector; the source is skipped.
    #[error("failed to fetch feed {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Building the shared HTTP client failed at startup.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// SMTP connection, authentication, or send failure.
    #[error("mail transport error: {0}")]
    Transport(String),

    /// Building the outbound message failed.
    #[error("mail message error: {0}")]
    Mail(String),
}

impl From<lettre::transport::smtp::Error> for DigestError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        DigestError::Transport(e.to_string())
    }
}

impl From<lettre::error::Error> for DigestError {
    fn from(e: lettre::error::Error) -> Self {
        DigestError::Mail(e.to_string())
    }
}

impl From<lettre::address::AddressError> for DigestError {
    fn from(e: lettre::address::AddressError) -> Self {
        DigestError::Mail(e.to_string())
    }
}

impl From<serde_yaml::Error> for DigestError {
    fn from(e: serde_yaml::Error) -> Self {
        DigestError::Config(e.to_string())
    }
}

/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, DigestError>;
