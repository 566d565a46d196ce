use thiserror::Error;

/// Main error type for the watchdog
#[derive(Error, Debug)]
pub enum WatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Collaborator errors
    #[error("Container command failed: {container} - {reason}")]
    Container { container: String, reason: String },

    #[error("Torrent RPC error: {0}")]
    Rpc(String),

    #[error("Media server error: {0}")]
    MediaServer(String),

    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("DNS lookup error: {0}")]
    Resolve(#[from] hickory_resolver::error::ResolveError),

    #[error("Deluge config error: {0}")]
    DelugeConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WatchError
pub type Result<T> = std::result::Result<T, WatchError>;

impl WatchError {
    /// Build a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        WatchError::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Build a container error
    pub fn container(container: &str, reason: impl Into<String>) -> Self {
        WatchError::Container {
            container: container.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the error means the condition could not be determined
    /// rather than observed to be false.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            WatchError::Config(_)
                | WatchError::InvalidConfig(_)
                | WatchError::Internal(_)
                | WatchError::Cancelled
        )
    }
}
