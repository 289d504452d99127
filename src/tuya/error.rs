use thiserror::Error;

/// Errors raised by the Tuya cloud client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response from Tuya cloud: {0}")]
    Decode(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),

    #[error("Tuya client not connected")]
    NotConnected,

    #[error("Authentication failed (code {code}): {msg}")]
    Authentication { code: i64, msg: String },

    #[error("Tuya {operation} failed (code {code}): {msg}")]
    Backend {
        operation: &'static str,
        code: i64,
        msg: String,
    },
}
