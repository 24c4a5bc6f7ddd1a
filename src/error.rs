//! Error types for the emergency intake core.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Incident error: {0}")]
    Incident(#[from] IncidentError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encrypted-channel errors.
///
/// Variants carry detail for internal logging; the HTTP surface collapses
/// every variant into one opaque failure status so the external client
/// cannot tell which stage failed.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Private key could not be loaded: {0}")]
    KeyLoad(String),

    #[error("Encrypted channel is unavailable (no private key)")]
    Unavailable,

    #[error("Malformed base64 in {field}")]
    Base64 { field: &'static str },

    #[error("Symmetric key unwrap failed")]
    KeyUnwrap,

    #[error("Unsupported symmetric key length: {0} bytes")]
    KeyLength(usize),

    #[error("Unsupported nonce length: {0} bytes")]
    NonceLength(usize),

    #[error("Authenticated decryption failed")]
    Open,

    #[error("Authenticated encryption failed")]
    Seal,

    #[error("Decrypted payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Member directory errors. A clean "no such member" is `Ok(None)` on the
/// trait, not an error.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Member lookup failed: {0}")]
    Lookup(String),

    #[error("Next-of-kin lookup failed: {0}")]
    NextOfKin(String),
}

/// Incident store errors.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("Incident creation failed: {0}")]
    Create(String),

    #[error("Incident draft is incomplete: missing {0}")]
    MissingField(&'static str),
}

/// Outbound channel errors. Never retried here; delivery retries belong to
/// the messaging collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send {kind} message to {to}: {reason}")]
    SendFailed {
        kind: &'static str,
        to: String,
        reason: String,
    },

    #[error("Outbound API rejected request: {status} {body}")]
    ApiRejected { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Encrypted-form protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Malformed flow payload: {0}")]
    Payload(String),
}

/// Result type alias for the intake core.
pub type Result<T> = std::result::Result<T, Error>;
