use thiserror::Error;

/// Failures while decoding a single wire line. The line is dropped and
/// logged; the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no Command key")]
    MissingCommand,
}

/// Failures from show mutations. Handlers log these locally and no-op; the
/// protocol has no error-response message type.
#[derive(Debug, Error)]
pub enum ShowError {
    #[error("graphic name is empty")]
    InvalidName,
    #[error("graphic '{0}' already exists")]
    DuplicateName(String),
}
