//! Cross-cutting configuration error.

/// A wiring mistake: missing mapper, duplicate registration, incompatible
/// option combination. Fatal to the component that detects it.
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
