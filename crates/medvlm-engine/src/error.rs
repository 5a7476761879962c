use thiserror::Error;

use crate::config::CREDENTIAL_ENV_KEYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fix the environment; retrying will not help.
    Configuration,
    /// The caller passed something the service cannot take.
    Input,
    /// The remote call failed or its reply was unusable.
    RemoteFailure,
    /// The call succeeded but produced nothing.
    EmptyResult,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Input => "input",
            ErrorKind::RemoteFailure => "remote_failure",
            ErrorKind::EmptyResult => "empty_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("API key is missing; set one of {}", CREDENTIAL_ENV_KEYS.join(", "))]
    MissingCredential,
    #[error("model selection failed: {0}")]
    ModelSelection(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("remote request failed: {0}")]
    Transport(String),
    #[error("remote reply could not be decoded: {0}")]
    Decode(String),
    #[error("the service returned no image")]
    NoImage,
    #[error("session event log write failed: {0}")]
    EventLog(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingCredential
            | EngineError::ModelSelection(_)
            | EngineError::EventLog(_) => ErrorKind::Configuration,
            EngineError::InvalidInput(_) => ErrorKind::Input,
            EngineError::Transport(_) | EngineError::Decode(_) => ErrorKind::RemoteFailure,
            EngineError::NoImage => ErrorKind::EmptyResult,
        }
    }

    pub(crate) fn transport(err: &anyhow::Error) -> Self {
        EngineError::Transport(error_chain_text(err, 512))
    }
}

/// Flattens an error chain into one line, skipping repeated messages.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
