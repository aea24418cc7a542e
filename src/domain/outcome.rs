// Tagged result shared by every sub-analysis that may be skipped
use serde::Serialize;
use thiserror::Error;

/// Why a sub-analysis did not run. Skips are local: they never abort other analyses.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("missing channel {channel}")]
    MissingChannel { channel: String },
    #[error("insufficient data: {available} {subject}, at least {required} required")]
    InsufficientData {
        subject: &'static str,
        required: usize,
        available: usize,
    },
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },
    #[error("derived column {column} conflicts with a supplied channel")]
    ColumnConflict { column: String },
}

impl SkipReason {
    pub fn missing(channel: impl Into<String>) -> Self {
        SkipReason::MissingChannel {
            channel: channel.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SkipReason::InvalidParameter {
            message: message.into(),
        }
    }
}

/// Precondition check used by every analysis with a minimum input size.
pub fn require(subject: &'static str, required: usize, available: usize) -> Result<(), SkipReason> {
    if available < required {
        return Err(SkipReason::InsufficientData {
            subject,
            required,
            available,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Completed(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    #[cfg(test)]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Skipped(reason) => Some(reason),
        }
    }

    #[cfg(test)]
    pub fn into_result(self) -> Result<T, SkipReason> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::Skipped(reason) => Err(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }
}

impl<T> From<Result<T, SkipReason>> for Outcome<T> {
    fn from(result: Result<T, SkipReason>) -> Self {
        match result {
            Ok(value) => Outcome::Completed(value),
            Err(reason) => Outcome::Skipped(reason),
        }
    }
}
