use serde::Serialize;
use std::fmt;

pub const CODE_VALIDATION: &str = "ERR_VALIDATION";
pub const CODE_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const CODE_SYSTEM: &str = "ERR_SYSTEM";
pub const CODE_TIMEOUT: &str = "ERR_TIMEOUT";
pub const CODE_STATE: &str = "ERR_STATE";

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(CODE_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(CODE_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(CODE_SYSTEM, message, trace_id)
    }

    /// A remote command exceeded its time budget and was killed.
    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(CODE_TIMEOUT, message, trace_id)
    }

    /// An operation was called in a lifecycle state that does not allow it.
    pub fn state(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(CODE_STATE, message, trace_id)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == CODE_TIMEOUT
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::state("monitor already running", "trace-1");
        assert_eq!(err.to_string(), "monitor already running (ERR_STATE)");
        assert_eq!(err.trace_id, "trace-1");
    }

    #[test]
    fn timeout_is_distinguishable() {
        assert!(AppError::timeout("Command timed out", "t").is_timeout());
        assert!(!AppError::system("boom", "t").is_timeout());
    }
}
