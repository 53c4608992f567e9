use thiserror::Error;

/// Detailed error types for refinement operations.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Service returned status {code}: {message}")]
    BadResponse { code: u16, message: String },

    #[error("Service returned an empty response body")]
    EmptyResponse,

    #[error("Call to {operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context error: {0}")]
    Context(String),
}

impl RefineError {
    /// Check if this error is transient and could succeed on a later call.
    ///
    /// The engine itself never retries within an iteration (a failed call
    /// degrades to the heuristic path for that iteration only); this is for
    /// callers that wrap their own retry policy around a service binding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ServiceUnavailable { .. } | Self::Timeout { .. } => {
                true
            }
            Self::BadResponse { code, .. } => *code == 503 || *code == 429,
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Get suggested retry delay in seconds, if applicable.
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::ServiceUnavailable { .. } | Self::Timeout { .. } => Some(5),
            Self::BadResponse { code: 429, message } => parse_retry_delay_hint(message),
            _ => None,
        }
    }

    pub(crate) fn truncate_for_display(text: &str, max_len: usize) -> String {
        if text.len() <= max_len {
            text.to_string()
        } else {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... [truncated, {} total chars]",
                &text[..end],
                text.len()
            )
        }
    }
}

/// Scan an error body for a retry hint like "retry in 57s" or "retry in 488.04ms".
fn parse_retry_delay_hint(message: &str) -> Option<u64> {
    let lower = message.to_lowercase();
    let idx = lower.find("retry in ")?;
    let remainder = &lower[idx + "retry in ".len()..];
    let end = remainder
        .find(|c: char| !c.is_numeric() && c != '.' && c != 'm' && c != 's')
        .unwrap_or(remainder.len());
    parse_duration_string(&remainder[..end])
}

/// Parse duration strings like "44s", "44.5s", "500ms".
fn parse_duration_string(s: &str) -> Option<u64> {
    let s = s.trim();

    if let Some(ms_part) = s.strip_suffix("ms") {
        if let Ok(ms) = ms_part.parse::<f64>() {
            if ms <= 0.0 {
                return Some(0);
            }
            let secs = (ms / 1000.0).ceil() as u64;
            return Some(secs.max(1));
        }
    }

    if let Some(s_part) = s.strip_suffix('s') {
        if let Ok(secs) = s_part.parse::<f64>() {
            return Some(secs.ceil() as u64);
        }
    }

    None
}

pub type Result<T> = std::result::Result<T, RefineError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<RefineError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            RefineError::Context(format!("{}: {}", context.into(), base_err))
        })
    }
}
