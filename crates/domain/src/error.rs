/// Shared error type used across the runtime's crates.
///
/// Every variant maps to exactly one [`ErrorCategory`] via [`Error::category`];
/// the category, not the variant, is what recovery/propagation policy keys off.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider {provider} rate limited: {message}")]
    ProviderRateLimit { provider: String, message: String },

    #[error("provider {provider} auth failed: {message}")]
    ProviderAuth { provider: String, message: String },

    #[error("token limit exceeded: {0}")]
    TokenLimit(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {tool} execution failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool {tool} blocked: {reason}")]
    ToolBlocked { tool: String, reason: String },

    #[error("tool {tool} blocked by guardrail: {reason}")]
    GuardrailBlocked { tool: String, reason: String },

    #[error("aborted")]
    Abort,

    #[error("summarizer failed: {0}")]
    Summarizer(String),

    #[error("failed to append to durable log: {0}")]
    LogAppend(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

/// Error taxonomy used for recovery and propagation decisions. Several
/// [`Error`] variants can map to the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TokenLimit,
    ProviderTransport,
    ProviderRateLimit,
    ProviderAuth,
    ToolNotFound,
    ToolExecution,
    ToolBlocked,
    Abort,
    SummarizerFailure,
    LogAppend,
    Other,
}

impl Error {
    /// Classify this error for recovery/propagation purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::TokenLimit(_) => ErrorCategory::TokenLimit,
            Error::Http(_) | Error::Timeout(_) | Error::Provider { .. } => {
                ErrorCategory::ProviderTransport
            }
            Error::ProviderRateLimit { .. } => ErrorCategory::ProviderRateLimit,
            Error::ProviderAuth { .. } => ErrorCategory::ProviderAuth,
            Error::ToolNotFound(_) => ErrorCategory::ToolNotFound,
            Error::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Error::ToolBlocked { .. } | Error::GuardrailBlocked { .. } => ErrorCategory::ToolBlocked,
            Error::Abort => ErrorCategory::Abort,
            Error::Summarizer(_) => ErrorCategory::SummarizerFailure,
            Error::LogAppend(_) => ErrorCategory::LogAppend,
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Auth(_) | Error::Other(_) => {
                ErrorCategory::Other
            }
        }
    }

    /// Whether this category of error should never be shown to the caller as
    /// an `error` field — abort surfaces as `{success:false, interrupted:true}`.
    pub fn is_abort(&self) -> bool {
        matches!(self.category(), ErrorCategory::Abort)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
