use thiserror::Error;

/// Error taxonomy for the ingestion engine (see spec §7).
///
/// Variants map 1:1 onto the kinds a processor must branch on: some are
/// retryable by the source client itself, some trigger fallback to the next
/// provider, and only `Config`/`Auth` unwind out of a phase.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error calling {provider}/{endpoint}: {message}")]
    Transport {
        provider: String,
        endpoint: String,
        message: String,
    },

    #[error("throttled by {provider}/{endpoint}")]
    Throttled { provider: String, endpoint: String },

    #[error("not found: {provider}/{endpoint} symbol={symbol:?}")]
    NotFound {
        provider: String,
        endpoint: String,
        symbol: Option<String>,
    },

    #[error("auth error for provider {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("parse error from {provider}/{endpoint}: {message}")]
    Parse {
        provider: String,
        endpoint: String,
        message: String,
    },

    #[error("persistence error in chunk {chunk_index} ({row_count} rows): {message}")]
    Persistence {
        chunk_index: usize,
        row_count: usize,
        message: String,
    },

    #[error("data invariant violated: {0}")]
    DataInvariant(String),

    #[error("operation canceled")]
    Canceled,
}

impl IngestError {
    /// Identifies the provider this error originated from, when applicable.
    pub fn provider(&self) -> Option<&str> {
        match self {
            IngestError::Transport { provider, .. }
            | IngestError::Throttled { provider, .. }
            | IngestError::NotFound { provider, .. }
            | IngestError::Auth { provider, .. }
            | IngestError::Parse { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Whether the source client should retry this error itself (as opposed
    /// to the caller choosing a fallback provider).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Transport { .. } | IngestError::Throttled { .. } | IngestError::Parse { .. }
        )
    }

    /// Attempt budget for this error kind (§4.3): transport/throttle errors
    /// get the full jittered-backoff budget, a parse error gets one retry
    /// and then is reported as a failure.
    pub fn max_attempts(&self, policy_default: u32) -> u32 {
        match self {
            IngestError::Parse { .. } => 2,
            _ => policy_default,
        }
    }

    /// Whether this error is fatal for the remainder of the run (unwinds a
    /// phase rather than being recorded and retried/falled-back).
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config(_) | IngestError::Auth { .. })
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
