pub mod config;
pub mod error;
pub mod limiter;
pub mod retry;
pub mod types;

pub use config::Config;
pub use error::{IngestError, Result};
pub use limiter::{AdaptiveLimiter, Permit};
pub use retry::{retry_with_backoff, BackoffPolicy};
