pub mod calendar;
pub mod rate_limiter;
pub mod retry;

pub use calendar::{CalendarNormalizer, OffsetDate, ROC_OFFSET};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
