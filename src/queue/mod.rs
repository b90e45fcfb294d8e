pub mod backoff;
pub mod error;
pub mod repository;

pub use backoff::retry_backoff;
pub use error::QueueError;
pub use repository::{FailOutcome, TaskQueue};
