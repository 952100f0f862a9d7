pub mod batch;
pub mod queue;
pub mod retry;

pub use batch::{BatchOutcome, BatchScheduler, SchedulerConfig, TickOutcome};
pub use queue::{PendingRequest, RequestQueue};
pub use retry::RetryPolicy;
