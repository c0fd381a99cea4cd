pub mod claims;
pub mod events;
pub mod items;
pub mod notifications;
pub mod pool;
pub mod schedules;
pub mod transaction;
pub mod users;

pub use pool::create_pool;
pub use transaction::{with_transaction, RetryConfig, RetryDecision, TxFuture, TxMode};
