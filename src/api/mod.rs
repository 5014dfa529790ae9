pub mod bitso;
pub mod pushover;
pub mod sheets;

pub use bitso::{BitsoClient, FeedError, RetryPolicy};
pub use pushover::PushoverClient;
pub use sheets::{SheetsAuth, SheetsLedger};
