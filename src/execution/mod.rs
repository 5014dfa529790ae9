// Reconciliation, signal processing and cycle scheduling
pub mod price_feed;
pub mod processor;
pub mod reconciler;
pub mod runner;
pub mod scheduler;

pub use price_feed::{FixedPriceFeed, PriceFeed};
pub use processor::{ActionLink, AlertDecision, NotificationIntent, ProcessOutcome, SignalProcessor};
pub use reconciler::{reconcile, Reconciliation};
pub use runner::{CycleReport, CycleState, Runner};
pub use scheduler::{
    parse_signal_time, wait_until, Clock, ExecutionScheduler, SystemClock, TimestampError,
    WakeBasis, WakePlan,
};
