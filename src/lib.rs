// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod ledger;
pub mod models;
pub mod notify;

// Re-export commonly used types
pub use models::*;
