// Library module for redsync
// Re-exports modules for use in integration tests and the binary

pub mod config;
pub mod error;
pub mod remote;
pub mod sync;
pub mod tree;

pub use error::{Result, SyncError};
