//! Utility functions

pub mod db_retry;
pub mod text;

pub use db_retry::retry_on_lock;
