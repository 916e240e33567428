//! # Kritikos Common Library
//!
//! Shared code for the Kritikos services:
//! - Database schema and initialization
//! - Row models shared between the ETL loaders and the analysis pipeline
//! - Event types (KritikosEvent) and the broadcast event bus
//! - Configuration file loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
