//! Shared types and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - Money types with integer minor units
//! - Typed, prefix-tagged IDs for type-safe entity references
//! - Pagination types for list operations
//! - Configuration management

pub mod config;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, LedgerConfig, RetryConfig};
