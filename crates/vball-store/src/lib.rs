//! SQLite persistence for the rally scanner.
//!
//! Provides:
//! - [`Database`]: pooled connection with embedded migrations
//! - [`PersistenceGateway`]: the rally and catalog operations the scanner uses
//! - [`catalog`]: insert helpers for seeding matches

pub mod catalog;
pub mod db;
pub mod error;
pub mod gateway;
pub mod metrics;
mod rows;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use gateway::{validate_new_rally, PersistenceGateway, SqliteGateway};
