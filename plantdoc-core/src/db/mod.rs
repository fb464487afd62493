//! Database layer for plantdoc
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Transactional detection writes that keep user stats in step

pub mod repo;
pub mod schema;

pub use repo::{Database, GlobalSnapshot, GlobalTotals};
