//! # plantdoc-core
//!
//! Core library for plantdoc, the statistics and history backend of a
//! plant-disease detection service.
//!
//! This library provides:
//! - Domain types for users, detections, and chat exchanges
//! - SQLite storage with running per-user aggregates
//! - Paginated history queries and analytics overviews
//! - Clients for plant identification, text generation, and weather
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! A detection is validated, then appended to storage in the same
//! transaction that folds it into the owner's [`UserStats`]. Read-side views
//! (history pages, personal and global overviews) are computed from the
//! stored detections. [`PlantDoc`] wires everything together and checks that
//! the [`Caller`] owns the data it asks for.
//!
//! ## Example
//!
//! ```rust,no_run
//! use plantdoc_core::{Caller, Config, Database, NewDetection, NewUser, PlantDoc};
//!
//! # async fn run() -> plantdoc_core::Result<()> {
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate().await?;
//!
//! let doc = PlantDoc::from_config(config, db)?;
//! doc.create_user(NewUser::new("alice")).await?;
//! let alice = Caller::new("alice");
//! doc.record_detection(&alice, "alice", NewDetection::new("Tomato", "Early Blight", 0.85))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{GlobalOverview, PersonalOverview, RankedEntry};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use history::{HistoryPage, HistoryQuery};
pub use service::{Analysis, ChatPage, ForecastReport, PlantDoc, WeatherReport};
pub use stats::UserStats;
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod logging;
pub mod service;
pub mod stats;
pub mod types;
pub mod upstream;
