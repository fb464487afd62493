//! Analytics for plantdoc
//!
//! Provides:
//! - Frequency rankings of plants and diseases ([`ranking`])
//! - Monthly and weekly activity buckets ([`trends`])
//! - Personal and global overviews ([`overview`])
//!
//! Ranking and bucketing are pure functions over detection events. Only the
//! global overview reads storage directly.

pub mod overview;
pub mod ranking;
pub mod trends;

pub use overview::{GlobalOverview, OverviewCache, PersonalOverview};
pub use ranking::{top_entities, Entity, RankedEntry};
pub use trends::{monthly_activity, weekly_activity, MonthlyCount, MonthlyGrowth, WeeklyCount};
