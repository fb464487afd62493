//! Time-bucketed detection counts.
//!
//! Buckets are UTC. Monthly keys are `YYYY-MM`; weekly keys are ISO weeks
//! (`YYYY-Www`), so both sort chronologically as plain strings.

use chrono::{Datelike, DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::DetectionEvent;

/// Detection count for one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub month: String,
    pub count: u64,
}

/// Detection count for one ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyCount {
    pub week: String,
    pub count: u64,
}

/// Store-wide activity for one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyGrowth {
    pub month: String,
    pub detections: u64,
    /// Distinct users with a detection in the month
    pub users: u64,
}

pub fn month_key(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

pub fn week_key(at: &DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

fn bucket<F>(events: &[DetectionEvent], key: F) -> BTreeMap<String, u64>
where
    F: Fn(&DateTime<Utc>) -> String,
{
    let mut buckets = BTreeMap::new();
    for event in events {
        *buckets.entry(key(&event.created_at)).or_insert(0) += 1;
    }
    buckets
}

/// Detections per month, oldest first.
pub fn monthly_activity(events: &[DetectionEvent]) -> Vec<MonthlyCount> {
    bucket(events, month_key)
        .into_iter()
        .map(|(month, count)| MonthlyCount { month, count })
        .collect()
}

/// Detections per ISO week, oldest first.
pub fn weekly_activity(events: &[DetectionEvent]) -> Vec<WeeklyCount> {
    bucket(events, week_key)
        .into_iter()
        .map(|(week, count)| WeeklyCount { week, count })
        .collect()
}
