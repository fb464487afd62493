//! Personal and global overviews.
//!
//! Personal overviews are recomputed from a user's stored detections on every
//! request. The global overview aggregates in SQL and is cached for
//! `analytics.global_refresh_secs`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ranking::{rank_counts, top_entities, Entity, RankedEntry};
use super::trends::{monthly_activity, weekly_activity, MonthlyCount, MonthlyGrowth, WeeklyCount};
use crate::config::AnalyticsConfig;
use crate::db::{Database, GlobalTotals};
use crate::error::{Error, Result};
use crate::stats::UserStats;
use crate::types::DetectionEvent;

/// One user's analytics view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalOverview {
    pub total_detections: u64,
    pub successful_detections: u64,
    /// Percent, 0 when there are no detections
    pub success_rate: f64,
    /// Mean confidence as a percent, 0 when there are no detections
    pub average_confidence: f64,
    pub top_diseases: Vec<RankedEntry>,
    pub top_plants: Vec<RankedEntry>,
    pub monthly_activity: Vec<MonthlyCount>,
    pub weekly_activity: Vec<WeeklyCount>,
    pub recent_detections: Vec<DetectionEvent>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Build a personal overview from a user's detections, newest first.
pub fn personal_overview(
    events: &[DetectionEvent],
    config: &AnalyticsConfig,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
) -> PersonalOverview {
    let stats = UserStats::from_confidences(events.iter().map(|e| (e.confidence, e.created_at)));

    PersonalOverview {
        total_detections: stats.total_detections,
        successful_detections: stats.successful_detections,
        success_rate: stats.success_rate(),
        average_confidence: stats.average_confidence() * 100.0,
        top_diseases: top_entities(events, Entity::Disease, config.top_n),
        top_plants: top_entities(events, Entity::Plant, config.top_n),
        monthly_activity: monthly_activity(events),
        weekly_activity: weekly_activity(events),
        recent_detections: events
            .iter()
            .take(config.recent_limit as usize)
            .cloned()
            .collect(),
        period_start,
        period_end,
    }
}

/// Store-wide analytics view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalOverview {
    pub total_users: u64,
    pub active_users: u64,
    pub total_detections: u64,
    /// Mean confidence over all detections, as a percent
    pub average_accuracy: f64,
    pub success_rate: f64,
    pub average_detections_per_user: f64,
    pub top_diseases: Vec<RankedEntry>,
    pub top_plants: Vec<RankedEntry>,
    pub monthly_growth: Vec<MonthlyGrowth>,
    pub computed_at: DateTime<Utc>,
}

/// Compute the global overview from storage.
pub async fn compute_global(
    db: &Database,
    config: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> Result<GlobalOverview> {
    let active_since = TimeDelta::try_days(config.active_window_days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            Error::Config(format!(
                "analytics.active_window_days out of range: {}",
                config.active_window_days
            ))
        })?;
    let snapshot = db.global_snapshot(active_since).await?;

    Ok(assemble_global(
        &snapshot.totals,
        rank_counts(snapshot.disease_counts, config.top_n),
        rank_counts(snapshot.plant_counts, config.top_n),
        snapshot.monthly_growth,
        now,
    ))
}

fn assemble_global(
    totals: &GlobalTotals,
    top_diseases: Vec<RankedEntry>,
    top_plants: Vec<RankedEntry>,
    monthly_growth: Vec<MonthlyGrowth>,
    computed_at: DateTime<Utc>,
) -> GlobalOverview {
    let detections = totals.total_detections as f64;
    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };

    GlobalOverview {
        total_users: totals.total_users,
        active_users: totals.active_users,
        total_detections: totals.total_detections,
        average_accuracy: ratio(totals.sum_confidence, detections) * 100.0,
        success_rate: ratio(totals.successful_detections as f64, detections) * 100.0,
        average_detections_per_user: ratio(detections, totals.total_users as f64),
        top_diseases,
        top_plants,
        monthly_growth,
        computed_at,
    }
}

/// In-memory cache for the global overview.
pub struct OverviewCache {
    ttl: TimeDelta,
    slot: RwLock<Option<GlobalOverview>>,
}

impl OverviewCache {
    pub fn new(ttl_secs: u64) -> Result<Self> {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                Error::Config(format!(
                    "analytics.global_refresh_secs out of range: {}",
                    ttl_secs
                ))
            })?;
        Ok(Self {
            ttl,
            slot: RwLock::new(None),
        })
    }

    /// Cached overview if it was computed less than the TTL before `now`.
    pub async fn get_fresh(&self, now: DateTime<Utc>) -> Option<GlobalOverview> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|o| now - o.computed_at < self.ttl)
            .cloned()
    }

    pub async fn store(&self, overview: GlobalOverview) {
        *self.slot.write().await = Some(overview);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(plant: &str, disease: &str, confidence: f64, day: u32) -> DetectionEvent {
        DetectionEvent {
            id: format!("d{}", day),
            user_id: "alice".to_string(),
            plant_name: plant.to_string(),
            disease_name: disease.to_string(),
            confidence,
            image_ref: None,
            location: None,
            symptoms: vec![],
            treatment: vec![],
            prevention: vec![],
            created_at: Utc.with_ymd_and_hms(2024, 4, day, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_personal_overview() {
        let overview = personal_overview(&[], &AnalyticsConfig::default(), None, None);
        assert_eq!(overview.total_detections, 0);
        assert_eq!(overview.success_rate, 0.0);
        assert_eq!(overview.average_confidence, 0.0);
        assert!(overview.top_diseases.is_empty());
        assert!(overview.monthly_activity.is_empty());
        assert!(overview.recent_detections.is_empty());
    }

    #[test]
    fn test_personal_overview_numbers() {
        let events = vec![
            event("Potato", "Early Blight", 0.90, 3),
            event("Tomato", "Late Blight", 0.40, 2),
            event("Tomato", "Early Blight", 0.85, 1),
        ];
        let config = AnalyticsConfig {
            recent_limit: 2,
            ..AnalyticsConfig::default()
        };
        let overview = personal_overview(&events, &config, None, None);

        assert_eq!(overview.total_detections, 3);
        assert_eq!(overview.successful_detections, 2);
        assert!((overview.success_rate - 66.666_666).abs() < 1e-3);
        assert!((overview.average_confidence - 71.666_666).abs() < 1e-3);
        assert_eq!(overview.top_diseases[0].name, "Early Blight");
        assert_eq!(overview.top_plants[0].name, "Tomato");
        assert_eq!(overview.recent_detections.len(), 2);
        assert_eq!(overview.recent_detections[0].id, "d3");
    }

    #[test]
    fn test_assemble_global_handles_zero_users() {
        let overview = assemble_global(&GlobalTotals::default(), vec![], vec![], vec![], Utc::now());
        assert_eq!(overview.average_accuracy, 0.0);
        assert_eq!(overview.success_rate, 0.0);
        assert_eq!(overview.average_detections_per_user, 0.0);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let cache = OverviewCache::new(300).unwrap();
        let computed_at = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let overview = assemble_global(&GlobalTotals::default(), vec![], vec![], vec![], computed_at);
        cache.store(overview.clone()).await;

        assert_eq!(
            cache.get_fresh(computed_at + TimeDelta::seconds(299)).await,
            Some(overview)
        );
        assert!(cache
            .get_fresh(computed_at + TimeDelta::seconds(300))
            .await
            .is_none());
    }

    #[test]
    fn test_cache_rejects_unrepresentable_ttl() {
        assert!(matches!(OverviewCache::new(u64::MAX), Err(Error::Config(_))));
        assert!(matches!(
            OverviewCache::new(i64::MAX as u64),
            Err(Error::Config(_))
        ));
        assert!(OverviewCache::new(7 * 86_400).is_ok());
    }

    #[tokio::test]
    async fn test_compute_global_rejects_unrepresentable_window() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().await.unwrap();
        let config = AnalyticsConfig {
            active_window_days: i64::MAX,
            ..AnalyticsConfig::default()
        };
        let result = compute_global(&db, &config, Utc::now()).await;
        assert!(matches!(result, Err(Error::Config(_))));

        let overview = compute_global(&db, &AnalyticsConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(overview.total_users, 0);
    }
}
