//! Running per-user detection aggregates
//!
//! [`UserStats`] is updated incrementally as detections are recorded and
//! removed. The transitions here are pure; the storage layer applies them
//! inside the same transaction that writes the detection row.
//!
//! The running *sum* of confidences is kept rather than the running average,
//! so that removing a detection restores the exact mean of what remains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A detection counts as successful when its confidence is strictly above this.
pub const SUCCESS_THRESHOLD: f64 = 0.5;

/// Whether a detection with this confidence counts as successful.
pub fn is_successful(confidence: f64) -> bool {
    confidence > SUCCESS_THRESHOLD
}

/// Aggregate counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_detections: u64,
    pub successful_detections: u64,
    /// Sum of the confidences of all counted detections
    pub sum_confidence: f64,
    pub last_detection_at: Option<DateTime<Utc>>,
}

impl UserStats {
    /// Mean confidence over all counted detections, 0 when there are none.
    pub fn average_confidence(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            self.sum_confidence / self.total_detections as f64
        }
    }

    /// Percentage of detections above the success threshold.
    pub fn success_rate(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            self.successful_detections as f64 / self.total_detections as f64 * 100.0
        }
    }

    /// Stats after recording one more detection at `at`.
    pub fn record(&self, confidence: f64, at: DateTime<Utc>) -> UserStats {
        UserStats {
            total_detections: self.total_detections + 1,
            successful_detections: self.successful_detections
                + u64::from(is_successful(confidence)),
            sum_confidence: self.sum_confidence + confidence,
            last_detection_at: Some(at),
        }
    }

    /// Stats after removing a detection with the given confidence.
    ///
    /// Counters floor at zero. `last_detection_at` is left as is.
    pub fn remove(&self, confidence: f64) -> UserStats {
        let total_detections = self.total_detections.saturating_sub(1);
        let successful_detections = if is_successful(confidence) {
            self.successful_detections.saturating_sub(1)
        } else {
            self.successful_detections
        }
        .min(total_detections);
        let sum_confidence = if total_detections == 0 {
            0.0
        } else {
            (self.sum_confidence - confidence).max(0.0)
        };

        UserStats {
            total_detections,
            successful_detections,
            sum_confidence,
            last_detection_at: self.last_detection_at,
        }
    }

    /// Rebuild stats from scratch out of a set of detections.
    pub fn from_confidences<I>(items: I) -> UserStats
    where
        I: IntoIterator<Item = (f64, DateTime<Utc>)>,
    {
        items
            .into_iter()
            .fold(UserStats::default(), |stats, (confidence, at)| {
                let mut next = stats.record(confidence, at);
                next.last_detection_at = match stats.last_detection_at {
                    Some(prev) if prev > at => Some(prev),
                    _ => Some(at),
                };
                next
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn incremental_average(old_avg: f64, old_total: u64, c: f64) -> f64 {
        if old_total == 0 {
            c
        } else {
            (old_avg * old_total as f64 + c) / (old_total as f64 + 1.0)
        }
    }

    #[test]
    fn test_first_detection_sets_average_to_its_confidence() {
        let stats = UserStats::default().record(0.85, at(1));
        assert_eq!(stats.total_detections, 1);
        assert_eq!(stats.successful_detections, 1);
        assert!((stats.average_confidence() - 0.85).abs() < 1e-12);
        assert_eq!(stats.last_detection_at, Some(at(1)));
    }

    #[test]
    fn test_record_matches_incremental_formula() {
        let mut stats = UserStats::default();
        let mut avg = 0.0;
        for (i, c) in [0.85, 0.40, 0.90, 0.10, 0.51].iter().enumerate() {
            avg = incremental_average(avg, stats.total_detections, *c);
            stats = stats.record(*c, at(i as u32 + 1));
            assert!((stats.average_confidence() - avg).abs() < 1e-9);
        }
        assert_eq!(stats.total_detections, 5);
        assert_eq!(stats.successful_detections, 3);
    }

    #[test]
    fn test_threshold_is_strict() {
        let stats = UserStats::default().record(0.5, at(1));
        assert_eq!(stats.successful_detections, 0);
        let stats = stats.record(0.500001, at(2));
        assert_eq!(stats.successful_detections, 1);
    }

    #[test]
    fn test_remove_restores_exact_mean() {
        let stats = UserStats::default()
            .record(0.85, at(1))
            .record(0.40, at(2))
            .record(0.90, at(3));
        let after = stats.remove(0.40);
        assert_eq!(after.total_detections, 2);
        assert_eq!(after.successful_detections, 2);
        assert!((after.average_confidence() - 0.875).abs() < 1e-9);
        assert_eq!(after.last_detection_at, Some(at(3)));
    }

    #[test]
    fn test_remove_floors_at_zero() {
        let stats = UserStats::default().remove(0.9);
        assert_eq!(stats.total_detections, 0);
        assert_eq!(stats.successful_detections, 0);
        assert_eq!(stats.sum_confidence, 0.0);

        let emptied = UserStats::default().record(0.3, at(1)).remove(0.3);
        assert_eq!(emptied.total_detections, 0);
        assert_eq!(emptied.average_confidence(), 0.0);
    }

    #[test]
    fn test_from_confidences_keeps_latest_timestamp() {
        let stats = UserStats::from_confidences([(0.9, at(5)), (0.2, at(2))]);
        assert_eq!(stats.total_detections, 2);
        assert_eq!(stats.successful_detections, 1);
        assert_eq!(stats.last_detection_at, Some(at(5)));
        assert!((stats.success_rate() - 50.0).abs() < 1e-9);
    }
}
