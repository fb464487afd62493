//! Paginated, filtered detection history
//!
//! A [`HistoryQuery`] is validated and normalized against the configured page
//! limits before it reaches storage. Storage returns events newest first
//! (`created_at DESC, id DESC`) so that pages are stable across repeated calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use crate::types::DetectionEvent;

/// Filters and paging for one history request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// 1-based page number; defaults to 1
    pub page: Option<u32>,
    /// Page size; defaults to `history.default_page_size`
    pub limit: Option<u32>,
    /// Exact plant name
    pub plant: Option<String>,
    /// Exact disease name
    pub disease: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub end: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Validate and fill in defaults.
    ///
    /// A zero page or limit, or `start > end`, is rejected. A limit above
    /// `max_page_size` is clamped down to it.
    pub fn normalize(&self, config: &HistoryConfig) -> Result<HistoryFilter> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(Error::Validation("page must be at least 1".to_string()));
        }
        let limit = self.limit.unwrap_or(config.default_page_size);
        if limit == 0 {
            return Err(Error::Validation("limit must be at least 1".to_string()));
        }
        let limit = limit.min(config.max_page_size);

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(Error::Validation(
                    "start date must not be after end date".to_string(),
                ));
            }
        }

        Ok(HistoryFilter {
            page,
            limit,
            plant: non_empty(&self.plant),
            disease: non_empty(&self.disease),
            start: self.start,
            end: self.end,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A validated history query as handed to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilter {
    pub page: u32,
    pub limit: u32,
    pub plant: Option<String>,
    pub disease: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// One page of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub events: Vec<DetectionEvent>,
    /// Number of events matching the filters, across all pages
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl HistoryPage {
    pub fn new(events: Vec<DetectionEvent>, total: u64, filter: &HistoryFilter) -> Self {
        Self {
            events,
            total,
            page: filter.page,
            limit: filter.limit,
            pages: page_count(total, filter.limit),
        }
    }
}

/// `ceil(total / limit)`
pub fn page_count(total: u64, limit: u32) -> u64 {
    if limit == 0 {
        0
    } else {
        total.div_ceil(u64::from(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_applied() {
        let filter = HistoryQuery::default()
            .normalize(&HistoryConfig::default())
            .unwrap();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn test_limit_is_clamped() {
        let filter = HistoryQuery::page(3, 500)
            .normalize(&HistoryConfig::default())
            .unwrap();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset(), 200);
    }

    #[test]
    fn test_zero_page_or_limit_rejected() {
        let config = HistoryConfig::default();
        assert!(matches!(
            HistoryQuery::page(0, 10).normalize(&config),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            HistoryQuery::page(1, 0).normalize(&config),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let query = HistoryQuery {
            start: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(query.normalize(&HistoryConfig::default()).is_err());
    }

    #[test]
    fn test_blank_filters_ignored() {
        let query = HistoryQuery {
            plant: Some("  ".to_string()),
            disease: Some(" Early Blight ".to_string()),
            ..Default::default()
        };
        let filter = query.normalize(&HistoryConfig::default()).unwrap();
        assert_eq!(filter.plant, None);
        assert_eq!(filter.disease.as_deref(), Some("Early Blight"));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
    }
}
