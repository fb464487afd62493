//! Frequency rankings of plants and diseases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::DetectionEvent;

/// Which detection field to rank by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Plant,
    Disease,
}

impl Entity {
    pub fn key<'a>(&self, event: &'a DetectionEvent) -> &'a str {
        match self {
            Entity::Plant => &event.plant_name,
            Entity::Disease => &event.disease_name,
        }
    }

    /// Storage column holding this field
    pub fn column(&self) -> &'static str {
        match self {
            Entity::Plant => "plant_name",
            Entity::Disease => "disease_name",
        }
    }
}

/// One row of a top-N ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub count: u64,
    /// Share of all ranked events, 0..=100
    pub percentage: f64,
}

/// Top `n` values of `entity` among `events`.
pub fn top_entities(events: &[DetectionEvent], entity: Entity, n: usize) -> Vec<RankedEntry> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for event in events {
        *counts.entry(entity.key(event)).or_default() += 1;
    }
    rank_counts(
        counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        n,
    )
}

/// Turn raw `(name, count)` pairs into a ranking.
///
/// Ordered by count descending, then name ascending. Percentages are relative
/// to the sum of all counts, including those cut off by `n`.
pub fn rank_counts(mut counts: Vec<(String, u64)>, n: usize) -> Vec<RankedEntry> {
    let total: u64 = counts.iter().map(|(_, c)| c).sum();
    if total == 0 {
        return Vec::new();
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
        .into_iter()
        .take(n)
        .map(|(name, count)| RankedEntry {
            name,
            count,
            percentage: count as f64 / total as f64 * 100.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(plant: &str, disease: &str) -> DetectionEvent {
        DetectionEvent {
            id: format!("{}-{}", plant, disease),
            user_id: "u".to_string(),
            plant_name: plant.to_string(),
            disease_name: disease.to_string(),
            confidence: 0.5,
            image_ref: None,
            location: None,
            symptoms: vec![],
            treatment: vec![],
            prevention: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_input_yields_empty_ranking() {
        assert!(top_entities(&[], Entity::Disease, 5).is_empty());
    }

    #[test]
    fn test_counts_and_percentages() {
        let events = vec![
            event("Tomato", "Early Blight"),
            event("Tomato", "Late Blight"),
            event("Potato", "Early Blight"),
        ];
        let top = top_entities(&events, Entity::Disease, 5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "Early Blight");
        assert_eq!(top[0].count, 2);
        assert!((top[0].percentage - 66.666_666).abs() < 1e-3);
        assert_eq!(top[1].name, "Late Blight");
        assert!((top[1].percentage - 33.333_333).abs() < 1e-3);

        let plants = top_entities(&events, Entity::Plant, 1);
        assert_eq!(plants.len(), 1);
        assert_eq!(plants[0].name, "Tomato");
    }

    #[test]
    fn test_ties_break_by_name() {
        let ranked = rank_counts(
            vec![
                ("Rust".to_string(), 2),
                ("Anthracnose".to_string(), 2),
                ("Mildew".to_string(), 3),
            ],
            5,
        );
        let names: Vec<_> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Mildew", "Anthracnose", "Rust"]);
    }

    #[test]
    fn test_truncation_keeps_global_percentages() {
        let ranked = rank_counts(vec![("a".to_string(), 3), ("b".to_string(), 1)], 1);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].percentage - 75.0).abs() < 1e-9);
    }
}
