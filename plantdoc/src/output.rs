//! Text and JSON rendering for command results.

use anyhow::Result;
use clap::ValueEnum;
use plantdoc_core::{
    logging, ActivityEntry, Analysis, ChatExchange, ChatPage, ChatSuggestion, Config, DetectionEvent, ForecastReport,
    GlobalOverview, HistoryPage, PersonalOverview, RankedEntry, User, UserPreferences, UserStats,
    WeatherReport,
};
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

pub struct Printer {
    format: Format,
}

impl Printer {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    /// Print `value` as JSON, or run `text` for the human-readable form.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        match self.format {
            Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Format::Text => text(value),
        }
        Ok(())
    }

    pub fn config(&self, config: &Config) -> Result<()> {
        let log_file = logging::log_file_for(Utc::now().date_naive());
        let summary = serde_json::json!({
            "config_path": Config::config_path(),
            "database_path": Config::database_path(),
            "log_dir": Config::state_dir(),
            "log_file": log_file,
            "services": {
                "plant_id": config.plant_id.is_ready(),
                "llm": config.llm.is_ready(),
                "weather": config.weather.is_ready(),
            },
        });
        let ready = |ok: bool| if ok { "ready" } else { "not configured" };
        self.emit(&summary, |_| {
            println!("Config:   {}", Config::config_path().display());
            println!("Database: {}", Config::database_path().display());
            println!("Logs:     {}", Config::state_dir().display());
            println!("Today:    {}", log_file.display());
            println!();
            println!("plant_id: {}", ready(config.plant_id.is_ready()));
            println!("llm:      {}", ready(config.llm.is_ready()));
            println!("weather:  {}", ready(config.weather.is_ready()));
        })
    }

    pub fn user(&self, user: &User) -> Result<()> {
        self.emit(user, |u| {
            println!("User: {}", u.id);
            if let Some(name) = &u.display_name {
                println!("  Name: {}", name);
            }
            if let Some(email) = &u.email {
                println!("  Email: {}", email);
            }
            println!("  Created: {}", u.created_at.format("%Y-%m-%d %H:%M"));
            print_stats(&u.stats);
        })
    }

    pub fn preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        self.emit(prefs, |p| {
            println!("Preferences for {}:", user_id);
            println!("  Language:      {}", p.language.as_str());
            println!("  Units:         {}", p.units.as_str());
            println!("  Notifications: {}", p.notifications);
            println!("  Dark mode:     {}", p.dark_mode);
            println!("  Auto location: {}", p.auto_location);
        })
    }

    pub fn stats(&self, user_id: &str, stats: &UserStats) -> Result<()> {
        self.emit(stats, |s| {
            println!("Stats for {}:", user_id);
            print_stats(s);
        })
    }

    pub fn detection(&self, event: &DetectionEvent) -> Result<()> {
        self.emit(event, |e| {
            println!("Detection {}", e.id);
            println!("  {}", detection_line(e));
            if let Some(image) = &e.image_ref {
                println!("  Image: {}", image);
            }
            if let Some(point) = &e.location {
                println!("  Location: {:.4}, {:.4}", point.latitude, point.longitude);
            }
            print_list("Symptoms", &e.symptoms);
            print_list("Treatment", &e.treatment);
            print_list("Prevention", &e.prevention);
        })
    }

    pub fn history(&self, page: &HistoryPage) -> Result<()> {
        self.emit(page, |p| {
            if p.events.is_empty() {
                println!("No detections found.");
            }
            for event in &p.events {
                println!("{}  {}", short_id(&event.id), detection_line(event));
            }
            println!();
            println!(
                "Page {} of {} ({} detection(s) total)",
                p.page,
                p.pages.max(1),
                p.total
            );
        })
    }

    pub fn activity(&self, entries: &[ActivityEntry]) -> Result<()> {
        self.emit(&entries, |list| {
            if list.is_empty() {
                println!("No recent activity.");
            }
            for entry in list.iter() {
                println!(
                    "{}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.description
                );
            }
        })
    }

    pub fn personal(&self, overview: &PersonalOverview) -> Result<()> {
        self.emit(overview, |o| {
            println!("Detections:         {}", o.total_detections);
            println!("Successful:         {}", o.successful_detections);
            println!("Success rate:       {:.1}%", o.success_rate);
            println!("Average confidence: {:.1}%", o.average_confidence);
            print_ranking("Top diseases", &o.top_diseases);
            print_ranking("Top plants", &o.top_plants);
            if !o.monthly_activity.is_empty() {
                println!("\nMonthly activity:");
                for month in &o.monthly_activity {
                    println!("  {}  {}", month.month, month.count);
                }
            }
            if !o.recent_detections.is_empty() {
                println!("\nRecent:");
                for event in &o.recent_detections {
                    println!("  {}", detection_line(event));
                }
            }
        })
    }

    pub fn global(&self, overview: &GlobalOverview) -> Result<()> {
        self.emit(overview, |o| {
            println!("Users:              {} ({} active)", o.total_users, o.active_users);
            println!("Detections:         {}", o.total_detections);
            println!("Average accuracy:   {:.1}%", o.average_accuracy);
            println!("Success rate:       {:.1}%", o.success_rate);
            println!("Detections/user:    {:.2}", o.average_detections_per_user);
            print_ranking("Top diseases", &o.top_diseases);
            print_ranking("Top plants", &o.top_plants);
            if !o.monthly_growth.is_empty() {
                println!("\nMonthly growth:");
                for month in &o.monthly_growth {
                    println!(
                        "  {}  {} detection(s), {} user(s)",
                        month.month, month.detections, month.users
                    );
                }
            }
            println!("\nComputed at {}", o.computed_at.format("%Y-%m-%d %H:%M:%S UTC"));
        })
    }

    pub fn analysis(&self, analysis: &Analysis) -> Result<()> {
        self.emit(analysis, |a| {
            let id = &a.identification;
            println!(
                "Plant:   {} ({:.0}%)",
                id.plant_name,
                id.plant_confidence * 100.0
            );
            println!("Disease: {} ({:.0}%)", id.disease_name, id.confidence * 100.0);
            print_list("Symptoms", &a.info.symptoms);
            print_list("Diagnosis", &a.info.diagnosis);
            print_list("Treatment", &a.info.treatment);
            print_list("Prevention", &a.info.prevention);
        })
    }

    pub fn chat(&self, exchange: &ChatExchange) -> Result<()> {
        self.emit(exchange, |e| println!("{}", e.ai_response))
    }

    pub fn chat_page(&self, page: &ChatPage) -> Result<()> {
        self.emit(page, |p| {
            if p.exchanges.is_empty() {
                println!("No chat history.");
            }
            for exchange in &p.exchanges {
                println!(
                    "[{}] You: {}",
                    exchange.created_at.format("%Y-%m-%d %H:%M"),
                    exchange.user_message
                );
                println!("  {}", exchange.ai_response);
            }
            println!("\nPage {} of {}", p.page, p.pages.max(1));
        })
    }

    pub fn suggestions(&self, suggestions: &[ChatSuggestion]) -> Result<()> {
        self.emit(&suggestions, |list| {
            for suggestion in list.iter() {
                println!("{}", suggestion.title);
                println!("  {}", suggestion.message);
            }
        })
    }

    pub fn weather(&self, report: &WeatherReport) -> Result<()> {
        self.emit(report, |r| {
            let w = &r.weather;
            println!("{}: {}", w.location_name, w.description);
            println!(
                "  {:.1}° (feels {:.1}°), humidity {:.0}%, wind {:.1}",
                w.temperature, w.feels_like, w.humidity, w.wind_speed
            );
            let i = &r.insights;
            println!(
                "  Risk: {}  Plant health: {}  Pest risk: {}",
                label(&i.risk_level),
                label(&i.plant_health),
                label(&i.pest_risk)
            );
            if i.irrigation_needed {
                println!("  Irrigation needed");
            }
            print_list("Recommendations", &i.recommendations);
        })
    }

    pub fn forecast(&self, report: &ForecastReport) -> Result<()> {
        self.emit(report, |r| {
            for day in &r.days {
                println!(
                    "{}  {:>5.1}..{:<5.1}  rain {:>3.0}%  {}",
                    day.date, day.temp_min, day.temp_max, day.rain_probability, day.description
                );
            }
            print_list("Irrigation", &r.advice.irrigation_planning);
            print_list("Pests", &r.advice.pest_management);
            print_list("Crop protection", &r.advice.crop_protection);
            print_list("General", &r.advice.general_advice);
        })
    }
}

fn print_stats(stats: &UserStats) {
    println!("  Detections: {}", stats.total_detections);
    println!("  Successful: {}", stats.successful_detections);
    println!(
        "  Average confidence: {:.1}%",
        stats.average_confidence() * 100.0
    );
    if let Some(at) = stats.last_detection_at {
        println!("  Last detection: {}", at.format("%Y-%m-%d %H:%M"));
    }
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}

fn print_ranking(title: &str, entries: &[RankedEntry]) {
    if entries.is_empty() {
        return;
    }
    println!("\n{}:", title);
    for entry in entries {
        println!(
            "  {:<24} {:>4}  {:>6.2}%",
            entry.name, entry.count, entry.percentage
        );
    }
}

fn detection_line(event: &DetectionEvent) -> String {
    format!(
        "{}  {} / {}  {:.0}%",
        event.created_at.format("%Y-%m-%d %H:%M"),
        event.plant_name,
        event.disease_name,
        event.confidence * 100.0
    )
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Serialized name of a unit-like enum value.
fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantdoc_core::upstream::weather::{PlantHealth, RiskLevel};

    #[test]
    fn test_label_uses_serialized_names() {
        assert_eq!(label(&RiskLevel::High), "high");
        assert_eq!(label(&PlantHealth::AtRisk), "at_risk");
    }

    #[test]
    fn test_short_id_handles_short_input() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
