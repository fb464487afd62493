//! Core domain types for plantdoc
//!
//! | Term | Definition |
//! |------|------------|
//! | **Detection** | One plant-image analysis result owned by a user |
//! | **Confidence** | Probability in [0,1] that the disease label is correct |
//! | **Caller** | The verified identity making a request |
//! | **User** | Account that owns detections, stats, and preferences |
//!
//! Aggregate statistics live in [`crate::stats`]; history paging types in
//! [`crate::history`]; overview types in [`crate::analytics`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::UserStats;

// ============================================
// Caller
// ============================================

/// Identity of whoever is making a request, already verified upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller(String);

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Caller(user_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fails with [`Error::NotAuthorized`] unless the caller is `user_id`.
    pub fn ensure_owns(&self, user_id: &str) -> Result<()> {
        if self.0 == user_id {
            Ok(())
        } else {
            Err(Error::NotAuthorized(format!(
                "{} may not access data of {}",
                self.0, user_id
            )))
        }
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================
// Detections
// ============================================

/// Latitude/longitude pair attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = GeoPoint {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::Validation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::Validation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// One stored plant-disease analysis result.
///
/// `id`, `user_id`, `created_at` and `confidence` never change after insert;
/// see [`DetectionEdit`] for what may.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: String,
    pub user_id: String,
    pub plant_name: String,
    pub disease_name: String,
    /// Probability in [0,1]
    pub confidence: f64,
    /// Opaque image reference (URL or storage key)
    pub image_ref: Option<String>,
    pub location: Option<GeoPoint>,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
    pub prevention: Vec<String>,
    /// Server-assigned, strictly increasing per store
    pub created_at: DateTime<Utc>,
}

/// Input for recording a detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub plant_name: String,
    pub disease_name: String,
    pub confidence: f64,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub treatment: Vec<String>,
    #[serde(default)]
    pub prevention: Vec<String>,
}

impl NewDetection {
    pub fn new(plant_name: &str, disease_name: &str, confidence: f64) -> Self {
        Self {
            plant_name: plant_name.to_string(),
            disease_name: disease_name.to_string(),
            confidence,
            ..Default::default()
        }
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("plant_name", &self.plant_name)?;
        require_non_empty("disease_name", &self.disease_name)?;
        validate_confidence(self.confidence)?;
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}

/// User-initiated correction of a detection's metadata.
///
/// `None` leaves a field untouched. `image_ref: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionEdit {
    #[serde(default)]
    pub plant_name: Option<String>,
    #[serde(default)]
    pub disease_name: Option<String>,
    #[serde(default)]
    pub image_ref: Option<Option<String>>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub symptoms: Option<Vec<String>>,
    #[serde(default)]
    pub treatment: Option<Vec<String>>,
    #[serde(default)]
    pub prevention: Option<Vec<String>>,
}

impl DetectionEdit {
    pub fn is_empty(&self) -> bool {
        self == &DetectionEdit::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.plant_name {
            require_non_empty("plant_name", name)?;
        }
        if let Some(name) = &self.disease_name {
            require_non_empty("disease_name", name)?;
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }

    /// Apply to a stored event. Identity, owner, timestamp and confidence are kept.
    pub fn apply(&self, event: &mut DetectionEvent) {
        if let Some(name) = &self.plant_name {
            event.plant_name = name.trim().to_string();
        }
        if let Some(name) = &self.disease_name {
            event.disease_name = name.trim().to_string();
        }
        if let Some(image_ref) = &self.image_ref {
            event.image_ref = image_ref.clone();
        }
        if let Some(location) = self.location {
            event.location = Some(location);
        }
        if let Some(list) = &self.symptoms {
            event.symptoms = list.clone();
        }
        if let Some(list) = &self.treatment {
            event.treatment = list.clone();
        }
        if let Some(list) = &self.prevention {
            event.prevention = list.clone();
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

/// Confidence must be a finite number in [0, 1].
pub fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "confidence {} outside [0, 1]",
            confidence
        )))
    }
}

/// Entry in a user's activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: Option<f64>,
    pub plant_name: Option<String>,
    pub disease_name: Option<String>,
}

impl From<&DetectionEvent> for ActivityEntry {
    fn from(event: &DetectionEvent) -> Self {
        ActivityEntry {
            id: event.id.clone(),
            kind: "detection".to_string(),
            description: format!("Analyzed {} for {}", event.plant_name, event.disease_name),
            timestamp: event.created_at,
            confidence: Some(event.confidence),
            plant_name: Some(event.plant_name.clone()),
            disease_name: Some(event.disease_name.clone()),
        }
    }
}

// ============================================
// Users
// ============================================

/// Account record with its nested stats and preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub stats: UserStats,
    pub preferences: UserPreferences,
}

/// Input for creating a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl NewUser {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("user id", &self.id)?;
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(Error::Validation(format!("invalid email: {}", email)));
            }
        }
        Ok(())
    }
}

/// Supported interface languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
    Ru,
    Zh,
    Ja,
    Ko,
    Ar,
    Hi,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Pt => "pt",
            Language::Ru => "ru",
            Language::Zh => "zh",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Ar => "ar",
            Language::Hi => "hi",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            "fr" => Ok(Language::Fr),
            "de" => Ok(Language::De),
            "it" => Ok(Language::It),
            "pt" => Ok(Language::Pt),
            "ru" => Ok(Language::Ru),
            "zh" => Ok(Language::Zh),
            "ja" => Ok(Language::Ja),
            "ko" => Ok(Language::Ko),
            "ar" => Ok(Language::Ar),
            "hi" => Ok(Language::Hi),
            _ => Err(format!("unsupported language: {}", s)),
        }
    }
}

/// Measurement system used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl std::str::FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(format!("unknown units: {}", s)),
        }
    }
}

/// Per-user application preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub language: Language,
    pub units: Units,
    pub notifications: bool,
    pub dark_mode: bool,
    pub auto_location: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: Language::En,
            units: Units::Metric,
            notifications: true,
            dark_mode: false,
            auto_location: true,
        }
    }
}

/// Partial preference update; only `Some` fields change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    pub language: Option<Language>,
    pub units: Option<Units>,
    pub notifications: Option<bool>,
    pub dark_mode: Option<bool>,
    pub auto_location: Option<bool>,
}

impl UserPreferences {
    pub fn merged(mut self, update: &PreferencesUpdate) -> Self {
        if let Some(language) = update.language {
            self.language = language;
        }
        if let Some(units) = update.units {
            self.units = units;
        }
        if let Some(notifications) = update.notifications {
            self.notifications = notifications;
        }
        if let Some(dark_mode) = update.dark_mode {
            self.dark_mode = dark_mode;
        }
        if let Some(auto_location) = update.auto_location {
            self.auto_location = auto_location;
        }
        self
    }
}

// ============================================
// Chat
// ============================================

/// Maximum length of a chat message, in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 1000;

/// One stored question/answer pair from the plant-care chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub id: String,
    pub user_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    General,
    DiseaseFollowup,
}

/// Ready-made chat prompt offered to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSuggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub title: String,
    pub message: String,
}

impl ChatSuggestion {
    fn new(kind: SuggestionKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }
}

const GENERAL_SUGGESTIONS: [(&str, &str); 3] = [
    (
        "How to prevent plant diseases?",
        "What are the best practices for preventing plant diseases in my garden?",
    ),
    (
        "When to water plants?",
        "What is the best time of day to water my plants and how often?",
    ),
    (
        "Natural pest control",
        "What are some natural ways to control pests in my garden?",
    ),
];

/// General prompts, followed by two about `latest` when there is one.
pub fn chat_suggestions(latest: Option<&DetectionEvent>) -> Vec<ChatSuggestion> {
    let mut suggestions: Vec<ChatSuggestion> = GENERAL_SUGGESTIONS
        .iter()
        .map(|(title, message)| ChatSuggestion::new(SuggestionKind::General, *title, *message))
        .collect();

    if let Some(event) = latest {
        let disease = &event.disease_name;
        suggestions.push(ChatSuggestion::new(
            SuggestionKind::DiseaseFollowup,
            format!("More about {}", disease),
            format!("Tell me more about {} and how to treat it effectively.", disease),
        ));
        suggestions.push(ChatSuggestion::new(
            SuggestionKind::DiseaseFollowup,
            format!("Prevent {}", disease),
            format!(
                "How can I prevent {} from affecting my other {} plants?",
                disease, event.plant_name
            ),
        ));
    }
    suggestions
}

/// Trim and bound-check a chat message.
pub fn validate_chat_message(message: &str) -> Result<String> {
    let trimmed = message.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_CHAT_MESSAGE_CHARS {
        return Err(Error::Validation(format!(
            "message must be 1-{} characters",
            MAX_CHAT_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Everything stored about one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserExport {
    pub user: User,
    pub detections: Vec<DetectionEvent>,
    pub chat_history: Vec<ChatExchange>,
    pub export_date: DateTime<Utc>,
}
