//! Service facade
//!
//! [`PlantDoc`] is the single entry point used by the CLI and by tests. Every
//! per-user operation takes the verified [`Caller`] and fails with
//! [`Error::NotAuthorized`] unless the caller owns the data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::overview::{self, GlobalOverview, OverviewCache, PersonalOverview};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::history::{page_count, HistoryPage, HistoryQuery};
use crate::stats::UserStats;
use crate::types::*;
use crate::upstream::disease_info::{self, DiseaseInfo};
use crate::upstream::weather::{self, ForecastAdvice};
use crate::upstream::{
    AgriculturalInsights, CurrentWeather, DailyForecast, GeminiClient, Identification,
    KindwiseClient, OpenWeatherClient, PlantIdentifier, TextGenerator, WeatherProvider,
    DEFAULT_LOCATION,
};

/// Number of recent detections mentioned in a chat prompt.
const CHAT_CONTEXT_DETECTIONS: u32 = 5;

/// Chat exchanges included in a data export.
const EXPORT_CHAT_LIMIT: u32 = 100;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of analyzing one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub identification: Identification,
    pub info: DiseaseInfo,
    pub location: GeoPoint,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPage {
    pub exchanges: Vec<ChatExchange>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub weather: CurrentWeather,
    pub insights: AgriculturalInsights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub days: Vec<DailyForecast>,
    pub advice: ForecastAdvice,
}

pub struct PlantDoc {
    config: Config,
    db: Database,
    plant_id: Option<Arc<dyn PlantIdentifier>>,
    text: Option<Arc<dyn TextGenerator>>,
    weather: Option<Arc<dyn WeatherProvider>>,
    global_cache: OverviewCache,
    clock: Clock,
}

impl PlantDoc {
    /// Facade without any upstream services attached.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let global_cache = OverviewCache::new(config.analytics.global_refresh_secs)?;
        Ok(Self {
            config,
            db,
            plant_id: None,
            text: None,
            weather: None,
            global_cache,
            clock: Arc::new(Utc::now),
        })
    }

    /// Facade with HTTP clients for every upstream that has an API key.
    pub fn from_config(config: Config, db: Database) -> Result<Self> {
        let mut doc = Self::new(config, db)?;
        if doc.config.plant_id.is_ready() {
            doc.plant_id = Some(Arc::new(KindwiseClient::new(&doc.config.plant_id)?));
        }
        if doc.config.llm.is_ready() {
            doc.text = Some(Arc::new(GeminiClient::new(&doc.config.llm)?));
        }
        if doc.config.weather.is_ready() {
            doc.weather = Some(Arc::new(OpenWeatherClient::new(&doc.config.weather)?));
        }
        tracing::debug!(
            plant_id = doc.plant_id.is_some(),
            llm = doc.text.is_some(),
            weather = doc.weather.is_some(),
            "Upstream services configured"
        );
        Ok(doc)
    }

    pub fn with_plant_identifier(mut self, client: Arc<dyn PlantIdentifier>) -> Self {
        self.plant_id = Some(client);
        self
    }

    pub fn with_text_generator(mut self, client: Arc<dyn TextGenerator>) -> Self {
        self.text = Some(client);
        self
    }

    pub fn with_weather(mut self, client: Arc<dyn WeatherProvider>) -> Self {
        self.weather = Some(client);
        self
    }

    /// Replace the wall clock (used for server-assigned timestamps).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, new_user: NewUser) -> Result<User> {
        new_user.validate()?;
        let user = self.db.insert_user(new_user, self.now()).await?;
        tracing::info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    pub async fn get_user(&self, caller: &Caller, user_id: &str) -> Result<User> {
        caller.ensure_owns(user_id)?;
        self.db
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    pub async fn user_stats(&self, caller: &Caller, user_id: &str) -> Result<UserStats> {
        caller.ensure_owns(user_id)?;
        self.db
            .get_user_stats(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    pub async fn preferences(&self, caller: &Caller, user_id: &str) -> Result<UserPreferences> {
        Ok(self.get_user(caller, user_id).await?.preferences)
    }

    pub async fn update_preferences(
        &self,
        caller: &Caller,
        user_id: &str,
        update: PreferencesUpdate,
    ) -> Result<UserPreferences> {
        caller.ensure_owns(user_id)?;
        self.db.update_preferences(user_id, update).await
    }

    // ============================================
    // Detections
    // ============================================

    /// Validate, store and count one detection.
    pub async fn record_detection(
        &self,
        caller: &Caller,
        user_id: &str,
        detection: NewDetection,
    ) -> Result<DetectionEvent> {
        caller.ensure_owns(user_id)?;
        detection.validate()?;

        let (event, stats) = self
            .db
            .insert_detection(user_id, detection, self.now())
            .await?;
        tracing::info!(
            user_id = %user_id,
            detection_id = %event.id,
            confidence = event.confidence,
            total_detections = stats.total_detections,
            "Recorded detection"
        );
        Ok(event)
    }

    /// Delete a detection and return the owner's updated stats.
    pub async fn remove_detection(
        &self,
        caller: &Caller,
        user_id: &str,
        detection_id: &str,
    ) -> Result<UserStats> {
        caller.ensure_owns(user_id)?;
        let stats = self.db.delete_detection(user_id, detection_id).await?;
        tracing::info!(
            user_id = %user_id,
            detection_id = %detection_id,
            total_detections = stats.total_detections,
            "Removed detection"
        );
        Ok(stats)
    }

    pub async fn get_detection(&self, caller: &Caller, detection_id: &str) -> Result<DetectionEvent> {
        let event = self
            .db
            .get_detection(detection_id)
            .await?
            .ok_or_else(|| Error::not_found("detection", detection_id))?;
        caller.ensure_owns(&event.user_id)?;
        Ok(event)
    }

    /// Correct a detection's names, image, location or advice lists.
    pub async fn update_detection(
        &self,
        caller: &Caller,
        detection_id: &str,
        edit: DetectionEdit,
    ) -> Result<DetectionEvent> {
        if edit.is_empty() {
            return Err(Error::Validation("no fields to update".to_string()));
        }
        edit.validate()?;
        self.get_detection(caller, detection_id).await?;
        let event = self.db.update_detection(detection_id, edit).await?;
        tracing::info!(detection_id = %detection_id, "Updated detection");
        Ok(event)
    }

    // ============================================
    // History
    // ============================================

    pub async fn query_history(
        &self,
        caller: &Caller,
        user_id: &str,
        query: HistoryQuery,
    ) -> Result<HistoryPage> {
        caller.ensure_owns(user_id)?;
        let filter = query.normalize(&self.config.history)?;
        let (events, total) = self.db.query_detections(user_id, filter.clone()).await?;
        Ok(HistoryPage::new(events, total, &filter))
    }

    /// Activity feed entries for the newest detections, one page at a time.
    pub async fn recent_activity(
        &self,
        caller: &Caller,
        user_id: &str,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<ActivityEntry>> {
        caller.ensure_owns(user_id)?;
        let filter = HistoryQuery {
            page,
            limit,
            ..Default::default()
        }
        .normalize(&self.config.history)?;
        let (events, _) = self.db.query_detections(user_id, filter).await?;
        Ok(events.iter().map(ActivityEntry::from).collect())
    }

    // ============================================
    // Analytics
    // ============================================

    pub async fn personal_overview(&self, caller: &Caller, user_id: &str) -> Result<PersonalOverview> {
        caller.ensure_owns(user_id)?;
        let events = self.db.list_user_detections(user_id, None, None, None).await?;
        Ok(overview::personal_overview(
            &events,
            &self.config.analytics,
            None,
            None,
        ))
    }

    /// Personal overview restricted to an inclusive date range.
    pub async fn history_stats(
        &self,
        caller: &Caller,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PersonalOverview> {
        caller.ensure_owns(user_id)?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::Validation(
                    "start date must not be after end date".to_string(),
                ));
            }
        }
        let events = self.db.list_user_detections(user_id, start, end, None).await?;
        Ok(overview::personal_overview(
            &events,
            &self.config.analytics,
            start,
            end,
        ))
    }

    /// Store-wide overview, served from cache while fresh.
    pub async fn global_overview(&self) -> Result<GlobalOverview> {
        let now = self.now();
        if let Some(cached) = self.global_cache.get_fresh(now).await {
            return Ok(cached);
        }
        self.compute_global(now).await
    }

    /// Recompute the global overview regardless of cache age.
    pub async fn refresh_global_overview(&self) -> Result<GlobalOverview> {
        self.compute_global(self.now()).await
    }

    async fn compute_global(&self, now: DateTime<Utc>) -> Result<GlobalOverview> {
        let started = std::time::Instant::now();
        let computed = overview::compute_global(&self.db, &self.config.analytics, now).await?;
        self.global_cache.store(computed.clone()).await;
        tracing::info!(
            total_users = computed.total_users,
            total_detections = computed.total_detections,
            duration_ms = started.elapsed().as_millis() as u64,
            "Computed global overview"
        );
        Ok(computed)
    }

    /// Everything stored for a user.
    pub async fn export_user_data(&self, caller: &Caller, user_id: &str) -> Result<UserExport> {
        let user = self.get_user(caller, user_id).await?;
        let detections = self.db.list_user_detections(user_id, None, None, None).await?;
        let (chat_history, _) = self.db.list_chats(user_id, EXPORT_CHAT_LIMIT, 0).await?;
        tracing::info!(
            user_id = %user_id,
            detections = detections.len(),
            chats = chat_history.len(),
            "Exported user data"
        );
        Ok(UserExport {
            user,
            detections,
            chat_history,
            export_date: self.now(),
        })
    }

    // ============================================
    // Upstream-backed operations
    // ============================================

    fn plant_identifier(&self) -> Result<&Arc<dyn PlantIdentifier>> {
        self.plant_id.as_ref().ok_or_else(|| {
            Error::Config("plant identification is not configured (set plant_id.api_key)".to_string())
        })
    }

    fn text_generator(&self) -> Result<&Arc<dyn TextGenerator>> {
        self.text.as_ref().ok_or_else(|| {
            Error::Config("text generation is not configured (set llm.api_key)".to_string())
        })
    }

    fn weather_provider(&self) -> Result<&Arc<dyn WeatherProvider>> {
        self.weather.as_ref().ok_or_else(|| {
            Error::Config("weather is not configured (set weather.api_key)".to_string())
        })
    }

    /// Identify an image and enrich the result.
    ///
    /// Identification failures are returned. Enrichment never fails; without
    /// a text generator the placeholder info is used.
    pub async fn analyze(&self, image_base64: &str, location: Option<GeoPoint>) -> Result<Analysis> {
        if image_base64.trim().is_empty() {
            return Err(Error::Validation("image data is required".to_string()));
        }
        let location = match location {
            Some(point) => {
                point.validate()?;
                point
            }
            None => DEFAULT_LOCATION,
        };

        let identification = self
            .plant_identifier()?
            .identify(image_base64, location)
            .await?;

        let info = match &self.text {
            Some(generator) => {
                disease_info::enrich(
                    generator.as_ref(),
                    &self.db,
                    &identification.plant_name,
                    &identification.disease_name,
                )
                .await
            }
            None => {
                tracing::warn!("No text generator configured, using placeholder disease info");
                DiseaseInfo::placeholder()
            }
        };

        Ok(Analysis {
            identification,
            info,
            location,
            analyzed_at: self.now(),
        })
    }

    /// Analyze an image and record the result as a detection.
    pub async fn analyze_and_record(
        &self,
        caller: &Caller,
        user_id: &str,
        image_base64: &str,
        location: Option<GeoPoint>,
        image_ref: Option<String>,
    ) -> Result<DetectionEvent> {
        caller.ensure_owns(user_id)?;
        if self.db.get_user_stats(user_id).await?.is_none() {
            return Err(Error::not_found("user", user_id));
        }

        let analysis = self.analyze(image_base64, location).await?;
        let detection = NewDetection {
            plant_name: analysis.identification.plant_name,
            disease_name: analysis.identification.disease_name,
            confidence: analysis.identification.confidence,
            image_ref,
            location: Some(analysis.location),
            symptoms: analysis.info.symptoms,
            treatment: analysis.info.treatment,
            prevention: analysis.info.prevention,
        };
        self.record_detection(caller, user_id, detection).await
    }

    /// Answer a plant-care question, using the user's recent detections as context.
    pub async fn chat(&self, caller: &Caller, user_id: &str, message: &str) -> Result<ChatExchange> {
        caller.ensure_owns(user_id)?;
        let message = validate_chat_message(message)?;
        let generator = self.text_generator()?;

        let recent = self
            .db
            .list_user_detections(user_id, None, None, Some(CHAT_CONTEXT_DETECTIONS))
            .await?;
        let prompt = build_chat_prompt(&recent, &message);
        let ai_response = generator.generate(&prompt).await?;

        let exchange = ChatExchange {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            user_message: message,
            ai_response,
            context: serde_json::json!({
                "recent_detections": recent
                    .iter()
                    .map(|d| serde_json::json!({
                        "plant_name": d.plant_name,
                        "disease_name": d.disease_name,
                    }))
                    .collect::<Vec<_>>(),
            }),
            created_at: self.now(),
        };
        self.db.insert_chat(exchange.clone()).await?;
        tracing::info!(user_id = %user_id, chat_id = %exchange.id, "Stored chat exchange");
        Ok(exchange)
    }

    pub async fn chat_history(
        &self,
        caller: &Caller,
        user_id: &str,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<ChatPage> {
        caller.ensure_owns(user_id)?;
        let filter = HistoryQuery {
            page,
            limit,
            ..Default::default()
        }
        .normalize(&self.config.history)?;
        let (exchanges, total) = self
            .db
            .list_chats(user_id, filter.limit, filter.offset())
            .await?;
        Ok(ChatPage {
            exchanges,
            total,
            page: filter.page,
            limit: filter.limit,
            pages: page_count(total, filter.limit),
        })
    }

    /// Starter prompts for the chat, including follow-ups on the newest detection.
    pub async fn chat_suggestions(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> Result<Vec<ChatSuggestion>> {
        self.get_user(caller, user_id).await?;
        let recent = self
            .db
            .list_user_detections(user_id, None, None, Some(CHAT_CONTEXT_DETECTIONS))
            .await?;
        Ok(chat_suggestions(recent.first()))
    }

    pub async fn current_weather(&self, point: GeoPoint) -> Result<WeatherReport> {
        point.validate()?;
        let weather = self.weather_provider()?.current(point).await?;
        let insights = weather::agricultural_insights(&weather);
        Ok(WeatherReport { weather, insights })
    }

    pub async fn forecast(&self, point: GeoPoint) -> Result<ForecastReport> {
        point.validate()?;
        let days = self.weather_provider()?.forecast(point).await?;
        let advice = weather::forecast_advice(&days);
        Ok(ForecastReport { days, advice })
    }
}

fn build_chat_prompt(recent: &[DetectionEvent], message: &str) -> String {
    let mut prompt = String::from(
        "You are an expert plant pathologist and agricultural consultant.\n",
    );
    if !recent.is_empty() {
        let listed: Vec<String> = recent
            .iter()
            .map(|d| format!("{} - {}", d.plant_name, d.disease_name))
            .collect();
        prompt.push_str(&format!(
            "The user's recent detections: {}.\n",
            listed.join(", ")
        ));
    }
    prompt.push_str(&format!(
        "\nUser question: {}\n\n\
         Provide a helpful, accurate, and practical response focused on plant care \
         and disease management. Keep it concise.",
        message
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(plant: &str, disease: &str) -> DetectionEvent {
        DetectionEvent {
            id: "d".to_string(),
            user_id: "alice".to_string(),
            plant_name: plant.to_string(),
            disease_name: disease.to_string(),
            confidence: 0.9,
            image_ref: None,
            location: None,
            symptoms: vec![],
            treatment: vec![],
            prevention: vec![],
            created_at: Utc::now(),
        }
    }

    async fn service() -> PlantDoc {
        let db = Database::open_in_memory().unwrap();
        db.migrate().await.unwrap();
        PlantDoc::new(Config::default(), db).unwrap()
    }

    #[test]
    fn test_chat_prompt_mentions_recent_detections() {
        let prompt = build_chat_prompt(
            &[detection("Tomato", "Early Blight"), detection("Potato", "Scab")],
            "How often should I water?",
        );
        assert!(prompt.contains("Tomato - Early Blight, Potato - Scab"));
        assert!(prompt.contains("User question: How often should I water?"));

        let bare = build_chat_prompt(&[], "Hi");
        assert!(!bare.contains("recent detections"));
    }

    #[tokio::test]
    async fn test_foreign_caller_is_rejected() {
        let doc = service().await;
        doc.create_user(NewUser::new("alice")).await.unwrap();
        let mallory = Caller::new("mallory");

        let err = doc
            .record_detection(&mallory, "alice", NewDetection::new("Tomato", "Blight", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        let err = doc
            .query_history(&mallory, "alice", HistoryQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_missing_upstreams_are_config_errors() {
        let doc = service().await;
        doc.create_user(NewUser::new("alice")).await.unwrap();
        let alice = Caller::new("alice");

        assert!(matches!(
            doc.analyze("aGVsbG8=", None).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            doc.chat(&alice, "alice", "hello").await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            doc.current_weather(DEFAULT_LOCATION).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_config_with_unrepresentable_refresh_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::default();
        config.analytics.global_refresh_secs = u64::MAX;
        assert!(matches!(
            PlantDoc::new(config, db),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_update_detection_rejects_empty_edit() {
        let doc = service().await;
        let err = doc
            .update_detection(&Caller::new("alice"), "x", DetectionEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
