//! Database repository layer
//!
//! Provides query and write operations for users, detections, chat and the
//! disease-info cache. The connection is shared behind an async mutex and
//! every statement runs on the blocking pool.

use crate::analytics::ranking::Entity;
use crate::analytics::trends::MonthlyGrowth;
use crate::error::{Error, Result};
use crate::history::HistoryFilter;
use crate::stats::UserStats;
use crate::types::*;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, ToSql, TransactionBehavior,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store-wide totals used by the global overview.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalTotals {
    pub total_users: u64,
    /// Users with at least one detection since the activity cutoff
    pub active_users: u64,
    pub total_detections: u64,
    pub successful_detections: u64,
    pub sum_confidence: f64,
}

/// Consistent read of everything the global overview needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSnapshot {
    pub totals: GlobalTotals,
    pub disease_counts: Vec<(String, u64)>,
    pub plant_counts: Vec<(String, u64)>,
    pub monthly_growth: Vec<MonthlyGrowth>,
}

/// Database handle (single shared connection)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps readers off the writer's back; busy_timeout lets a second
        // process wait for the write lock instead of failing immediately.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            ",
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations on this database
    pub async fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| super::schema::run_migrations(conn))
            .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }

    // ============================================
    // User operations
    // ============================================

    /// Create a user with zeroed stats and default preferences
    pub async fn insert_user(&self, new_user: NewUser, now: DateTime<Utc>) -> Result<User> {
        let now = now.trunc_subsecs(6);
        self.with_conn(move |conn| {
            let prefs = UserPreferences::default();
            let inserted = conn.execute(
                r#"
                INSERT INTO users (id, display_name, email, created_at,
                                   language, units, notifications, dark_mode, auto_location)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    new_user.id,
                    new_user.display_name,
                    new_user.email,
                    fmt_ts(&now),
                    prefs.language.as_str(),
                    prefs.units.as_str(),
                    prefs.notifications,
                    prefs.dark_mode,
                    prefs.auto_location,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(Error::Validation(format!(
                        "user {} already exists",
                        new_user.id
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            Ok(User {
                id: new_user.id,
                display_name: new_user.display_name,
                email: new_user.email,
                created_at: now,
                last_active_at: None,
                stats: UserStats::default(),
                preferences: prefs,
            })
        })
        .await
    }

    /// Get a user by ID
    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?", [&id], Self::row_to_user)
                .optional()
                .map_err(Error::from)
        })
        .await
    }

    /// Get only the running aggregates for a user
    pub async fn get_user_stats(&self, id: &str) -> Result<Option<UserStats>> {
        let id = id.to_string();
        self.with_conn(move |conn| Self::read_stats(conn, &id)).await
    }

    /// Apply a partial preference update and return the merged result
    pub async fn update_preferences(
        &self,
        user_id: &str,
        update: PreferencesUpdate,
    ) -> Result<UserPreferences> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = tx
                .query_row(
                    "SELECT * FROM users WHERE id = ?",
                    [&user_id],
                    Self::row_to_preferences,
                )
                .optional()?
                .ok_or_else(|| Error::not_found("user", &user_id))?;

            let merged = current.merged(&update);
            tx.execute(
                r#"
                UPDATE users SET language = ?2, units = ?3, notifications = ?4,
                                 dark_mode = ?5, auto_location = ?6
                WHERE id = ?1
                "#,
                params![
                    user_id,
                    merged.language.as_str(),
                    merged.units.as_str(),
                    merged.notifications,
                    merged.dark_mode,
                    merged.auto_location,
                ],
            )?;
            tx.commit()?;
            Ok(merged)
        })
        .await
    }

    fn read_stats(conn: &Connection, user_id: &str) -> Result<Option<UserStats>> {
        conn.query_row(
            r#"
            SELECT total_detections, successful_detections, sum_confidence, last_detection_at
            FROM users WHERE id = ?
            "#,
            [user_id],
            Self::row_to_stats,
        )
        .optional()
        .map_err(Error::from)
    }

    fn write_stats(
        conn: &Connection,
        user_id: &str,
        stats: &UserStats,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        conn.execute(
            r#"
            UPDATE users SET
                total_detections = ?2,
                successful_detections = ?3,
                sum_confidence = ?4,
                last_detection_at = ?5,
                last_active_at = COALESCE(?6, last_active_at)
            WHERE id = ?1
            "#,
            params![
                user_id,
                stats.total_detections as i64,
                stats.successful_detections as i64,
                stats.sum_confidence,
                stats.last_detection_at.as_ref().map(fmt_ts),
                active_at.as_ref().map(fmt_ts),
            ],
        )?;
        Ok(())
    }

    fn row_to_stats(row: &Row) -> rusqlite::Result<UserStats> {
        Ok(UserStats {
            total_detections: row.get::<_, i64>("total_detections")?.max(0) as u64,
            successful_detections: row.get::<_, i64>("successful_detections")?.max(0) as u64,
            sum_confidence: row.get("sum_confidence")?,
            last_detection_at: get_opt_ts(row, "last_detection_at")?,
        })
    }

    fn row_to_preferences(row: &Row) -> rusqlite::Result<UserPreferences> {
        let language: String = row.get("language")?;
        let units: String = row.get("units")?;
        Ok(UserPreferences {
            language: language.parse().unwrap_or(Language::En),
            units: units.parse().unwrap_or(Units::Metric),
            notifications: row.get("notifications")?,
            dark_mode: row.get("dark_mode")?,
            auto_location: row.get("auto_location")?,
        })
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            email: row.get("email")?,
            created_at: get_ts(row, "created_at")?,
            last_active_at: get_opt_ts(row, "last_active_at")?,
            stats: Self::row_to_stats(row)?,
            preferences: Self::row_to_preferences(row)?,
        })
    }

    // ============================================
    // Detection operations
    // ============================================

    /// Append a detection and fold it into the owner's stats atomically.
    ///
    /// Runs as one IMMEDIATE transaction, so concurrent writers (including
    /// other processes on the same file) are serialized and no increment is
    /// lost. The assigned `created_at` is strictly after every stored one.
    pub async fn insert_detection(
        &self,
        user_id: &str,
        new: NewDetection,
        now: DateTime<Utc>,
    ) -> Result<(DetectionEvent, UserStats)> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let stats = Self::read_stats(&tx, &user_id)?
                .ok_or_else(|| Error::not_found("user", &user_id))?;

            let latest: Option<String> =
                tx.query_row("SELECT MAX(created_at) FROM detections", [], |r| r.get(0))?;
            let latest = latest.as_deref().and_then(parse_ts);
            let created_at = next_timestamp(now, latest);

            let event = DetectionEvent {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                plant_name: new.plant_name.trim().to_string(),
                disease_name: new.disease_name.trim().to_string(),
                confidence: new.confidence,
                image_ref: new.image_ref,
                location: new.location,
                symptoms: new.symptoms,
                treatment: new.treatment,
                prevention: new.prevention,
                created_at,
            };

            tx.execute(
                r#"
                INSERT INTO detections (id, user_id, plant_name, disease_name, confidence,
                                        image_ref, latitude, longitude,
                                        symptoms, treatment, prevention, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    event.id,
                    event.user_id,
                    event.plant_name,
                    event.disease_name,
                    event.confidence,
                    event.image_ref,
                    event.location.map(|p| p.latitude),
                    event.location.map(|p| p.longitude),
                    serde_json::to_string(&event.symptoms)?,
                    serde_json::to_string(&event.treatment)?,
                    serde_json::to_string(&event.prevention)?,
                    fmt_ts(&event.created_at),
                ],
            )?;

            let updated = stats.record(event.confidence, created_at);
            Self::write_stats(&tx, &user_id, &updated, Some(created_at))?;
            tx.commit()?;

            tracing::debug!(
                user_id = %user_id,
                detection_id = %event.id,
                total = updated.total_detections,
                "Recorded detection"
            );
            Ok((event, updated))
        })
        .await
    }

    /// Delete a detection owned by `user_id` and compensate the stats atomically.
    pub async fn delete_detection(&self, user_id: &str, detection_id: &str) -> Result<UserStats> {
        let user_id = user_id.to_string();
        let detection_id = detection_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let found: Option<(String, f64)> = tx
                .query_row(
                    "SELECT user_id, confidence FROM detections WHERE id = ?",
                    [&detection_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let (owner, confidence) =
                found.ok_or_else(|| Error::not_found("detection", &detection_id))?;
            if owner != user_id {
                return Err(Error::NotAuthorized(format!(
                    "detection {} does not belong to {}",
                    detection_id, user_id
                )));
            }

            tx.execute("DELETE FROM detections WHERE id = ?", [&detection_id])?;

            let stats = Self::read_stats(&tx, &user_id)?
                .ok_or_else(|| Error::not_found("user", &user_id))?;
            let updated = stats.remove(confidence);
            Self::write_stats(&tx, &user_id, &updated, None)?;
            tx.commit()?;

            tracing::debug!(
                user_id = %user_id,
                detection_id = %detection_id,
                total = updated.total_detections,
                "Removed detection"
            );
            Ok(updated)
        })
        .await
    }

    /// Get a detection by ID
    pub async fn get_detection(&self, id: &str) -> Result<Option<DetectionEvent>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM detections WHERE id = ?",
                [&id],
                Self::row_to_detection,
            )
            .optional()
            .map_err(Error::from)
        })
        .await
    }

    /// Apply an edit to a detection's mutable fields
    pub async fn update_detection(&self, id: &str, edit: DetectionEdit) -> Result<DetectionEvent> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut event = tx
                .query_row(
                    "SELECT * FROM detections WHERE id = ?",
                    [&id],
                    Self::row_to_detection,
                )
                .optional()?
                .ok_or_else(|| Error::not_found("detection", &id))?;

            edit.apply(&mut event);

            tx.execute(
                r#"
                UPDATE detections SET
                    plant_name = ?2, disease_name = ?3, image_ref = ?4,
                    latitude = ?5, longitude = ?6,
                    symptoms = ?7, treatment = ?8, prevention = ?9
                WHERE id = ?1
                "#,
                params![
                    event.id,
                    event.plant_name,
                    event.disease_name,
                    event.image_ref,
                    event.location.map(|p| p.latitude),
                    event.location.map(|p| p.longitude),
                    serde_json::to_string(&event.symptoms)?,
                    serde_json::to_string(&event.treatment)?,
                    serde_json::to_string(&event.prevention)?,
                ],
            )?;
            tx.commit()?;
            Ok(event)
        })
        .await
    }

    /// One page of a user's detections plus the total matching count.
    ///
    /// Both statements run under the same lock with the same filters.
    pub async fn query_detections(
        &self,
        user_id: &str,
        filter: HistoryFilter,
    ) -> Result<(Vec<DetectionEvent>, u64)> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut clause = String::from(" WHERE user_id = ?");
            let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];

            if let Some(plant) = &filter.plant {
                clause.push_str(" AND plant_name = ?");
                params.push(Box::new(plant.clone()));
            }
            if let Some(disease) = &filter.disease {
                clause.push_str(" AND disease_name = ?");
                params.push(Box::new(disease.clone()));
            }
            push_range(&mut clause, &mut params, filter.start, filter.end);

            let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM detections{}", clause),
                params_refs.as_slice(),
                |r| r.get(0),
            )?;

            let sql = format!(
                "SELECT * FROM detections{} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                clause,
                filter.limit,
                filter.offset()
            );
            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map(params_refs.as_slice(), Self::row_to_detection)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((events, total.max(0) as u64))
        })
        .await
    }

    /// All of a user's detections in an optional inclusive range, newest first.
    pub async fn list_user_detections(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<DetectionEvent>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut sql = String::from("SELECT * FROM detections WHERE user_id = ?");
            let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];
            push_range(&mut sql, &mut params, start, end);
            sql.push_str(" ORDER BY created_at DESC, id DESC");
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map(params_refs.as_slice(), Self::row_to_detection)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
    }

    fn row_to_detection(row: &Row) -> rusqlite::Result<DetectionEvent> {
        let latitude: Option<f64> = row.get("latitude")?;
        let longitude: Option<f64> = row.get("longitude")?;

        Ok(DetectionEvent {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            plant_name: row.get("plant_name")?,
            disease_name: row.get("disease_name")?,
            confidence: row.get("confidence")?,
            image_ref: row.get("image_ref")?,
            location: match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            symptoms: get_string_list(row, "symptoms")?,
            treatment: get_string_list(row, "treatment")?,
            prevention: get_string_list(row, "prevention")?,
            created_at: get_ts(row, "created_at")?,
        })
    }

    // ============================================
    // Global aggregates
    // ============================================

    /// Every store-wide aggregate, read inside one transaction so the parts
    /// agree with each other. `active_since` bounds the active-user count.
    pub async fn global_snapshot(&self, active_since: DateTime<Utc>) -> Result<GlobalSnapshot> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let snapshot = GlobalSnapshot {
                totals: global_totals(&tx, active_since)?,
                disease_counts: entity_counts(&tx, Entity::Disease)?,
                plant_counts: entity_counts(&tx, Entity::Plant)?,
                monthly_growth: monthly_growth(&tx)?,
            };
            tx.commit()?;
            Ok(snapshot)
        })
        .await
    }

    // ============================================
    // Chat operations
    // ============================================

    /// Persist a chat exchange and mark the user active
    pub async fn insert_chat(&self, exchange: ChatExchange) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let updated = tx.execute(
                "UPDATE users SET last_active_at = ?2 WHERE id = ?1",
                params![exchange.user_id, fmt_ts(&exchange.created_at)],
            )?;
            if updated == 0 {
                return Err(Error::not_found("user", &exchange.user_id));
            }
            tx.execute(
                r#"
                INSERT INTO chat_history (id, user_id, user_message, ai_response, context, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    exchange.id,
                    exchange.user_id,
                    exchange.user_message,
                    exchange.ai_response,
                    exchange.context.to_string(),
                    fmt_ts(&exchange.created_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// A page of a user's chat exchanges, newest first, with the total count
    pub async fn list_chats(
        &self,
        user_id: &str,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<ChatExchange>, u64)> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_history WHERE user_id = ?",
                [&user_id],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM chat_history WHERE user_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT ?2 OFFSET ?3
                "#,
            )?;
            let chats = stmt
                .query_map(
                    params![user_id, limit as i64, offset as i64],
                    Self::row_to_chat,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((chats, total.max(0) as u64))
        })
        .await
    }

    fn row_to_chat(row: &Row) -> rusqlite::Result<ChatExchange> {
        let context: String = row.get("context")?;
        Ok(ChatExchange {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            user_message: row.get("user_message")?,
            ai_response: row.get("ai_response")?,
            context: serde_json::from_str(&context).unwrap_or(serde_json::json!({})),
            created_at: get_ts(row, "created_at")?,
        })
    }

    // ============================================
    // Disease info cache
    // ============================================

    /// Look up cached enrichment by prompt hash
    pub async fn get_cached_disease_info(
        &self,
        prompt_hash: &str,
    ) -> Result<Option<serde_json::Value>> {
        let prompt_hash = prompt_hash.to_string();
        self.with_conn(move |conn| {
            let info: Option<String> = conn
                .query_row(
                    "SELECT info FROM disease_info_cache WHERE prompt_hash = ?",
                    [&prompt_hash],
                    |r| r.get(0),
                )
                .optional()?;
            match info {
                Some(info) => Ok(Some(serde_json::from_str(&info)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Store enrichment for a prompt hash, replacing any previous entry
    pub async fn put_cached_disease_info(
        &self,
        prompt_hash: &str,
        plant_name: &str,
        disease_name: &str,
        info: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let prompt_hash = prompt_hash.to_string();
        let plant_name = plant_name.to_string();
        let disease_name = disease_name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO disease_info_cache (prompt_hash, plant_name, disease_name, info, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(prompt_hash) DO UPDATE SET
                    info = excluded.info,
                    created_at = excluded.created_at
                "#,
                params![
                    prompt_hash,
                    plant_name,
                    disease_name,
                    info.to_string(),
                    fmt_ts(&now)
                ],
            )?;
            Ok(())
        })
        .await
    }
}

// ============================================
// Timestamp helpers
// ============================================

/// Fixed-width RFC 3339 with microseconds and `Z`
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `now` at microsecond precision, bumped past `latest` if needed.
fn next_timestamp(now: DateTime<Utc>, latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match latest {
        Some(latest) if now <= latest => latest + Duration::microseconds(1),
        _ => now,
    }
}

fn get_ts(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_ts(&raw).ok_or_else(|| bad_column(row, column, format!("invalid timestamp: {}", raw)))
}

fn get_opt_ts(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| bad_column(row, column, format!("invalid timestamp: {}", raw))),
        None => Ok(None),
    }
}

fn get_string_list(row: &Row, column: &str) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| bad_column(row, column, e.to_string()))
}

fn bad_column(row: &Row, column: &str, message: String) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn global_totals(conn: &Connection, active_since: DateTime<Utc>) -> Result<GlobalTotals> {
    let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;

    let (total, successful, sum): (i64, i64, f64) = conn.query_row(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN confidence > ?1 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(confidence), 0.0)
        FROM detections
        "#,
        [crate::stats::SUCCESS_THRESHOLD],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let active_users: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT user_id) FROM detections WHERE created_at >= ?",
        [fmt_ts(&active_since)],
        |r| r.get(0),
    )?;

    Ok(GlobalTotals {
        total_users: total_users.max(0) as u64,
        active_users: active_users.max(0) as u64,
        total_detections: total.max(0) as u64,
        successful_detections: successful.max(0) as u64,
        sum_confidence: sum,
    })
}

/// Detection counts grouped by plant or disease name.
fn entity_counts(conn: &Connection, entity: Entity) -> Result<Vec<(String, u64)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {col}, COUNT(*) FROM detections GROUP BY {col}",
        col = entity.column()
    ))?;
    let counts = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?.max(0) as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// Per UTC month: detection count and distinct users, oldest first.
fn monthly_growth(conn: &Connection) -> Result<Vec<MonthlyGrowth>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT substr(created_at, 1, 7) AS month,
               COUNT(*),
               COUNT(DISTINCT user_id)
        FROM detections
        GROUP BY month
        ORDER BY month
        "#,
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(MonthlyGrowth {
                month: r.get(0)?,
                detections: r.get::<_, i64>(1)?.max(0) as u64,
                users: r.get::<_, i64>(2)?.max(0) as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Round up to the next stored (microsecond) instant so `>=` never admits
/// a row stored before `ts`.
fn ceil_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = ts.trunc_subsecs(6);
    if truncated == ts {
        return ts;
    }
    truncated
        .checked_add_signed(Duration::microseconds(1))
        .unwrap_or(truncated)
}

fn push_range(
    sql: &mut String,
    params: &mut Vec<Box<dyn ToSql>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) {
    if let Some(start) = start {
        sql.push_str(" AND created_at >= ?");
        params.push(Box::new(fmt_ts(&ceil_micros(start))));
    }
    if let Some(end) = end {
        sql.push_str(" AND created_at <= ?");
        params.push(Box::new(fmt_ts(&end.trunc_subsecs(6))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().await.unwrap();
        db.insert_user(NewUser::new("alice"), Utc::now()).await.unwrap();
        db
    }

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sub_microsecond_start_excludes_earlier_row() {
        let db = setup().await;
        let (event, _) = db
            .insert_detection("alice", NewDetection::new("Tomato", "Blight", 0.9), t(1))
            .await
            .unwrap();

        let just_after = event.created_at + Duration::nanoseconds(1);
        let listed = db
            .list_user_detections("alice", Some(just_after), None, None)
            .await
            .unwrap();
        assert!(listed.is_empty());

        let listed = db
            .list_user_detections("alice", Some(event.created_at), Some(event.created_at), None)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_ceil_micros() {
        let base = t(1);
        assert_eq!(ceil_micros(base), base);
        assert_eq!(
            ceil_micros(base + Duration::nanoseconds(1)),
            base + Duration::microseconds(1)
        );
        assert_eq!(
            ceil_micros(base + Duration::nanoseconds(1_999)),
            base + Duration::microseconds(2)
        );
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = fmt_ts(&Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_ts(&a), Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()));
    }

    #[test]
    fn test_next_timestamp_bumps_past_latest() {
        assert_eq!(next_timestamp(t(2), Some(t(1))), t(2));
        assert_eq!(
            next_timestamp(t(1), Some(t(1))),
            t(1) + Duration::microseconds(1)
        );
        assert_eq!(
            next_timestamp(t(0), Some(t(1))),
            t(1) + Duration::microseconds(1)
        );
        assert_eq!(next_timestamp(t(0), None), t(0));
    }

    #[tokio::test]
    async fn test_insert_and_get_user() {
        let db = setup().await;
        let user = db.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.stats, UserStats::default());
        assert_eq!(user.preferences, UserPreferences::default());
        assert!(db.get_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let db = setup().await;
        let err = db
            .insert_user(NewUser::new("alice"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_insert_detection_updates_stats() {
        let db = setup().await;
        let (event, stats) = db
            .insert_detection("alice", NewDetection::new("Tomato", "Early Blight", 0.85), t(1))
            .await
            .unwrap();
        assert_eq!(event.created_at, t(1));
        assert_eq!(stats.total_detections, 1);
        assert_eq!(stats.successful_detections, 1);

        let stored = db.get_user_stats("alice").await.unwrap().unwrap();
        assert_eq!(stored, stats);
        let fetched = db.get_detection(&event.id).await.unwrap().unwrap();
        assert_eq!(fetched, event);
    }

    #[tokio::test]
    async fn test_insert_detection_unknown_user() {
        let db = setup().await;
        let err = db
            .insert_detection("ghost", NewDetection::new("Tomato", "Blight", 0.5), t(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn test_same_instant_inserts_are_strictly_ordered() {
        let db = setup().await;
        let (a, _) = db
            .insert_detection("alice", NewDetection::new("Tomato", "A", 0.9), t(3))
            .await
            .unwrap();
        let (b, _) = db
            .insert_detection("alice", NewDetection::new("Tomato", "B", 0.9), t(3))
            .await
            .unwrap();
        assert!(b.created_at > a.created_at);
    }

    #[tokio::test]
    async fn test_delete_detection_compensates_stats() {
        let db = setup().await;
        let (a, _) = db
            .insert_detection("alice", NewDetection::new("Tomato", "A", 0.8), t(1))
            .await
            .unwrap();
        db.insert_detection("alice", NewDetection::new("Tomato", "B", 0.2), t(2))
            .await
            .unwrap();

        let stats = db.delete_detection("alice", &a.id).await.unwrap();
        assert_eq!(stats.total_detections, 1);
        assert_eq!(stats.successful_detections, 0);
        assert!((stats.average_confidence() - 0.2).abs() < 1e-9);
        assert!(db.get_detection(&a.id).await.unwrap().is_none());

        let err = db.delete_detection("alice", &a.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "detection", .. }));
    }

    #[tokio::test]
    async fn test_delete_detection_of_other_user() {
        let db = setup().await;
        db.insert_user(NewUser::new("bob"), Utc::now()).await.unwrap();
        let (a, _) = db
            .insert_detection("alice", NewDetection::new("Tomato", "A", 0.8), t(1))
            .await
            .unwrap();
        let err = db.delete_detection("bob", &a.id).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
        assert_eq!(
            db.get_user_stats("alice").await.unwrap().unwrap().total_detections,
            1
        );
    }

    #[tokio::test]
    async fn test_query_detections_filters_and_orders() {
        let db = setup().await;
        for (h, plant, disease) in [
            (1, "Tomato", "Early Blight"),
            (2, "Potato", "Early Blight"),
            (3, "Tomato", "Late Blight"),
        ] {
            db.insert_detection("alice", NewDetection::new(plant, disease, 0.7), t(h))
                .await
                .unwrap();
        }

        let filter = HistoryFilter {
            page: 1,
            limit: 10,
            plant: Some("Tomato".to_string()),
            disease: None,
            start: None,
            end: None,
        };
        let (events, total) = db.query_detections("alice", filter).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(events[0].disease_name, "Late Blight");
        assert_eq!(events[1].disease_name, "Early Blight");

        let filter = HistoryFilter {
            page: 1,
            limit: 10,
            plant: None,
            disease: None,
            start: Some(t(2)),
            end: Some(t(2)),
        };
        let (events, total) = db.query_detections("alice", filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].plant_name, "Potato");
    }

    #[tokio::test]
    async fn test_update_preferences_partial() {
        let db = setup().await;
        let prefs = db
            .update_preferences(
                "alice",
                PreferencesUpdate {
                    language: Some(Language::De),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(prefs.language, Language::De);
        assert_eq!(prefs.units, Units::Metric);

        let user = db.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.preferences, prefs);
    }

    #[tokio::test]
    async fn test_global_aggregates() {
        let db = setup().await;
        db.insert_user(NewUser::new("bob"), Utc::now()).await.unwrap();
        db.insert_detection("alice", NewDetection::new("Tomato", "Early Blight", 0.9), t(1))
            .await
            .unwrap();
        db.insert_detection("bob", NewDetection::new("Potato", "Early Blight", 0.3), t(2))
            .await
            .unwrap();

        let snapshot = db.global_snapshot(t(2)).await.unwrap();
        let totals = &snapshot.totals;
        assert_eq!(totals.total_users, 2);
        assert_eq!(totals.active_users, 1);
        assert_eq!(totals.total_detections, 2);
        assert_eq!(totals.successful_detections, 1);
        assert!((totals.sum_confidence - 1.2).abs() < 1e-9);

        assert_eq!(
            snapshot.disease_counts,
            vec![("Early Blight".to_string(), 2)]
        );
        let mut plants = snapshot.plant_counts.clone();
        plants.sort();
        assert_eq!(
            plants,
            vec![("Potato".to_string(), 1), ("Tomato".to_string(), 1)]
        );

        let growth = &snapshot.monthly_growth;
        assert_eq!(growth.len(), 1);
        assert_eq!(growth[0].month, "2024-06");
        assert_eq!(growth[0].users, 2);
    }

    #[tokio::test]
    async fn test_disease_info_cache_round_trip() {
        let db = setup().await;
        assert!(db.get_cached_disease_info("abc").await.unwrap().is_none());
        let info = serde_json::json!({"symptoms": ["spots"]});
        db.put_cached_disease_info("abc", "Tomato", "Blight", info.clone(), t(1))
            .await
            .unwrap();
        assert_eq!(db.get_cached_disease_info("abc").await.unwrap(), Some(info));
    }
}
