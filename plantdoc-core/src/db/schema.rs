//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Timestamps are stored as fixed-width RFC 3339 text with microseconds and a
//! `Z` suffix, so string comparison matches chronological order.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: users, detections, chat
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                    TEXT PRIMARY KEY,
        display_name          TEXT,
        email                 TEXT,
        created_at            TEXT NOT NULL,
        last_active_at        TEXT,

        -- Running aggregates, updated in the same transaction as detections
        total_detections      INTEGER NOT NULL DEFAULT 0,
        successful_detections INTEGER NOT NULL DEFAULT 0,
        sum_confidence        REAL NOT NULL DEFAULT 0,
        last_detection_at     TEXT,

        -- Preferences
        language              TEXT NOT NULL DEFAULT 'en',
        units                 TEXT NOT NULL DEFAULT 'metric',
        notifications         INTEGER NOT NULL DEFAULT 1,
        dark_mode             INTEGER NOT NULL DEFAULT 0,
        auto_location         INTEGER NOT NULL DEFAULT 1,

        CHECK (successful_detections <= total_detections),
        CHECK (sum_confidence >= 0)
    );

    CREATE TABLE IF NOT EXISTS detections (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        plant_name       TEXT NOT NULL,
        disease_name     TEXT NOT NULL,
        confidence       REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
        image_ref        TEXT,
        latitude         REAL,
        longitude        REAL,
        symptoms         JSON NOT NULL DEFAULT '[]',
        treatment        JSON NOT NULL DEFAULT '[]',
        prevention       JSON NOT NULL DEFAULT '[]',
        created_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_detections_user_created
        ON detections(user_id, created_at DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_detections_created ON detections(created_at);
    CREATE INDEX IF NOT EXISTS idx_detections_disease ON detections(disease_name);
    CREATE INDEX IF NOT EXISTS idx_detections_plant ON detections(plant_name);

    CREATE TABLE IF NOT EXISTS chat_history (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        user_message     TEXT NOT NULL,
        ai_response      TEXT NOT NULL,
        context          JSON NOT NULL DEFAULT '{}',
        created_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_user_created
        ON chat_history(user_id, created_at DESC);
    "#,
    // Version 2: cached disease enrichment, keyed by prompt hash
    r#"
    CREATE TABLE IF NOT EXISTS disease_info_cache (
        prompt_hash      TEXT PRIMARY KEY,
        plant_name       TEXT NOT NULL,
        disease_name     TEXT NOT NULL,
        info             JSON NOT NULL,
        created_at       TEXT NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
