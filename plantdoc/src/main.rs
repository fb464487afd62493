//! plantdoc - plant disease detection history and analytics
//!
//! Records detections, pages through history, and prints personal and
//! store-wide overviews. With API keys configured it can also analyze leaf
//! images, answer plant-care questions, and report agricultural weather.

mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use plantdoc_core::{
    Caller, Config, Database, DetectionEdit, GeoPoint, HistoryQuery, Language, NewDetection,
    NewUser, PlantDoc, PreferencesUpdate, Units,
};

use crate::output::{Format, Printer};

#[derive(Parser)]
#[command(name = "plantdoc")]
#[command(about = "Plant disease detection history and analytics")]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: Format,

    /// Act as this user (defaults to the user being addressed)
    #[arg(long = "as", value_name = "USER", global = true)]
    caller: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage user profiles
    #[command(subcommand)]
    User(UserCommand),

    /// Record a detection
    Record {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        plant: String,
        #[arg(long)]
        disease: String,
        /// Classifier confidence between 0 and 1
        #[arg(long)]
        confidence: f64,
        #[arg(long)]
        image_ref: Option<String>,
        #[command(flatten)]
        location: LocationArgs,
        #[command(flatten)]
        advice: AdviceArgs,
    },

    /// Delete a detection
    Remove {
        #[arg(short, long)]
        user: String,
        detection_id: String,
    },

    /// Show one detection
    Show {
        #[arg(short, long)]
        user: String,
        detection_id: String,
    },

    /// Correct a detection's names, image, location or advice
    Edit {
        #[arg(short, long)]
        user: String,
        detection_id: String,
        #[arg(long)]
        plant: Option<String>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long, conflicts_with = "clear_image")]
        image_ref: Option<String>,
        /// Remove the stored image reference
        #[arg(long)]
        clear_image: bool,
        #[command(flatten)]
        location: LocationArgs,
        #[command(flatten)]
        advice: AdviceArgs,
    },

    /// Page through detection history, newest first
    History {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        plant: Option<String>,
        #[arg(long)]
        disease: Option<String>,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Recent activity feed
    Activity {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Personal dashboard over all detections
    Overview {
        #[arg(short, long)]
        user: String,
    },

    /// Personal statistics for a date range
    Stats {
        #[arg(short, long)]
        user: String,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Store-wide overview
    Global {
        /// Recompute instead of serving the cached overview
        #[arg(long)]
        refresh: bool,
    },

    /// Export everything stored for a user as JSON
    Export {
        #[arg(short, long)]
        user: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Identify the plant and disease in an image
    Analyze {
        image: PathBuf,
        /// Record the result for this user
        #[arg(short, long)]
        user: Option<String>,
        #[arg(long, requires = "user")]
        image_ref: Option<String>,
        #[command(flatten)]
        location: LocationArgs,
    },

    /// Ask a plant-care question
    Chat {
        #[arg(short, long)]
        user: String,
        message: String,
    },

    /// Show stored chat exchanges
    ChatHistory {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Suggested chat questions, including follow-ups on the latest detection
    ChatSuggestions {
        #[arg(short, long)]
        user: String,
    },

    /// Current weather and agricultural insights
    Weather {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Show the multi-day forecast instead
        #[arg(long)]
        forecast: bool,
    },

    /// Show file locations and which services are configured
    Config,
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create a user
    Create {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Show a user's profile and stats
    Show { id: String },

    /// Show or update a user's preferences
    Prefs {
        id: String,
        #[arg(long)]
        language: Option<Language>,
        #[arg(long)]
        units: Option<Units>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        dark_mode: Option<bool>,
        #[arg(long)]
        auto_location: Option<bool>,
    },
}

#[derive(Args)]
struct LocationArgs {
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
}

impl LocationArgs {
    fn point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}

#[derive(Args)]
struct AdviceArgs {
    #[arg(long = "symptom")]
    symptoms: Vec<String>,
    #[arg(long)]
    treatment: Vec<String>,
    #[arg(long)]
    prevention: Vec<String>,
}

impl AdviceArgs {
    fn non_empty(list: &[String]) -> Option<Vec<String>> {
        (!list.is_empty()).then(|| list.to_vec())
    }
}

#[derive(Args)]
struct RangeArgs {
    /// Start of range (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_start)]
    from: Option<DateTime<Utc>>,
    /// End of range, inclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_end)]
    to: Option<DateTime<Utc>>,
}

fn parse_time(s: &str, day_time: NaiveTime) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(day_time).and_utc())
        .map_err(|_| format!("expected YYYY-MM-DD or RFC 3339, got '{}'", s))
}

fn parse_start(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_time(s, NaiveTime::MIN)
}

/// Date-only ends cover the whole day.
fn parse_end(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
    parse_time(s, end_of_day)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        plantdoc_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "plantdoc starting");

    let printer = Printer::new(cli.format);

    // Open database
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate()
        .await
        .context("failed to run database migrations")?;

    let doc = PlantDoc::from_config(config, db).context("failed to set up plantdoc")?;
    let caller = |user: &str| Caller::new(cli.caller.as_deref().unwrap_or(user));

    match cli.command {
        Command::User(command) => run_user(&doc, &printer, cli.caller.as_deref(), command).await,

        Command::Record {
            user,
            plant,
            disease,
            confidence,
            image_ref,
            location,
            advice,
        } => {
            let detection = NewDetection {
                image_ref,
                location: location.point(),
                symptoms: advice.symptoms,
                treatment: advice.treatment,
                prevention: advice.prevention,
                ..NewDetection::new(&plant, &disease, confidence)
            };
            let event = doc
                .record_detection(&caller(&user), &user, detection)
                .await
                .context("failed to record detection")?;
            printer.detection(&event)
        }

        Command::Remove { user, detection_id } => {
            let stats = doc
                .remove_detection(&caller(&user), &user, &detection_id)
                .await
                .context("failed to remove detection")?;
            printer.stats(&user, &stats)
        }

        Command::Show { user, detection_id } => {
            let event = doc
                .get_detection(&caller(&user), &detection_id)
                .await
                .context("failed to load detection")?;
            printer.detection(&event)
        }

        Command::Edit {
            user,
            detection_id,
            plant,
            disease,
            image_ref,
            clear_image,
            location,
            advice,
        } => {
            let edit = DetectionEdit {
                plant_name: plant,
                disease_name: disease,
                image_ref: if clear_image {
                    Some(None)
                } else {
                    image_ref.map(Some)
                },
                location: location.point(),
                symptoms: AdviceArgs::non_empty(&advice.symptoms),
                treatment: AdviceArgs::non_empty(&advice.treatment),
                prevention: AdviceArgs::non_empty(&advice.prevention),
            };
            let event = doc
                .update_detection(&caller(&user), &detection_id, edit)
                .await
                .context("failed to update detection")?;
            printer.detection(&event)
        }

        Command::History {
            user,
            page,
            limit,
            plant,
            disease,
            range,
        } => {
            let query = HistoryQuery {
                page,
                limit,
                plant,
                disease,
                start: range.from,
                end: range.to,
            };
            let page = doc
                .query_history(&caller(&user), &user, query)
                .await
                .context("failed to query history")?;
            printer.history(&page)
        }

        Command::Activity { user, page, limit } => {
            let entries = doc
                .recent_activity(&caller(&user), &user, page, limit)
                .await
                .context("failed to load activity")?;
            printer.activity(&entries)
        }

        Command::Overview { user } => {
            let overview = doc
                .personal_overview(&caller(&user), &user)
                .await
                .context("failed to build overview")?;
            printer.personal(&overview)
        }

        Command::Stats { user, range } => {
            let overview = doc
                .history_stats(&caller(&user), &user, range.from, range.to)
                .await
                .context("failed to build statistics")?;
            printer.personal(&overview)
        }

        Command::Global { refresh } => {
            let overview = if refresh {
                doc.refresh_global_overview().await
            } else {
                doc.global_overview().await
            }
            .context("failed to build global overview")?;
            printer.global(&overview)
        }

        Command::Export { user, output } => {
            let export = doc
                .export_user_data(&caller(&user), &user)
                .await
                .context("failed to export user data")?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!(
                        "Exported {} detection(s) and {} chat(s) to {}",
                        export.detections.len(),
                        export.chat_history.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }

        Command::Analyze {
            image,
            user,
            image_ref,
            location,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read image {}", image.display()))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

            match user {
                Some(user) => {
                    let event = doc
                        .analyze_and_record(
                            &caller(&user),
                            &user,
                            &encoded,
                            location.point(),
                            image_ref,
                        )
                        .await
                        .context("failed to analyze image")?;
                    printer.detection(&event)
                }
                None => {
                    let analysis = doc
                        .analyze(&encoded, location.point())
                        .await
                        .context("failed to analyze image")?;
                    printer.analysis(&analysis)
                }
            }
        }

        Command::Chat { user, message } => {
            let exchange = doc
                .chat(&caller(&user), &user, &message)
                .await
                .context("chat request failed")?;
            printer.chat(&exchange)
        }

        Command::ChatHistory { user, page, limit } => {
            let chats = doc
                .chat_history(&caller(&user), &user, page, limit)
                .await
                .context("failed to load chat history")?;
            printer.chat_page(&chats)
        }

        Command::ChatSuggestions { user } => {
            let suggestions = doc
                .chat_suggestions(&caller(&user), &user)
                .await
                .context("failed to load chat suggestions")?;
            printer.suggestions(&suggestions)
        }

        Command::Weather { lat, lon, forecast } => {
            let point = GeoPoint::new(lat, lon)?;
            if forecast {
                let report = doc
                    .forecast(point)
                    .await
                    .context("failed to fetch forecast")?;
                printer.forecast(&report)
            } else {
                let report = doc
                    .current_weather(point)
                    .await
                    .context("failed to fetch weather")?;
                printer.weather(&report)
            }
        }

        Command::Config => printer.config(doc.config()),
    }
}

async fn run_user(
    doc: &PlantDoc,
    printer: &Printer,
    acting_as: Option<&str>,
    command: UserCommand,
) -> Result<()> {
    let caller = |user: &str| Caller::new(acting_as.unwrap_or(user));

    match command {
        UserCommand::Create { id, name, email } => {
            let user = doc
                .create_user(NewUser {
                    display_name: name,
                    email,
                    ..NewUser::new(&id)
                })
                .await
                .context("failed to create user")?;
            printer.user(&user)
        }

        UserCommand::Show { id } => {
            let user = doc
                .get_user(&caller(&id), &id)
                .await
                .context("failed to load user")?;
            printer.user(&user)
        }

        UserCommand::Prefs {
            id,
            language,
            units,
            notifications,
            dark_mode,
            auto_location,
        } => {
            let update = PreferencesUpdate {
                language,
                units,
                notifications,
                dark_mode,
                auto_location,
            };
            let prefs = if update == PreferencesUpdate::default() {
                doc.preferences(&caller(&id), &id).await
            } else {
                doc.update_preferences(&caller(&id), &id, update).await
            }
            .context("failed to handle preferences")?;
            printer.preferences(&id, &prefs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_date_only_range_covers_whole_day() {
        let start = parse_start("2024-03-01").unwrap();
        let end = parse_end("2024-03-01").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(end > Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_rfc3339_range_is_exact() {
        let at = parse_end("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert!(parse_start("March 1st").is_err());
    }
}
