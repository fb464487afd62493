//! Weather conditions and agricultural advice (OpenWeatherMap).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{http_client, read_json, transport_error};
use crate::config::WeatherConfig;
use crate::error::{Error, Result};
use crate::types::GeoPoint;

const SERVICE: &str = "weather";

/// Number of days returned by [`WeatherProvider::forecast`].
pub const FORECAST_DAYS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub location_name: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: Option<f64>,
    pub description: String,
    pub icon: Option<String>,
    pub visibility: Option<f64>,
    pub clouds: Option<f64>,
}

/// One day aggregated from 3-hour forecast slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub description: String,
    pub icon: Option<String>,
    /// Highest precipitation probability of the day, percent
    pub rain_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantHealth {
    Good,
    Stressed,
    AtRisk,
}

/// Advice derived from current conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgriculturalInsights {
    pub risk_level: RiskLevel,
    pub plant_health: PlantHealth,
    pub irrigation_needed: bool,
    pub pest_risk: RiskLevel,
    pub recommendations: Vec<String>,
}

/// Per-day advice derived from a forecast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastAdvice {
    pub irrigation_planning: Vec<String>,
    pub pest_management: Vec<String>,
    pub crop_protection: Vec<String>,
    pub general_advice: Vec<String>,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, point: GeoPoint) -> Result<CurrentWeather>;
    async fn forecast(&self, point: GeoPoint) -> Result<Vec<DailyForecast>>;
}

/// Insights for the current conditions.
///
/// Later rules override the risk level set by earlier ones.
pub fn agricultural_insights(weather: &CurrentWeather) -> AgriculturalInsights {
    let mut insights = AgriculturalInsights {
        risk_level: RiskLevel::Low,
        plant_health: PlantHealth::Good,
        irrigation_needed: false,
        pest_risk: RiskLevel::Low,
        recommendations: Vec::new(),
    };
    let description = weather.description.to_lowercase();

    if weather.temperature < 5.0 {
        insights.risk_level = RiskLevel::High;
        insights.plant_health = PlantHealth::AtRisk;
        insights
            .recommendations
            .push("Protect sensitive plants from frost".to_string());
    } else if weather.temperature > 35.0 {
        insights.risk_level = RiskLevel::High;
        insights.plant_health = PlantHealth::Stressed;
        insights
            .recommendations
            .push("Provide shade and extra watering".to_string());
    } else if weather.temperature > 25.0 {
        insights.risk_level = RiskLevel::Medium;
        insights
            .recommendations
            .push("Monitor for heat stress".to_string());
    }

    if weather.humidity > 80.0 {
        insights.pest_risk = RiskLevel::High;
        insights
            .recommendations
            .push("High humidity - watch for fungal diseases".to_string());
    } else if weather.humidity < 30.0 {
        insights.irrigation_needed = true;
        insights
            .recommendations
            .push("Low humidity - increase watering frequency".to_string());
    }

    if weather.wind_speed > 20.0 {
        insights.risk_level = RiskLevel::Medium;
        insights
            .recommendations
            .push("Strong winds - protect tall plants".to_string());
    }

    if description.contains("rain") {
        insights.irrigation_needed = false;
        insights
            .recommendations
            .push("Natural irrigation from rain".to_string());
    } else if description.contains("snow") {
        insights.risk_level = RiskLevel::High;
        insights
            .recommendations
            .push("Protect plants from snow damage".to_string());
    }

    insights
}

/// Planning advice across forecast days.
pub fn forecast_advice(days: &[DailyForecast]) -> ForecastAdvice {
    let mut advice = ForecastAdvice::default();
    for day in days {
        if day.rain_probability < 30.0 && day.humidity < 50.0 {
            advice.irrigation_planning.push(format!(
                "{}: Plan for irrigation due to low humidity and low rain probability",
                day.date
            ));
        }
        if day.humidity > 75.0 {
            advice.pest_management.push(format!(
                "{}: Monitor for fungal diseases due to high humidity",
                day.date
            ));
        }
        if day.temp_min < 5.0 {
            advice.crop_protection.push(format!(
                "{}: Protect sensitive crops from low temperatures",
                day.date
            ));
        } else if day.temp_max > 30.0 {
            advice.crop_protection.push(format!(
                "{}: Provide shade for heat-sensitive plants",
                day.date
            ));
        }
        if day.rain_probability > 70.0 {
            advice.general_advice.push(format!(
                "{}: Good day for natural irrigation, reduce manual watering",
                day.date
            ));
        }
    }
    advice
}

// ============================================
// OpenWeatherMap wire types
// ============================================

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    #[serde(default)]
    feels_like: Option<f64>,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
    #[serde(default)]
    humidity: f64,
    #[serde(default)]
    pressure: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OwmWind {
    #[serde(default)]
    speed: f64,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    #[serde(default)]
    description: String,
    icon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OwmClouds {
    all: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCurrent {
    #[serde(default)]
    name: String,
    main: OwmMain,
    #[serde(default)]
    wind: OwmWind,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    visibility: Option<f64>,
    #[serde(default)]
    clouds: OwmClouds,
}

#[derive(Debug, Deserialize)]
struct OwmForecast {
    #[serde(default)]
    list: Vec<OwmSlot>,
}

#[derive(Debug, Deserialize)]
struct OwmSlot {
    dt: i64,
    main: OwmMain,
    #[serde(default)]
    wind: OwmWind,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    #[serde(default)]
    pop: f64,
}

impl From<OwmCurrent> for CurrentWeather {
    fn from(raw: OwmCurrent) -> Self {
        let condition = raw.weather.into_iter().next();
        CurrentWeather {
            location_name: raw.name,
            temperature: raw.main.temp,
            feels_like: raw.main.feels_like.unwrap_or(raw.main.temp),
            humidity: raw.main.humidity,
            pressure: raw.main.pressure,
            wind_speed: raw.wind.speed,
            wind_direction: raw.wind.deg,
            description: condition
                .as_ref()
                .map(|c| c.description.clone())
                .unwrap_or_default(),
            icon: condition.and_then(|c| c.icon),
            visibility: raw.visibility,
            clouds: raw.clouds.all,
        }
    }
}

/// Fold 3-hour slots into UTC days, keeping extremes.
fn aggregate_daily(slots: Vec<OwmSlot>) -> Vec<DailyForecast> {
    let mut days: Vec<DailyForecast> = Vec::new();
    for slot in slots {
        let Some(date) = DateTime::<Utc>::from_timestamp(slot.dt, 0).map(|dt| dt.date_naive())
        else {
            continue;
        };
        let temp_min = slot.main.temp_min.unwrap_or(slot.main.temp);
        let temp_max = slot.main.temp_max.unwrap_or(slot.main.temp);
        let rain_probability = slot.pop * 100.0;

        match days.iter_mut().find(|d| d.date == date) {
            Some(day) => {
                day.temp_min = day.temp_min.min(temp_min);
                day.temp_max = day.temp_max.max(temp_max);
                day.rain_probability = day.rain_probability.max(rain_probability);
            }
            None => {
                let condition = slot.weather.into_iter().next();
                days.push(DailyForecast {
                    date,
                    temp_min,
                    temp_max,
                    humidity: slot.main.humidity,
                    wind_speed: slot.wind.speed,
                    description: condition
                        .as_ref()
                        .map(|c| c.description.clone())
                        .unwrap_or_default(),
                    icon: condition.and_then(|c| c.icon),
                    rain_probability,
                });
            }
        }
    }
    days.sort_by_key(|d| d.date);
    days.truncate(FORECAST_DAYS);
    days
}

/// HTTP client for OpenWeatherMap's 2.5 API
pub struct OpenWeatherClient {
    endpoint: String,
    api_key: String,
    units: String,
    http: reqwest::Client,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config("weather.api_key (or OPENWEATHER_API_KEY) is required".to_string())
        })?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            units: config.units.clone(),
            http: http_client(SERVICE, config.timeout_secs, Default::default())?,
        })
    }

    async fn get<T>(&self, path: &str, point: GeoPoint) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        point.validate()?;
        let response = self
            .http
            .get(format!("{}/{}", self.endpoint, path))
            .query(&[
                ("lat", point.latitude.to_string()),
                ("lon", point.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", self.units.clone()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        read_json(SERVICE, response).await
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current(&self, point: GeoPoint) -> Result<CurrentWeather> {
        let raw: OwmCurrent = self.get("weather", point).await?;
        Ok(raw.into())
    }

    async fn forecast(&self, point: GeoPoint) -> Result<Vec<DailyForecast>> {
        let raw: OwmForecast = self.get("forecast", point).await?;
        Ok(aggregate_daily(raw.list))
    }
}
