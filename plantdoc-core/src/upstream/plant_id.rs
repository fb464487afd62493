//! Plant and disease identification (Kindwise crop.health).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{http_client, read_json, transport_error};
use crate::config::PlantIdConfig;
use crate::error::{Error, Result};
use crate::types::GeoPoint;

const SERVICE: &str = "plant-id";

/// Location sent when the caller gives none.
pub const DEFAULT_LOCATION: GeoPoint = GeoPoint {
    latitude: 49.207,
    longitude: 16.608,
};

pub const UNKNOWN_PLANT: &str = "Unknown Plant";
pub const NO_DISEASE: &str = "No Disease Detected";

/// Top suggestion for plant and disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub plant_name: String,
    pub plant_confidence: f64,
    pub disease_name: String,
    /// Disease probability in [0,1]
    pub confidence: f64,
}

#[async_trait]
pub trait PlantIdentifier: Send + Sync {
    /// Identify plant and disease from a base64-encoded JPEG.
    async fn identify(&self, image_base64: &str, location: GeoPoint) -> Result<Identification>;
}

#[derive(Debug, Deserialize)]
struct IdentificationResponse {
    result: Option<IdentificationResult>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentificationResult {
    #[serde(default)]
    crop: Option<Suggestions>,
    #[serde(default)]
    disease: Option<Suggestions>,
}

#[derive(Debug, Default, Deserialize)]
struct Suggestions {
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    name: Option<String>,
    #[serde(default)]
    probability: f64,
}

fn top(suggestions: &Option<Suggestions>) -> Option<&Suggestion> {
    suggestions.as_ref().and_then(|s| s.suggestions.first())
}

impl IdentificationResult {
    fn into_identification(self) -> Identification {
        let crop = top(&self.crop);
        let disease = top(&self.disease);

        Identification {
            plant_name: crop
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| UNKNOWN_PLANT.to_string()),
            plant_confidence: crop.map(|s| s.probability.clamp(0.0, 1.0)).unwrap_or(0.0),
            disease_name: disease
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| NO_DISEASE.to_string()),
            confidence: disease.map(|s| s.probability.clamp(0.0, 1.0)).unwrap_or(0.0),
        }
    }
}

/// HTTP client for the crop.health identification endpoint
pub struct KindwiseClient {
    endpoint: String,
    http: reqwest::Client,
}

impl KindwiseClient {
    pub fn new(config: &PlantIdConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config("plant_id.api_key (or KINDWISE_API_KEY) is required".to_string())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| Error::Config(format!("invalid plant_id api key header: {}", e)))?,
        );

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http: http_client(SERVICE, config.timeout_secs, headers)?,
        })
    }
}

#[async_trait]
impl PlantIdentifier for KindwiseClient {
    async fn identify(&self, image_base64: &str, location: GeoPoint) -> Result<Identification> {
        let url = format!("{}/identification", self.endpoint);
        let started = std::time::Instant::now();

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "images": [format!("data:image/jpeg;base64,{}", image_base64)],
                "latitude": location.latitude,
                "longitude": location.longitude,
                "similar_images": true,
            }))
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let body: IdentificationResponse = read_json(SERVICE, response).await?;
        let result = body.result.ok_or_else(|| Error::Upstream {
            service: SERVICE,
            status: None,
            message: "no identification result".to_string(),
        })?;

        let identification = result.into_identification();
        tracing::info!(
            plant = %identification.plant_name,
            disease = %identification.disease_name,
            confidence = identification.confidence,
            duration_ms = started.elapsed().as_millis() as u64,
            "Plant identified"
        );
        Ok(identification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Identification {
        let body: IdentificationResponse = serde_json::from_str(raw).unwrap();
        body.result.unwrap().into_identification()
    }

    #[test]
    fn test_takes_top_suggestions() {
        let id = parse(
            r#"{"result": {
                "crop": {"suggestions": [{"name": "Tomato", "probability": 0.97},
                                          {"name": "Pepper", "probability": 0.02}]},
                "disease": {"suggestions": [{"name": "Early Blight", "probability": 0.85}]}
            }}"#,
        );
        assert_eq!(id.plant_name, "Tomato");
        assert_eq!(id.disease_name, "Early Blight");
        assert!((id.confidence - 0.85).abs() < 1e-12);
        assert!((id.plant_confidence - 0.97).abs() < 1e-12);
    }

    #[test]
    fn test_missing_suggestions_fall_back() {
        let id = parse(r#"{"result": {"crop": {"suggestions": []}}}"#);
        assert_eq!(id.plant_name, UNKNOWN_PLANT);
        assert_eq!(id.disease_name, NO_DISEASE);
        assert_eq!(id.confidence, 0.0);
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = PlantIdConfig {
            api_key: None,
            endpoint: "http://localhost".to_string(),
            timeout_secs: 1,
        };
        if std::env::var("KINDWISE_API_KEY").is_err() {
            assert!(matches!(KindwiseClient::new(&config), Err(Error::Config(_))));
        }
    }
}
