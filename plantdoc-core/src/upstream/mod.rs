//! Clients for the third-party services plantdoc calls
//!
//! Each service sits behind an async trait so the facade can be driven by
//! mocks in tests:
//! - [`PlantIdentifier`]: image to plant and disease labels (Kindwise crop.health)
//! - [`TextGenerator`]: prompt to text (Gemini)
//! - [`WeatherProvider`]: current conditions and forecast (OpenWeatherMap)
//!
//! All HTTP clients carry the timeout from config. Transport timeouts become
//! [`Error::UpstreamTimeout`]; non-2xx answers become [`Error::Upstream`].

pub mod disease_info;
pub mod llm;
pub mod plant_id;
pub mod weather;

use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::error::{Error, Result};

pub use disease_info::DiseaseInfo;
pub use llm::{GeminiClient, TextGenerator};
pub use plant_id::{Identification, KindwiseClient, PlantIdentifier, DEFAULT_LOCATION};
pub use weather::{
    AgriculturalInsights, CurrentWeather, DailyForecast, OpenWeatherClient, WeatherProvider,
};

/// Build a reqwest client with a request timeout and default headers.
pub(crate) fn http_client(
    service: &'static str,
    timeout_secs: u64,
    headers: HeaderMap,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .default_headers(headers)
        .build()
        .map_err(|e| Error::Config(format!("failed to build {} HTTP client: {}", service, e)))
}

/// Map a reqwest transport failure into the crate error taxonomy.
pub(crate) fn transport_error(service: &'static str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::UpstreamTimeout { service }
    } else {
        Error::Upstream {
            service,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Check the status and decode a JSON body.
pub(crate) async fn read_json<T>(service: &'static str, response: reqwest::Response) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(service, e))?;

    if !status.is_success() {
        return Err(Error::Upstream {
            service,
            status: Some(status.as_u16()),
            message: truncate(&body, 200),
        });
    }

    serde_json::from_str(&body).map_err(|e| Error::Upstream {
        service,
        status: Some(status.as_u16()),
        message: format!("invalid response body: {}", e),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
