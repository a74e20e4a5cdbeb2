//! Current weather at the device position, shown as a header badge.
//!
//! The position comes from a silent probe: nobody asked for it, so a refusal
//! or timeout only hides the badge.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use helpsl_types::Coordinates;

use crate::error::WeatherError;
use crate::location::{LocationResolver, ProbeMode};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentWeather {
    pub temperature_c: f64,
    /// WMO weather interpretation code.
    pub code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditions {
    Clear,
    Cloudy,
    Rain,
    Thunderstorm,
}

impl CurrentWeather {
    /// Coarse bucket for the badge icon. Fog and anything else unlisted
    /// counts as clear.
    pub fn conditions(&self) -> Conditions {
        match self.code {
            95.. => Conditions::Thunderstorm,
            51.. => Conditions::Rain,
            1..=3 => Conditions::Cloudy,
            _ => Conditions::Clear,
        }
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, at: Coordinates) -> Result<CurrentWeather, WeatherError>;
}

/// Open-Meteo forecast API (`/forecast?latitude=..&longitude=..&current_weather=true`).
pub struct OpenMeteo {
    client: reqwest::Client,
    base_url: String,
}

impl OpenMeteo {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WeatherSource for OpenMeteo {
    async fn current(&self, at: Coordinates) -> Result<CurrentWeather, WeatherError> {
        let url = format!("{}/forecast", self.base_url);
        debug!(url = %url, position = %at, "fetching current weather");

        let body = self
            .client
            .get(&url)
            .query(&[
                ("latitude", at.latitude.to_string()),
                ("longitude", at.longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_current(&body)
    }
}

#[derive(Deserialize)]
struct ForecastBody {
    current_weather: CurrentWeatherBody,
}

#[derive(Deserialize)]
struct CurrentWeatherBody {
    temperature: f64,
    weathercode: u16,
}

fn parse_current(body: &str) -> Result<CurrentWeather, WeatherError> {
    let forecast: ForecastBody =
        serde_json::from_str(body).map_err(|e| WeatherError::Malformed(e.to_string()))?;
    Ok(CurrentWeather {
        temperature_c: forecast.current_weather.temperature,
        code: forecast.current_weather.weathercode,
    })
}

/// Weather where the device is, or `None` when either the position or the
/// forecast cannot be had.
pub async fn weather_here(
    resolver: &LocationResolver,
    source: &dyn WeatherSource,
    cancel: &CancellationToken,
) -> Option<CurrentWeather> {
    let position = resolver
        .resolve_device_location(ProbeMode::Silent, cancel)
        .await
        .ok()?;

    match source.current(position).await {
        Ok(weather) => Some(weather),
        Err(e) => {
            debug!("no weather for {}: {}", position, e);
            None
        }
    }
}
