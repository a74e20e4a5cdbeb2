use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use helpsl_types::{Coordinates, HelpRecord};

use crate::actions::StatusUpdater;
use crate::backend::{Backend, HttpBackend};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::device::StaticGeolocation;
use crate::error::{GeoError, SubmitError};
use crate::feed::{ChangeFeed, WsChangeFeed};
use crate::geocode::NominatimGeocoder;
use crate::location::LocationResolver;
use crate::submit::{self, SubmissionForm};
use crate::subscriber::ChangeStreamSubscriber;
use crate::weather::{self, CurrentWeather, OpenMeteo, WeatherSource};

/// Everything a view needs from the outside world, built once per process
/// and shared through `Arc`.
pub struct ServiceContext {
    pub backend: Arc<dyn Backend>,
    pub subscriber: ChangeStreamSubscriber,
    pub resolver: LocationResolver,
    pub status: StatusUpdater,
    pub weather: Arc<dyn WeatherSource>,
}

impl ServiceContext {
    pub fn new(
        backend: Arc<dyn Backend>,
        feed: Arc<dyn ChangeFeed>,
        resolver: LocationResolver,
        weather: Arc<dyn WeatherSource>,
        reconnect: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            status: StatusUpdater::new(backend.clone()),
            subscriber: ChangeStreamSubscriber::new(feed, reconnect),
            backend,
            resolver,
            weather,
        })
    }

    /// HTTP backend, WebSocket change feed, Nominatim geocoder and Open-Meteo.
    pub fn from_config(config: &ClientConfig) -> Result<Arc<Self>, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        let backend = Arc::new(HttpBackend::new(http, &config.api_url));
        let feed = Arc::new(WsChangeFeed::new(config.realtime_url.clone()));
        let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoder_url, &config.user_agent)?);
        let geolocation = Arc::new(StaticGeolocation::new(config.device_fix));
        let resolver = LocationResolver::new(geocoder, geolocation, config.country.clone());
        let weather = Arc::new(OpenMeteo::new(&config.weather_url, &config.user_agent)?);

        info!(api = %config.api_url, realtime = %config.realtime_url, "service context ready");
        Ok(Self::new(backend, feed, resolver, weather, config.reconnect.clone()))
    }

    pub async fn submit(&self, form: &SubmissionForm) -> Result<HelpRecord, SubmitError> {
        submit::submit(self.backend.as_ref(), &self.resolver, form).await
    }

    pub async fn capture_gps(
        &self,
        form: &mut SubmissionForm,
        cancel: &CancellationToken,
    ) -> Result<Coordinates, GeoError> {
        submit::capture_gps(&self.resolver, form, cancel).await
    }

    /// Badge weather from a silent position probe; `None` shows "GPS off".
    pub async fn weather_here(&self, cancel: &CancellationToken) -> Option<CurrentWeather> {
        weather::weather_here(&self.resolver, self.weather.as_ref(), cancel).await
    }
}
