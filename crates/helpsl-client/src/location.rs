//! Coordinate resolution for new records: a GPS fix when the user has one,
//! otherwise a geocoded guess from the typed place name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use helpsl_types::Coordinates;

use crate::error::{GeoError, GeocodeError};

/// What the user has given us about where they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationInput {
    pub gps: Option<Coordinates>,
    pub typed_text: Option<String>,
}

/// Who asked for the device position. Silent probes never bother the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Silent,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub timeout: Duration,
    pub high_accuracy: bool,
}

impl ProbeMode {
    pub fn options(self) -> PositionOptions {
        match self {
            Self::Silent => PositionOptions {
                timeout: Duration::from_secs(10),
                high_accuracy: false,
            },
            Self::Interactive => PositionOptions {
                timeout: Duration::from_secs(30),
                high_accuracy: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coordinates: Coordinates,
    /// Radius in metres, when the platform reports one.
    pub accuracy_m: Option<f64>,
}

/// One geocoder match. Coordinates arrive as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeocodeCandidate {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl GeocodeCandidate {
    pub fn coordinates(&self) -> Result<Coordinates, GeocodeError> {
        let parse = |value: &str| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| GeocodeError::Malformed(format!("'{}' is not a number", value)))
        };
        let lat = parse(&self.lat)?;
        let lon = parse(&self.lon)?;
        Coordinates::new(lat, lon).map_err(|e| GeocodeError::Malformed(e.to_string()))
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Ordered candidate matches for a free-text query.
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>, GeocodeError>;
}

#[async_trait]
pub trait Geolocation: Send + Sync {
    async fn current_position(&self, options: PositionOptions) -> Result<Position, GeoError>;
}

pub struct LocationResolver {
    geocoder: Arc<dyn Geocoder>,
    geolocation: Arc<dyn Geolocation>,
    country: String,
}

impl LocationResolver {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        geolocation: Arc<dyn Geolocation>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            geolocation,
            country: country.into(),
        }
    }

    /// Geocoder query for a typed place name, pinned to the configured country.
    pub fn qualified_query(&self, text: &str) -> String {
        format!("{}, {}", text.trim(), self.country)
    }

    /// Coordinates for a submission, or `None` if they cannot be had.
    ///
    /// A GPS fix always wins over typed text. Geocoding trouble is logged and
    /// swallowed so it never blocks a submission.
    pub async fn resolve(&self, input: &LocationInput) -> Option<Coordinates> {
        if let Some(gps) = input.gps {
            return Some(gps);
        }

        let text = input
            .typed_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())?;

        match self.geocode(text).await {
            Ok(coordinates) => {
                debug!("geocoded '{}' to {}", text, coordinates);
                Some(coordinates)
            }
            Err(e) => {
                warn!("geocoding '{}' failed, submitting without coordinates: {}", text, e);
                None
            }
        }
    }

    /// First geocoder match for `text`.
    pub async fn geocode(&self, text: &str) -> Result<Coordinates, GeocodeError> {
        let query = self.qualified_query(text);
        let candidates = self.geocoder.search(&query).await?;
        candidates
            .first()
            .ok_or(GeocodeError::NotFound(query))?
            .coordinates()
    }

    /// Ask the platform for the device position, giving up after the mode's
    /// timeout. Once `cancel` fires the outcome is discarded, even if a fix
    /// arrives at the same moment.
    pub async fn resolve_device_location(
        &self,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Result<Coordinates, GeoError> {
        let options = mode.options();
        let probe = tokio::time::timeout(options.timeout, self.geolocation.current_position(options));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GeoError::Cancelled),
            outcome = probe => outcome,
        };
        if cancel.is_cancelled() {
            return Err(GeoError::Cancelled);
        }

        let result = match outcome {
            Ok(result) => result.map(|position| position.coordinates),
            Err(_) => Err(GeoError::Timeout),
        };

        match (&result, mode) {
            (Ok(coordinates), _) => info!("device location {}", coordinates),
            (Err(e), ProbeMode::Silent) => debug!("silent location probe failed: {}", e),
            (Err(e), ProbeMode::Interactive) => warn!("location request failed: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubGeocoder {
        answer: fn(&str) -> Result<Vec<GeocodeCandidate>, GeocodeError>,
        queries: Mutex<Vec<String>>,
    }

    impl StubGeocoder {
        fn new(answer: fn(&str) -> Result<Vec<GeocodeCandidate>, GeocodeError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                queries: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
            self.queries.lock().unwrap().push(query.to_string());
            (self.answer)(query)
        }
    }

    fn candidate(lat: &str, lon: &str) -> GeocodeCandidate {
        GeocodeCandidate {
            lat: lat.into(),
            lon: lon.into(),
            display_name: None,
        }
    }

    fn malabe(query: &str) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
        if query == "Malabe, Sri Lanka" {
            Ok(vec![candidate("6.9", "79.9"), candidate("7.0", "80.0")])
        } else {
            Ok(vec![])
        }
    }

    /// Geolocation that answers after `delay` with `answer`.
    struct StubGeolocation {
        delay: Duration,
        answer: Result<Position, GeoError>,
    }

    #[async_trait]
    impl Geolocation for StubGeolocation {
        async fn current_position(&self, _options: PositionOptions) -> Result<Position, GeoError> {
            tokio::time::sleep(self.delay).await;
            self.answer
        }
    }

    fn fix() -> Position {
        Position {
            coordinates: Coordinates { latitude: 7.29, longitude: 80.63 },
            accuracy_m: Some(12.0),
        }
    }

    fn resolver(geocoder: Arc<StubGeocoder>, geolocation: StubGeolocation) -> LocationResolver {
        LocationResolver::new(geocoder, Arc::new(geolocation), "Sri Lanka")
    }

    fn idle_geolocation() -> StubGeolocation {
        StubGeolocation {
            delay: Duration::ZERO,
            answer: Err(GeoError::Unavailable),
        }
    }

    #[tokio::test]
    async fn gps_fix_wins_and_never_geocodes() {
        let geocoder = StubGeocoder::new(malabe);
        let resolver = resolver(geocoder.clone(), idle_geolocation());

        let input = LocationInput {
            gps: Some(Coordinates { latitude: 6.9, longitude: 79.9 }),
            typed_text: Some("Colombo".into()),
        };
        assert_eq!(
            resolver.resolve(&input).await,
            Some(Coordinates { latitude: 6.9, longitude: 79.9 })
        );
        assert!(geocoder.queries().is_empty());
    }

    #[tokio::test]
    async fn typed_text_is_qualified_with_country_and_first_match_used() {
        let geocoder = StubGeocoder::new(malabe);
        let resolver = resolver(geocoder.clone(), idle_geolocation());

        let input = LocationInput {
            gps: None,
            typed_text: Some("Malabe".into()),
        };
        assert_eq!(
            resolver.resolve(&input).await,
            Some(Coordinates { latitude: 6.9, longitude: 79.9 })
        );
        assert_eq!(geocoder.queries(), vec!["Malabe, Sri Lanka".to_string()]);
    }

    #[tokio::test]
    async fn empty_input_resolves_to_none() {
        let geocoder = StubGeocoder::new(malabe);
        let resolver = resolver(geocoder.clone(), idle_geolocation());

        assert_eq!(resolver.resolve(&LocationInput::default()).await, None);
        let blank = LocationInput {
            gps: None,
            typed_text: Some("   ".into()),
        };
        assert_eq!(resolver.resolve(&blank).await, None);
        assert!(geocoder.queries().is_empty());
    }

    #[tokio::test]
    async fn geocoder_failures_degrade_to_none() {
        let no_match = resolver(StubGeocoder::new(malabe), idle_geolocation());
        let input = LocationInput {
            gps: None,
            typed_text: Some("Atlantis".into()),
        };
        assert_eq!(no_match.resolve(&input).await, None);

        let garbage = resolver(
            StubGeocoder::new(|_| Ok(vec![candidate("north", "79.9")])),
            idle_geolocation(),
        );
        assert_eq!(garbage.resolve(&input).await, None);
        assert!(matches!(
            garbage.geocode("Atlantis").await,
            Err(GeocodeError::Malformed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn device_probe_times_out() {
        let resolver = resolver(
            StubGeocoder::new(malabe),
            StubGeolocation {
                delay: Duration::from_secs(60),
                answer: Ok(fix()),
            },
        );
        let cancel = CancellationToken::new();

        let err = resolver
            .resolve_device_location(ProbeMode::Silent, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, GeoError::Timeout);
        assert_eq!(err.user_message(ProbeMode::Silent), None);
        assert!(err.user_message(ProbeMode::Interactive).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn device_fix_after_cancellation_is_discarded() {
        let resolver = resolver(
            StubGeocoder::new(malabe),
            StubGeolocation {
                delay: Duration::from_secs(5),
                answer: Ok(fix()),
            },
        );
        let cancel = CancellationToken::new();

        let closer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            closer.cancel();
        });

        let result = resolver
            .resolve_device_location(ProbeMode::Interactive, &cancel)
            .await;
        assert_eq!(result, Err(GeoError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn device_fix_is_returned_and_denial_passed_through() {
        let ok = resolver(
            StubGeocoder::new(malabe),
            StubGeolocation {
                delay: Duration::from_secs(2),
                answer: Ok(fix()),
            },
        );
        let cancel = CancellationToken::new();
        assert_eq!(
            ok.resolve_device_location(ProbeMode::Interactive, &cancel).await,
            Ok(fix().coordinates)
        );

        let denied = resolver(
            StubGeocoder::new(malabe),
            StubGeolocation {
                delay: Duration::ZERO,
                answer: Err(GeoError::PermissionDenied),
            },
        );
        assert_eq!(
            denied.resolve_device_location(ProbeMode::Interactive, &cancel).await,
            Err(GeoError::PermissionDenied)
        );
    }
}
