use thiserror::Error;

use helpsl_types::Category;

use crate::location::ProbeMode;
use crate::subscriber::ViewId;

/// Device position failures. None of these are fatal; the form falls back to
/// typed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("timed out waiting for a position fix")]
    Timeout,

    #[error("position unavailable")]
    Unavailable,

    /// The view that asked for the fix went away first.
    #[error("location request cancelled")]
    Cancelled,
}

impl GeoError {
    /// Text to show the user, if this failure should be shown at all.
    pub fn user_message(&self, mode: ProbeMode) -> Option<&'static str> {
        if mode == ProbeMode::Silent {
            return None;
        }
        match self {
            Self::PermissionDenied => {
                Some("Location access was denied. Type your town or village instead.")
            }
            Self::Timeout => Some("Could not get a GPS fix in time. Type your location instead."),
            Self::Unavailable => {
                Some("Location is unavailable. Check that device location is on.")
            }
            Self::Cancelled => None,
        }
    }
}

/// Free-text geocoding failures. A record is still submitted, without coordinates.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("no match for '{0}'")]
    NotFound(String),

    #[error("geocoding request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed geocoder response: {0}")]
    Malformed(String),
}

/// Weather lookups only feed the header badge, which falls back to "GPS off".
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed weather response: {0}")]
    Malformed(String),
}

/// The backend refused or failed an insert/update. Shown to the user; the
/// form keeps its contents.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("undecodable backend response: {0}")]
    Decode(String),
}

/// Change stream failures. Recovered internally by reconnecting.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("could not open change stream: {0}")]
    Connect(String),

    #[error("change stream transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("change stream protocol error: {0}")]
    Protocol(String),

    #[error("{category} stream already open for view {view}")]
    AlreadyActive { category: Category, view: ViewId },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("HELPSL_DEVICE_LAT and HELPSL_DEVICE_LON must be set together")]
    HalfDeviceFix,
}
