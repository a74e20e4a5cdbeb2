use std::time::Duration;

use helpsl_types::Coordinates;

use crate::error::ConfigError;

const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1";
const DEFAULT_COUNTRY: &str = "Sri Lanka";
const DEFAULT_USER_AGENT: &str = concat!("helpsl-client/", env!("CARGO_PKG_VERSION"));

/// How the change stream backs off after a dropped or refused connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures after which views are told their data is stale.
    /// Retrying continues regardless.
    pub stale_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            stale_after: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, doubling per consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub realtime_url: String,
    pub geocoder_url: String,
    pub weather_url: String,
    pub country: String,
    pub user_agent: String,
    pub reconnect: ReconnectPolicy,
    /// Fixed position for hosts without a GPS device.
    pub device_fix: Option<Coordinates>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_url: realtime_url_for(DEFAULT_API_URL),
            geocoder_url: DEFAULT_GEOCODER_URL.to_string(),
            weather_url: DEFAULT_WEATHER_URL.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reconnect: ReconnectPolicy::default(),
            device_fix: None,
        }
    }
}

impl ClientConfig {
    /// Read `HELPSL_*` variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = lookup("HELPSL_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);
        let realtime_url =
            lookup("HELPSL_REALTIME_URL").unwrap_or_else(|| realtime_url_for(&api_url));

        let mut reconnect = defaults.reconnect;
        if let Some(attempts) = parse_var(&lookup, "HELPSL_RECONNECT_ATTEMPTS")? {
            reconnect.stale_after = attempts;
        }
        if let Some(delay_ms) = parse_var::<u64>(&lookup, "HELPSL_RECONNECT_DELAY_MS")? {
            reconnect.initial_delay = Duration::from_millis(delay_ms);
        }

        let lat = parse_var::<f64>(&lookup, "HELPSL_DEVICE_LAT")?;
        let lon = parse_var::<f64>(&lookup, "HELPSL_DEVICE_LON")?;
        let device_fix = match (lat, lon) {
            (Some(lat), Some(lon)) => {
                Some(Coordinates::new(lat, lon).map_err(|_| ConfigError::Invalid {
                    var: "HELPSL_DEVICE_LAT",
                    value: format!("{}, {}", lat, lon),
                })?)
            }
            (None, None) => None,
            _ => return Err(ConfigError::HalfDeviceFix),
        };

        Ok(Self {
            api_url,
            realtime_url,
            geocoder_url: lookup("HELPSL_GEOCODER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.geocoder_url),
            weather_url: lookup("HELPSL_WEATHER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.weather_url),
            country: lookup("HELPSL_COUNTRY").unwrap_or(defaults.country),
            user_agent: lookup("HELPSL_USER_AGENT").unwrap_or(defaults.user_agent),
            reconnect,
            device_fix,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// `http://host:port` -> `ws://host:port/realtime` (and https -> wss).
pub fn realtime_url_for(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/realtime", ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:3000");
        assert_eq!(config.realtime_url, "ws://127.0.0.1:3000/realtime");
        assert_eq!(config.country, "Sri Lanka");
        assert_eq!(config.weather_url, "https://api.open-meteo.com/v1");
        assert_eq!(config.reconnect.stale_after, 5);
        assert!(config.device_fix.is_none());
    }

    #[test]
    fn realtime_url_follows_api_url_scheme() {
        let config = ClientConfig::from_lookup(lookup_from(&[(
            "HELPSL_API_URL",
            "https://helpsl.example.org/",
        )]))
        .unwrap();
        assert_eq!(config.api_url, "https://helpsl.example.org");
        assert_eq!(config.realtime_url, "wss://helpsl.example.org/realtime");
    }

    #[test]
    fn weather_url_can_be_overridden() {
        let config = ClientConfig::from_lookup(lookup_from(&[(
            "HELPSL_WEATHER_URL",
            "http://localhost:8080/v1/",
        )]))
        .unwrap();
        assert_eq!(config.weather_url, "http://localhost:8080/v1");
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let err = ClientConfig::from_lookup(lookup_from(&[("HELPSL_RECONNECT_ATTEMPTS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("HELPSL_RECONNECT_ATTEMPTS"));
    }

    #[test]
    fn device_fix_needs_both_halves() {
        let err = ClientConfig::from_lookup(lookup_from(&[("HELPSL_DEVICE_LAT", "6.9")])).unwrap_err();
        assert!(matches!(err, ConfigError::HalfDeviceFix));

        let config = ClientConfig::from_lookup(lookup_from(&[
            ("HELPSL_DEVICE_LAT", "6.9"),
            ("HELPSL_DEVICE_LON", "79.9"),
        ]))
        .unwrap();
        assert_eq!(config.device_fix, Some(Coordinates { latitude: 6.9, longitude: 79.9 }));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            stale_after: 3,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }
}
