use async_trait::async_trait;

use helpsl_types::Coordinates;

use crate::error::GeoError;
use crate::location::{Geolocation, Position, PositionOptions};

/// Position source for hosts without a GPS receiver: either a fixed,
/// configured position or nothing at all.
#[derive(Debug, Clone, Default)]
pub struct StaticGeolocation {
    fix: Option<Coordinates>,
}

impl StaticGeolocation {
    pub fn new(fix: Option<Coordinates>) -> Self {
        Self { fix }
    }
}

#[async_trait]
impl Geolocation for StaticGeolocation {
    async fn current_position(&self, _options: PositionOptions) -> Result<Position, GeoError> {
        self.fix
            .map(|coordinates| Position {
                coordinates,
                accuracy_m: None,
            })
            .ok_or(GeoError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ProbeMode;

    #[tokio::test]
    async fn without_a_fix_position_is_unavailable() {
        let geo = StaticGeolocation::default();
        assert_eq!(
            geo.current_position(ProbeMode::Silent.options()).await,
            Err(GeoError::Unavailable)
        );

        let fix = Coordinates { latitude: 6.05, longitude: 80.22 };
        let geo = StaticGeolocation::new(Some(fix));
        assert_eq!(
            geo.current_position(ProbeMode::Interactive.options()).await.unwrap().coordinates,
            fix
        );
    }
}
