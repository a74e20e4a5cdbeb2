use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use helpsl_types::api::NewRecordRequest;
use helpsl_types::{Category, Coordinates, HelpKind, HelpRecord};

use crate::backend::Backend;
use crate::error::{GeoError, SubmitError};
use crate::location::{LocationInput, LocationResolver, ProbeMode};

/// The state of a "request help" or "offer help" form.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionForm {
    pub kind: HelpKind,
    pub name: String,
    pub phone: String,
    pub description: String,
    location: String,
    gps_fix: Option<Coordinates>,
}

impl SubmissionForm {
    pub fn new(category: Category) -> Self {
        Self {
            kind: HelpKind::default_for(category),
            name: String::new(),
            phone: String::new(),
            description: String::new(),
            location: String::new(),
            gps_fix: None,
        }
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn gps_fix(&self) -> Option<Coordinates> {
        self.gps_fix
    }

    /// Typing replaces any GPS fix; the text is geocoded instead.
    pub fn type_location(&mut self, text: impl Into<String>) {
        self.location = text.into();
        self.gps_fix = None;
    }

    pub fn record_gps_fix(&mut self, coordinates: Coordinates) {
        self.gps_fix = Some(coordinates);
        self.location = format!("GPS: {}", coordinates);
    }

    pub fn validate(&self) -> Result<(), SubmitError> {
        let required = [
            ("name", &self.name),
            ("phone", &self.phone),
            ("location", &self.location),
            ("description", &self.description),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(SubmitError::MissingField(*field)),
            None => Ok(()),
        }
    }

    pub fn location_input(&self) -> LocationInput {
        LocationInput {
            gps: self.gps_fix,
            typed_text: Some(self.location.clone()),
        }
    }

    pub fn to_request(&self, coordinates: Option<Coordinates>) -> NewRecordRequest {
        NewRecordRequest {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            kind: self.kind.as_str().to_string(),
            location: self.location.trim().to_string(),
            description: self.description.trim().to_string(),
            latitude: coordinates.map(|c| c.latitude),
            longitude: coordinates.map(|c| c.longitude),
        }
    }
}

/// Validate, resolve coordinates, insert. The form is never modified, so a
/// rejected submission can be retried as is.
pub async fn submit(
    backend: &dyn Backend,
    resolver: &LocationResolver,
    form: &SubmissionForm,
) -> Result<HelpRecord, SubmitError> {
    form.validate()?;

    let coordinates = resolver.resolve(&form.location_input()).await;
    let request = form.to_request(coordinates);

    match backend.insert(form.category(), &request).await {
        Ok(record) => {
            info!("submitted {} (coordinates: {})", record.key(), coordinates.is_some());
            Ok(record)
        }
        Err(e) => {
            warn!("submission of {} rejected: {}", form.category(), e);
            Err(e.into())
        }
    }
}

/// "Use my location" button. The fix lands in the form only if `cancel` has
/// not fired by the time it arrives.
pub async fn capture_gps(
    resolver: &LocationResolver,
    form: &mut SubmissionForm,
    cancel: &CancellationToken,
) -> Result<Coordinates, GeoError> {
    let coordinates = resolver
        .resolve_device_location(ProbeMode::Interactive, cancel)
        .await?;
    form.record_gps_fix(coordinates);
    Ok(coordinates)
}
