use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::api::RecordPayload;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("'{kind}' is not a valid {category} type")]
    UnknownKind { category: Category, kind: String },

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("latitude and longitude must be given together")]
    HalfCoordinates,

    #[error("coordinates out of range: ({latitude}, {longitude})")]
    OutOfRange { latitude: f64, longitude: f64 },
}

// -- Category --

/// The collection a record belongs to. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Request,
    Offer,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Request, Category::Offer];

    /// Backend table holding this category.
    pub fn table(self) -> &'static str {
        match self {
            Self::Request => "requests",
            Self::Offer => "offers",
        }
    }

    pub fn from_table(table: &str) -> Result<Self, RecordError> {
        match table {
            "requests" => Ok(Self::Request),
            "offers" => Ok(Self::Offer),
            other => Err(RecordError::UnknownTable(other.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Offer => f.write_str("offer"),
        }
    }
}

// -- Kinds --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Rescue,
    Food,
    Medicine,
    Shelter,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferKind {
    Food,
    Boat,
    Medicine,
    Shelter,
    Other,
}

/// Category-tagged record type. The variant decides the category, so a
/// request can never carry an offer vocabulary word or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "type", rename_all = "lowercase")]
pub enum HelpKind {
    Request(RequestKind),
    Offer(OfferKind),
}

impl HelpKind {
    pub fn category(self) -> Category {
        match self {
            Self::Request(_) => Category::Request,
            Self::Offer(_) => Category::Offer,
        }
    }

    /// Kind preselected on a fresh form for the category.
    pub fn default_for(category: Category) -> Self {
        match category {
            Category::Request => Self::Request(RequestKind::Rescue),
            Category::Offer => Self::Offer(OfferKind::Food),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request(RequestKind::Rescue) => "rescue",
            Self::Request(RequestKind::Food) | Self::Offer(OfferKind::Food) => "food",
            Self::Request(RequestKind::Medicine) | Self::Offer(OfferKind::Medicine) => "medicine",
            Self::Request(RequestKind::Shelter) | Self::Offer(OfferKind::Shelter) => "shelter",
            Self::Request(RequestKind::Other) | Self::Offer(OfferKind::Other) => "other",
            Self::Offer(OfferKind::Boat) => "boat",
        }
    }

    /// Parse a wire `type` string within the vocabulary of `category`.
    pub fn parse(category: Category, kind: &str) -> Result<Self, RecordError> {
        let parsed = match (category, kind) {
            (Category::Request, "rescue") => Self::Request(RequestKind::Rescue),
            (Category::Request, "food") => Self::Request(RequestKind::Food),
            (Category::Request, "medicine") => Self::Request(RequestKind::Medicine),
            (Category::Request, "shelter") => Self::Request(RequestKind::Shelter),
            (Category::Request, "other") => Self::Request(RequestKind::Other),
            (Category::Offer, "food") => Self::Offer(OfferKind::Food),
            (Category::Offer, "boat") => Self::Offer(OfferKind::Boat),
            (Category::Offer, "medicine") => Self::Offer(OfferKind::Medicine),
            (Category::Offer, "shelter") => Self::Offer(OfferKind::Shelter),
            (Category::Offer, "other") => Self::Offer(OfferKind::Other),
            _ => {
                return Err(RecordError::UnknownKind {
                    category,
                    kind: kind.to_string(),
                });
            }
        };
        Ok(parsed)
    }
}

// -- Status --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Status only moves forward: once completed, a record stays completed.
    pub fn merge(self, incoming: Status) -> Status {
        match (self, incoming) {
            (Self::Completed, _) => Self::Completed,
            (Self::Pending, next) => next,
        }
    }
}

impl FromStr for Status {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(RecordError::UnknownStatus(other.to_string())),
        }
    }
}

// -- Coordinates --

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, RecordError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(RecordError::OutOfRange { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    /// Both halves or neither.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Option<Self>, RecordError> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(RecordError::HalfCoordinates),
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

// -- Records --

/// Ids are only unique inside one category, so merged views key on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub category: Category,
    pub id: i64,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.category.table(), self.id)
    }
}

/// A help request or help offer as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpRecord {
    pub id: i64,
    pub kind: HelpKind,
    pub name: String,
    pub phone: String,
    pub location: String,
    pub description: String,
    pub coordinates: Option<Coordinates>,
    pub created_at: DateTime<Utc>,
    pub status: Status,
}

impl HelpRecord {
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            category: self.category(),
            id: self.id,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Build a record from a backend row of `category`'s table.
    ///
    /// An unknown `type` is an error. Broken coordinates are not: the record
    /// is kept and simply has no position.
    pub fn from_payload(category: Category, payload: RecordPayload) -> Result<Self, RecordError> {
        let kind = HelpKind::parse(category, &payload.kind)?;

        let coordinates = Coordinates::from_parts(payload.latitude, payload.longitude)
            .unwrap_or_else(|e| {
                warn!("{}#{} has unusable coordinates: {}", category.table(), payload.id, e);
                None
            });

        Ok(Self {
            id: payload.id,
            kind,
            name: payload.name,
            phone: payload.phone,
            location: payload.location,
            description: payload.description,
            coordinates,
            created_at: payload.created_at,
            status: payload.status,
        })
    }

    pub fn to_payload(&self) -> RecordPayload {
        RecordPayload {
            id: self.id,
            name: self.name.clone(),
            phone: self.phone.clone(),
            kind: self.kind.as_str().to_string(),
            location: self.location.clone(),
            description: self.description.clone(),
            latitude: self.coordinates.map(|c| c.latitude),
            longitude: self.coordinates.map(|c| c.longitude),
            created_at: self.created_at,
            status: self.status,
        }
    }
}
