pub mod api;
pub mod events;
pub mod models;

pub use api::RecordPayload;
pub use events::{ChangeEvent, ChangeKind};
pub use models::{
    Category, Coordinates, HelpKind, HelpRecord, OfferKind, RecordError, RecordKey, RequestKind,
    Status,
};
