//! Client side of HelpSL: keeps live, sorted views of the `requests` and
//! `offers` collections in step with the backend, and turns GPS fixes or typed
//! place names into coordinates before a record is submitted.

pub mod actions;
pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod feed;
pub mod geocode;
pub mod location;
pub mod projector;
pub mod store;
pub mod submit;
pub mod subscriber;
pub mod view;
pub mod weather;

#[cfg(test)]
mod test_support;

pub use actions::{StatusUpdate, StatusUpdater};
pub use backend::{Backend, HttpBackend};
pub use config::ClientConfig;
pub use context::ServiceContext;
pub use feed::{ChangeFeed, WsChangeFeed};
pub use location::{LocationInput, LocationResolver, ProbeMode};
pub use projector::{MapFilter, MarkerView, Tab};
pub use store::{Applied, ReconciliationStore};
pub use submit::SubmissionForm;
pub use subscriber::{ChangeStreamSubscriber, StreamSignal, Subscription, ViewId};
pub use view::{ListView, LiveCollection, MapView, ViewUpdate};
pub use weather::{Conditions, CurrentWeather, OpenMeteo, WeatherSource};
