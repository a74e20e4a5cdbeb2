use chrono::{DateTime, TimeDelta, Utc};

use helpsl_types::{Category, Coordinates, HelpKind, HelpRecord, Status};

/// A record created `minutes` after a fixed base time, placed near Colombo.
pub fn record(category: Category, id: i64, minutes: i64, status: Status) -> HelpRecord {
    let base: DateTime<Utc> = "2025-11-28T06:00:00Z".parse().unwrap();
    HelpRecord {
        id,
        kind: HelpKind::default_for(category),
        name: format!("Person {}", id),
        phone: "0770000000".into(),
        location: "Kolonnawa".into(),
        description: "Water up to the windows".into(),
        coordinates: Some(Coordinates {
            latitude: 6.9 + id as f64 / 100.0,
            longitude: 79.9,
        }),
        created_at: base + TimeDelta::minutes(minutes),
        status,
    }
}
