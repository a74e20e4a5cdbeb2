use std::collections::BTreeMap;

use tracing::warn;

use helpsl_types::{Category, Coordinates, HelpKind, HelpRecord, RecordKey, Status};

use crate::store::ReconciliationStore;

/// Whole island in view.
pub const DEFAULT_MAP_CENTER: Coordinates = Coordinates {
    latitude: 7.8731,
    longitude: 80.7718,
};
pub const DEFAULT_MAP_ZOOM: u8 = 8;
/// Street level, after "locate me".
pub const LOCATE_ZOOM: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFilter {
    pub show_offers: bool,
}

impl Default for MapFilter {
    fn default() -> Self {
        Self { show_offers: true }
    }
}

impl MapFilter {
    fn admits(&self, category: Category) -> bool {
        match category {
            Category::Request => true,
            Category::Offer => self.show_offers,
        }
    }
}

/// A record that can be drawn on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerView {
    pub key: RecordKey,
    pub kind: HelpKind,
    pub position: Coordinates,
    pub name: String,
    pub phone: String,
    pub location: String,
    pub description: String,
    pub status: Status,
}

impl MarkerView {
    fn from_record(record: &HelpRecord) -> Option<Self> {
        Some(Self {
            key: record.key(),
            kind: record.kind,
            position: record.coordinates?,
            name: record.name.clone(),
            phone: record.phone.clone(),
            location: record.location.clone(),
            description: record.description.clone(),
            status: record.status,
        })
    }

    pub fn category(&self) -> Category {
        self.key.category
    }

    /// Google Maps search link for turn-by-turn directions to the marker.
    pub fn directions_url(&self) -> String {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            self.position.latitude, self.position.longitude
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tab {
    #[default]
    Requests,
    Offers,
}

impl Tab {
    pub fn category(self) -> Category {
        match self {
            Self::Requests => Category::Request,
            Self::Offers => Category::Offer,
        }
    }
}

/// Markers for every positioned record across `stores`, keyed by
/// `(category, id)` so equal ids from different tables stay apart.
pub fn map_markers(stores: &[&ReconciliationStore], filter: MapFilter) -> Vec<MarkerView> {
    let mut markers = BTreeMap::new();
    for store in stores {
        if !filter.admits(store.category()) {
            continue;
        }
        for record in store.list() {
            if let Some(marker) = MarkerView::from_record(record) {
                markers.insert(marker.key, marker);
            }
        }
    }
    markers.into_values().collect()
}

pub fn list_items(store: &ReconciliationStore, tab: Tab) -> Vec<&HelpRecord> {
    if store.category() != tab.category() {
        warn!("{:?} tab was given the {} store", tab, store.category().table());
        return Vec::new();
    }
    store.list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    fn stores() -> (ReconciliationStore, ReconciliationStore) {
        let mut requests = ReconciliationStore::new(Category::Request);
        let mut unplaced = record(Category::Request, 2, 1, Status::Pending);
        unplaced.coordinates = None;
        requests.load_snapshot(vec![record(Category::Request, 1, 0, Status::Pending), unplaced]);

        let mut offers = ReconciliationStore::new(Category::Offer);
        offers.load_snapshot(vec![record(Category::Offer, 1, 0, Status::Pending)]);
        (requests, offers)
    }

    #[test]
    fn markers_key_on_category_and_id() {
        let (requests, offers) = stores();
        let markers = map_markers(&[&requests, &offers], MapFilter::default());

        let keys: Vec<RecordKey> = markers.iter().map(|m| m.key).collect();
        assert_eq!(
            keys,
            vec![
                RecordKey { category: Category::Request, id: 1 },
                RecordKey { category: Category::Offer, id: 1 },
            ]
        );
    }

    #[test]
    fn hiding_offers_leaves_requests() {
        let (requests, offers) = stores();
        let markers = map_markers(&[&requests, &offers], MapFilter { show_offers: false });
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].category(), Category::Request);
    }

    #[test]
    fn directions_link_points_at_marker() {
        let mut colombo = record(Category::Request, 1, 0, Status::Pending);
        colombo.coordinates = Some(Coordinates { latitude: 6.9271, longitude: 79.8612 });
        let mut requests = ReconciliationStore::new(Category::Request);
        requests.apply_insert(colombo);

        let markers = map_markers(&[&requests], MapFilter::default());
        assert_eq!(
            markers[0].directions_url(),
            "https://www.google.com/maps/search/?api=1&query=6.9271,79.8612"
        );
    }

    #[test]
    fn list_items_follow_the_tab() {
        let (requests, offers) = stores();
        let ids: Vec<i64> = list_items(&requests, Tab::Requests).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(list_items(&offers, Tab::Requests).is_empty());
        assert_eq!(list_items(&offers, Tab::Offers).len(), 1);
    }
}
