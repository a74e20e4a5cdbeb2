//! Live views: a store kept in step with its change stream.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use helpsl_types::{Category, Coordinates, HelpRecord};

use crate::context::ServiceContext;
use crate::error::{GeoError, SubscriptionError};
use crate::location::ProbeMode;
use crate::projector::{self, MapFilter, MarkerView, Tab};
use crate::store::{Applied, ReconciliationStore};
use crate::subscriber::{StreamSignal, Subscription, ViewId};

/// How long the first snapshot waits for the server to confirm the
/// subscription before loading anyway.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewUpdate {
    Applied(Applied),
    /// A fresh snapshot was taken, after a reconnect or to finish one that
    /// was interrupted.
    Resynced,
    /// The stream cannot be re-established; data shown may be out of date.
    Stale,
}

/// One category: a store plus the subscription feeding it.
pub struct LiveCollection {
    ctx: Arc<ServiceContext>,
    view: ViewId,
    store: ReconciliationStore,
    subscription: Option<Subscription>,
    stale: bool,
}

impl LiveCollection {
    pub fn new(ctx: Arc<ServiceContext>, category: Category, view: ViewId) -> Self {
        Self {
            ctx,
            view,
            store: ReconciliationStore::new(category),
            subscription: None,
            stale: false,
        }
    }

    pub fn category(&self) -> Category {
        self.store.category()
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Drop any previous subscription, subscribe, and load a snapshot once
    /// the server has confirmed the subscription. Events that arrive while
    /// the snapshot is in flight are replayed on top.
    pub async fn activate(&mut self) -> Result<(), SubscriptionError> {
        self.deactivate();
        self.subscription = Some(self.ctx.subscriber.subscribe(self.category(), self.view)?);
        info!("view {} activated {}", self.view, self.category().table());
        self.store.begin_snapshot();
        self.await_connection().await;
        self.resnapshot().await;
        Ok(())
    }

    pub fn deactivate(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.ctx.subscriber.unsubscribe(subscription);
        }
        // An activation cancelled mid-snapshot leaves events queued.
        if self.store.is_loading() {
            self.store.abandon_snapshot();
        }
    }

    /// Wait for the next stream signal and fold it in. `None` when inactive.
    pub async fn pump(&mut self) -> Option<ViewUpdate> {
        if let Some(update) = self.finish_interrupted_snapshot().await {
            return Some(update);
        }
        let signal = self.next_signal().await?;
        Some(self.handle(signal).await)
    }

    async fn next_signal(&mut self) -> Option<StreamSignal> {
        self.subscription.as_mut()?.next().await
    }

    /// A snapshot whose future was dropped leaves the store queueing every
    /// event. No snapshot can be running while `&mut self` is held here, so
    /// take it again; the queue is replayed on top.
    async fn finish_interrupted_snapshot(&mut self) -> Option<ViewUpdate> {
        if !self.store.is_loading() || self.subscription.is_none() {
            return None;
        }
        info!("{} snapshot was interrupted, loading it again", self.category().table());
        self.resnapshot().await;
        Some(ViewUpdate::Resynced)
    }

    async fn handle(&mut self, signal: StreamSignal) -> ViewUpdate {
        match signal {
            StreamSignal::Change(event) => {
                let key = event.key();
                let applied = self.store.apply(event);
                debug!("{} {:?}", key, applied);
                ViewUpdate::Applied(applied)
            }
            StreamSignal::Connected => {
                self.resnapshot().await;
                ViewUpdate::Resynced
            }
            StreamSignal::Stale => {
                warn!("{} view is stale", self.category().table());
                self.stale = true;
                ViewUpdate::Stale
            }
        }
    }

    /// Hold the first snapshot until the subscription is confirmed, so no
    /// change can fall between the snapshot and the stream. After
    /// `CONNECT_GRACE` the snapshot goes ahead and the late `Connected`
    /// triggers another one.
    async fn await_connection(&mut self) {
        let table = self.category().table();
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };

        let grace = tokio::time::sleep(CONNECT_GRACE);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    warn!("{} stream not confirmed after {:?}, loading anyway", table, CONNECT_GRACE);
                    return;
                }
                signal = subscription.next() => match signal {
                    Some(StreamSignal::Connected) | None => return,
                    Some(StreamSignal::Change(event)) => {
                        self.store.apply(event);
                    }
                    Some(StreamSignal::Stale) => self.stale = true,
                },
            }
        }
    }

    async fn resnapshot(&mut self) {
        let ctx = self.ctx.clone();
        let category = self.category();
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };

        loop {
            self.store.begin_snapshot();
            let mut query = ctx.backend.query(category);
            let mut stream_open = true;
            let mut reconnected = false;

            let result = loop {
                tokio::select! {
                    result = &mut query => break result,
                    signal = subscription.next(), if stream_open => match signal {
                        Some(StreamSignal::Change(event)) => {
                            self.store.apply(event);
                        }
                        // The query may have read the table before this
                        // connection was confirmed.
                        Some(StreamSignal::Connected) => reconnected = true,
                        Some(StreamSignal::Stale) => self.stale = true,
                        None => stream_open = false,
                    },
                }
            };

            match result {
                Ok(records) => {
                    let replayed = self.store.load_snapshot(records);
                    self.stale = false;
                    debug!("{} events replayed over the {} snapshot", replayed, category.table());
                }
                Err(e) => {
                    self.store.abandon_snapshot();
                    self.stale = true;
                    warn!("{} snapshot failed, keeping previous contents: {}", category.table(), e);
                    return;
                }
            }

            if !reconnected {
                return;
            }
            debug!("{} stream reconnected during the snapshot, loading again", category.table());
        }
    }
}

/// The tabbed list: one category at a time.
pub struct ListView {
    tab: Tab,
    collection: LiveCollection,
}

impl ListView {
    pub fn new(ctx: Arc<ServiceContext>, tab: Tab) -> Self {
        Self {
            tab,
            collection: LiveCollection::new(ctx, tab.category(), ViewId::new()),
        }
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub async fn open(&mut self) -> Result<(), SubscriptionError> {
        self.collection.activate().await
    }

    /// Tear down the current tab's subscription, then load the new tab.
    pub async fn switch_tab(&mut self, tab: Tab) -> Result<(), SubscriptionError> {
        if tab == self.tab && self.collection.is_active() {
            return Ok(());
        }
        self.collection.deactivate();

        let ctx = self.collection.ctx.clone();
        let view = self.collection.view;
        self.collection = LiveCollection::new(ctx, tab.category(), view);
        self.tab = tab;
        self.collection.activate().await
    }

    pub async fn pump(&mut self) -> Option<ViewUpdate> {
        self.collection.pump().await
    }

    pub fn items(&self) -> Vec<&HelpRecord> {
        projector::list_items(self.collection.store(), self.tab)
    }

    pub fn is_stale(&self) -> bool {
        self.collection.is_stale()
    }

    pub fn close(&mut self) {
        self.collection.deactivate();
    }
}

/// The map: requests and offers side by side.
pub struct MapView {
    ctx: Arc<ServiceContext>,
    requests: LiveCollection,
    offers: LiveCollection,
    filter: MapFilter,
    user_position: Option<Coordinates>,
}

impl MapView {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let view = ViewId::new();
        Self {
            requests: LiveCollection::new(ctx.clone(), Category::Request, view),
            offers: LiveCollection::new(ctx.clone(), Category::Offer, view),
            ctx,
            filter: MapFilter::default(),
            user_position: None,
        }
    }

    pub async fn open(&mut self) -> Result<(), SubscriptionError> {
        tokio::try_join!(self.requests.activate(), self.offers.activate())?;
        Ok(())
    }

    /// Next update from either collection.
    pub async fn pump(&mut self) -> Option<(Category, ViewUpdate)> {
        if let Some(update) = self.requests.finish_interrupted_snapshot().await {
            return Some((Category::Request, update));
        }
        if let Some(update) = self.offers.finish_interrupted_snapshot().await {
            return Some((Category::Offer, update));
        }

        let (category, signal) = tokio::select! {
            Some(signal) = self.requests.next_signal() => (Category::Request, signal),
            Some(signal) = self.offers.next_signal() => (Category::Offer, signal),
            else => return None,
        };
        let update = match category {
            Category::Request => self.requests.handle(signal).await,
            Category::Offer => self.offers.handle(signal).await,
        };
        Some((category, update))
    }

    pub fn filter(&self) -> MapFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: MapFilter) {
        self.filter = filter;
    }

    /// Ask for the device position and centre the map on it. A failure
    /// leaves any earlier position in place.
    pub async fn locate_me(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Coordinates, GeoError> {
        let position = self
            .ctx
            .resolver
            .resolve_device_location(ProbeMode::Interactive, cancel)
            .await?;
        self.user_position = Some(position);
        Ok(position)
    }

    pub fn user_position(&self) -> Option<Coordinates> {
        self.user_position
    }

    /// Centre and zoom: the user's position once located, else the whole island.
    pub fn viewport(&self) -> (Coordinates, u8) {
        match self.user_position {
            Some(position) => (position, projector::LOCATE_ZOOM),
            None => (projector::DEFAULT_MAP_CENTER, projector::DEFAULT_MAP_ZOOM),
        }
    }

    pub fn markers(&self) -> Vec<MarkerView> {
        projector::map_markers(&[self.requests.store(), self.offers.store()], self.filter)
    }

    pub fn is_stale(&self) -> bool {
        self.requests.is_stale() || self.offers.is_stale()
    }

    pub fn close(&mut self) {
        self.requests.deactivate();
        self.offers.deactivate();
    }
}
