//! Live subscriptions with silent reconnect.
//!
//! Each [`Subscription`] owns a background task that keeps a feed connection
//! open for one category. When a connection drops the task backs off and
//! reconnects. Every confirmed connection, the first one included, is
//! announced with [`StreamSignal::Connected`]: a snapshot taken after that
//! signal cannot miss a change, and events missed in a gap can only be
//! recovered by such a snapshot.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use helpsl_types::{Category, ChangeEvent};

use crate::config::ReconnectPolicy;
use crate::error::SubscriptionError;
use crate::feed::ChangeFeed;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Change(ChangeEvent),
    /// The server confirmed the subscription. Changes committed before this
    /// point may be missing from the stream.
    Connected,
    /// Reconnecting keeps failing. Retries continue in the background.
    Stale,
}

/// Identity of one open view. A view holds at most one subscription per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(Uuid);

impl ViewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type ActiveSet = Arc<Mutex<HashSet<(Category, ViewId)>>>;

pub struct ChangeStreamSubscriber {
    feed: Arc<dyn ChangeFeed>,
    policy: ReconnectPolicy,
    active: ActiveSet,
}

impl ChangeStreamSubscriber {
    pub fn new(feed: Arc<dyn ChangeFeed>, policy: ReconnectPolicy) -> Self {
        Self {
            feed,
            policy,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start streaming `category` for `view`.
    ///
    /// Fails with `AlreadyActive` if the view still holds a subscription for
    /// the category; the old handle has to be dropped first.
    pub fn subscribe(
        &self,
        category: Category,
        view: ViewId,
    ) -> Result<Subscription, SubscriptionError> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((category, view));
        if !inserted {
            return Err(SubscriptionError::AlreadyActive { category, view });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_subscription(
            self.feed.clone(),
            self.policy.clone(),
            category,
            tx,
            cancel.clone(),
        ));

        info!("view {} subscribed to {}", view, category.table());
        Ok(Subscription {
            category,
            view,
            rx,
            cancel,
            task,
            active: self.active.clone(),
        })
    }

    /// Same as dropping the handle.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle to a live subscription. Dropping it stops the stream.
pub struct Subscription {
    category: Category,
    view: ViewId,
    rx: mpsc::UnboundedReceiver<StreamSignal>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    active: ActiveSet,
}

impl Subscription {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    /// Next signal, in the order the backend applied the changes.
    pub async fn next(&mut self) -> Option<StreamSignal> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StreamSignal> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(self.category, self.view));
        info!("view {} unsubscribed from {}", self.view, self.category.table());
    }
}

async fn run_subscription(
    feed: Arc<dyn ChangeFeed>,
    policy: ReconnectPolicy,
    category: Category,
    tx: mpsc::UnboundedSender<StreamSignal>,
    cancel: CancellationToken,
) {
    let table = category.table();
    let mut failures: u32 = 0;

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = feed.open(category) => opened,
        };

        match opened {
            Ok(mut stream) => {
                info!("{} stream connected after {} failed attempts", table, failures);
                if tx.send(StreamSignal::Connected).is_err() {
                    return;
                }
                failures = 0;

                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            debug!("{} {:?}", event.key(), event.kind);
                            if tx.send(StreamSignal::Change(event)).is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("{} stream broke: {}", table, e);
                            break;
                        }
                        None => {
                            info!("{} stream ended", table);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!("{} stream connect attempt {} failed: {}", table, failures, e);
                if failures == policy.stale_after {
                    warn!("{} view is now stale", table);
                    if tx.send(StreamSignal::Stale).is_err() {
                        return;
                    }
                }
            }
        }

        let delay = policy.delay_for(failures);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream;
    use helpsl_types::Status;

    use super::*;
    use crate::feed::ChangeStream;
    use crate::test_support::record;

    /// Each `open` pops the next scripted connection: `Some(events)` connects
    /// and ends after the events, `None` refuses. An empty script refuses.
    struct ScriptedFeed {
        script: Mutex<VecDeque<Option<Vec<ChangeEvent>>>>,
        opens: Mutex<u32>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Option<Vec<ChangeEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opens: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl ChangeFeed for ScriptedFeed {
        async fn open(&self, _category: Category) -> Result<ChangeStream, SubscriptionError> {
            *self.opens.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
                None => Err(SubscriptionError::Connect("refused".into())),
            }
        }
    }

    /// Connects once and then stays open forever.
    struct QuietFeed;

    #[async_trait]
    impl ChangeFeed for QuietFeed {
        async fn open(&self, _category: Category) -> Result<ChangeStream, SubscriptionError> {
            Ok(stream::pending().boxed())
        }
    }

    fn policy(stale_after: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            stale_after,
        }
    }

    fn insert(id: i64) -> ChangeEvent {
        ChangeEvent::insert(record(Category::Request, id, id, Status::Pending))
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscription_for_same_view_is_rejected() {
        let subscriber = ChangeStreamSubscriber::new(Arc::new(QuietFeed), policy(3));
        let view = ViewId::new();

        let requests = subscriber.subscribe(Category::Request, view).unwrap();
        let _offers = subscriber.subscribe(Category::Offer, view).unwrap();
        assert_eq!(subscriber.active_count(), 2);

        let err = subscriber.subscribe(Category::Request, view).err().unwrap();
        assert!(matches!(err, SubscriptionError::AlreadyActive { .. }));

        subscriber.unsubscribe(requests);
        assert_eq!(subscriber.active_count(), 1);
        assert!(subscriber.subscribe(Category::Request, view).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn every_connection_is_announced_then_stale() {
        let feed = ScriptedFeed::new(vec![Some(vec![insert(1)]), Some(vec![insert(2)])]);
        let subscriber = ChangeStreamSubscriber::new(feed.clone(), policy(2));
        let mut sub = subscriber.subscribe(Category::Request, ViewId::new()).unwrap();

        assert_eq!(sub.next().await, Some(StreamSignal::Connected));
        assert_eq!(sub.next().await, Some(StreamSignal::Change(insert(1))));
        assert_eq!(sub.next().await, Some(StreamSignal::Connected));
        assert_eq!(sub.next().await, Some(StreamSignal::Change(insert(2))));
        // Script exhausted: every further attempt is refused.
        assert_eq!(sub.next().await, Some(StreamSignal::Stale));
        assert!(*feed.opens.lock().unwrap() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_comes_before_the_first_change() {
        let feed = ScriptedFeed::new(vec![None, Some(vec![insert(5)])]);
        let subscriber = ChangeStreamSubscriber::new(feed, policy(5));
        let mut sub = subscriber.subscribe(Category::Request, ViewId::new()).unwrap();

        assert_eq!(sub.next().await, Some(StreamSignal::Connected));
        assert_eq!(sub.next().await, Some(StreamSignal::Change(insert(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_reconnecting() {
        let feed = ScriptedFeed::new(vec![]);
        let subscriber = ChangeStreamSubscriber::new(feed.clone(), policy(100));
        let sub = subscriber.subscribe(Category::Offer, ViewId::new()).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(sub);
        let opens = *feed.opens.lock().unwrap();
        assert!(opens > 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*feed.opens.lock().unwrap(), opens);
        assert_eq!(subscriber.active_count(), 0);
    }
}
