use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use helpsl_types::{Category, HelpRecord};

use crate::backend::Backend;
use crate::error::PersistenceError;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Completed(HelpRecord),
    /// A call for the same id is still running; nothing was sent.
    AlreadyInFlight,
    /// Offers have no status and completed requests stay completed.
    Unchanged,
}

/// Marks requests completed, at most one backend call per id at a time.
pub struct StatusUpdater {
    backend: Arc<dyn Backend>,
    in_flight: Mutex<HashSet<i64>>,
}

impl StatusUpdater {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn mark_completed(&self, record: &HelpRecord) -> Result<StatusUpdate, PersistenceError> {
        if record.category() != Category::Request || record.is_completed() {
            return Ok(StatusUpdate::Unchanged);
        }

        let Some(_guard) = InFlight::acquire(&self.in_flight, record.id) else {
            debug!("{} is already being completed", record.key());
            return Ok(StatusUpdate::AlreadyInFlight);
        };

        match self.backend.complete_request(record.id).await {
            Ok(updated) => {
                info!("{} marked completed", updated.key());
                Ok(StatusUpdate::Completed(updated))
            }
            Err(e) => {
                warn!("completing {} failed: {}", record.key(), e);
                Err(e)
            }
        }
    }

    pub fn is_in_flight(&self, id: i64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

/// Releases the id when dropped, including when the call is cancelled.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<i64>>, id: i64) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        inserted.then_some(Self { set, id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;
    use async_trait::async_trait;
    use helpsl_types::api::NewRecordRequest;
    use helpsl_types::Status;
    use tokio::sync::Notify;

    /// Completes requests once `release` is notified; counts calls.
    struct SlowBackend {
        release: Notify,
        calls: Mutex<u32>,
        fail: bool,
    }

    impl SlowBackend {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                release: Notify::new(),
                calls: Mutex::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Backend for SlowBackend {
        async fn query(&self, _category: Category) -> Result<Vec<HelpRecord>, PersistenceError> {
            Ok(vec![])
        }

        async fn insert(
            &self,
            _category: Category,
            _record: &NewRecordRequest,
        ) -> Result<HelpRecord, PersistenceError> {
            Err(PersistenceError::Decode("not used".into()))
        }

        async fn complete_request(&self, id: i64) -> Result<HelpRecord, PersistenceError> {
            *self.calls.lock().unwrap() += 1;
            self.release.notified().await;
            if self.fail {
                return Err(PersistenceError::Rejected {
                    status: 500,
                    body: "db locked".into(),
                });
            }
            Ok(record(Category::Request, id, 0, Status::Completed))
        }
    }

    #[tokio::test]
    async fn second_click_while_in_flight_is_a_no_op() {
        let backend = SlowBackend::new(false);
        let updater = StatusUpdater::new(backend.clone());
        let target = record(Category::Request, 1, 0, Status::Pending);

        let first = updater.mark_completed(&target);
        let second = async {
            tokio::task::yield_now().await;
            assert!(updater.is_in_flight(1));
            let outcome = updater.mark_completed(&target).await;
            backend.release.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first.unwrap(), StatusUpdate::Completed(r) if r.is_completed()));
        assert_eq!(second.unwrap(), StatusUpdate::AlreadyInFlight);
        assert_eq!(*backend.calls.lock().unwrap(), 1);
        assert!(!updater.is_in_flight(1));
    }

    #[tokio::test]
    async fn failure_releases_the_id() {
        let backend = SlowBackend::new(true);
        let updater = StatusUpdater::new(backend.clone());
        let target = record(Category::Request, 2, 0, Status::Pending);

        backend.release.notify_one();
        assert!(updater.mark_completed(&target).await.is_err());
        assert!(!updater.is_in_flight(2));
    }

    #[tokio::test]
    async fn cancelled_call_releases_the_id() {
        let backend = SlowBackend::new(false);
        let updater = StatusUpdater::new(backend.clone());
        let target = record(Category::Request, 3, 0, Status::Pending);

        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            updater.mark_completed(&target),
        )
        .await;
        assert!(attempt.is_err());
        assert!(!updater.is_in_flight(3));
    }

    #[tokio::test]
    async fn offers_and_completed_requests_are_left_alone() {
        let backend = SlowBackend::new(false);
        let updater = StatusUpdater::new(backend.clone());

        let offer = record(Category::Offer, 1, 0, Status::Pending);
        let done = record(Category::Request, 1, 0, Status::Completed);
        assert_eq!(updater.mark_completed(&offer).await.unwrap(), StatusUpdate::Unchanged);
        assert_eq!(updater.mark_completed(&done).await.unwrap(), StatusUpdate::Unchanged);
        assert_eq!(*backend.calls.lock().unwrap(), 0);
    }
}
