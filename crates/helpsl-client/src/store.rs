//! In-memory reconciliation of one category.
//!
//! The store merges a snapshot with change events that may arrive before,
//! during or after it. Events seen while a snapshot is in flight are queued
//! and replayed on top of it. Updates for ids the store has not seen yet are
//! held back until the matching insert or snapshot row shows up. A snapshot
//! is the authority on which rows exist, so loading one drops held updates
//! that have no row and no queued insert to land on.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use helpsl_types::events::ChangeKind;
use helpsl_types::{Category, ChangeEvent, HelpRecord};

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    /// An existing entry was overwritten.
    Replaced,
    /// Update for an unknown id, held until its record appears.
    Buffered,
    /// A snapshot is loading; the event will be replayed after it.
    Queued,
    /// Wrong category.
    Ignored,
}

#[derive(Debug)]
enum Phase {
    Live,
    Loading(Vec<ChangeEvent>),
}

#[derive(Debug)]
pub struct ReconciliationStore {
    category: Category,
    records: HashMap<i64, HelpRecord>,
    /// Ids in display order, rebuilt after every change.
    order: Vec<i64>,
    early_updates: HashMap<i64, HelpRecord>,
    phase: Phase,
}

impl ReconciliationStore {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            records: HashMap::new(),
            order: Vec::new(),
            early_updates: HashMap::new(),
            phase: Phase::Live,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&HelpRecord> {
        self.records.get(&id)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading(_))
    }

    pub fn pending_update_count(&self) -> usize {
        self.early_updates.len()
    }

    /// Start queueing events until the snapshot lands. Calling this twice
    /// keeps the events already queued.
    pub fn begin_snapshot(&mut self) {
        if let Phase::Live = self.phase {
            self.phase = Phase::Loading(Vec::new());
        }
    }

    /// Replace the contents with `records`, then replay queued events in
    /// arrival order. Returns the number of events replayed.
    pub fn load_snapshot(&mut self, records: Vec<HelpRecord>) -> usize {
        let total = records.len();
        self.records = records
            .into_iter()
            .filter(|record| self.accepts(record))
            .map(|record| (record.id, record))
            .collect();

        let held: Vec<i64> = self
            .early_updates
            .keys()
            .copied()
            .filter(|id| self.records.contains_key(id))
            .collect();
        for id in held {
            if let (Some(update), Some(current)) =
                (self.early_updates.remove(&id), self.records.get_mut(&id))
            {
                *current = merge(current, update);
            }
        }

        let queued_inserts: HashSet<i64> = match &self.phase {
            Phase::Loading(queue) => queue
                .iter()
                .filter(|event| event.kind == ChangeKind::Insert)
                .map(|event| event.record.id)
                .collect(),
            Phase::Live => HashSet::new(),
        };
        let held_before = self.early_updates.len();
        self.early_updates.retain(|id, _| queued_inserts.contains(id));
        let dropped = held_before - self.early_updates.len();
        if dropped > 0 {
            debug!("{} snapshot dropped {} orphaned updates", self.category.table(), dropped);
        }

        self.resort();
        info!("{} snapshot loaded: {} of {} rows", self.category.table(), self.records.len(), total);
        self.replay_queue()
    }

    /// The snapshot failed: keep current contents and replay what was queued.
    pub fn abandon_snapshot(&mut self) -> usize {
        self.replay_queue()
    }

    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        if !self.accepts(&event.record) {
            return Applied::Ignored;
        }
        if let Phase::Loading(queue) = &mut self.phase {
            debug!("queueing {} until the snapshot lands", event.key());
            queue.push(event);
            return Applied::Queued;
        }
        match event.kind {
            ChangeKind::Insert => self.apply_insert(event.record),
            ChangeKind::Update => self.apply_update(event.record),
        }
    }

    /// Add a record, or overwrite it if this is a repeated delivery.
    pub fn apply_insert(&mut self, record: HelpRecord) -> Applied {
        if !self.accepts(&record) {
            return Applied::Ignored;
        }
        // An update that overtook its insert carries the newer state.
        let record = match self.early_updates.remove(&record.id) {
            Some(update) => merge(&record, update),
            None => record,
        };
        self.upsert(record)
    }

    pub fn apply_update(&mut self, record: HelpRecord) -> Applied {
        if !self.accepts(&record) {
            return Applied::Ignored;
        }
        if self.records.contains_key(&record.id) {
            return self.upsert(record);
        }

        debug!("holding update for unseen {}", record.key());
        let held = match self.early_updates.remove(&record.id) {
            Some(earlier) => merge(&earlier, record),
            None => record,
        };
        self.early_updates.insert(held.id, held);
        Applied::Buffered
    }

    /// Records in display order: pending before completed, newest first.
    pub fn list(&self) -> Vec<&HelpRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    fn upsert(&mut self, record: HelpRecord) -> Applied {
        let applied = match self.records.get_mut(&record.id) {
            Some(current) => {
                *current = merge(current, record);
                Applied::Replaced
            }
            None => {
                self.records.insert(record.id, record);
                Applied::Inserted
            }
        };
        self.resort();
        applied
    }

    fn replay_queue(&mut self) -> usize {
        let queued = match std::mem::replace(&mut self.phase, Phase::Live) {
            Phase::Loading(queue) => queue,
            Phase::Live => return 0,
        };
        let replayed = queued.len();
        for event in queued {
            self.apply(event);
        }
        if replayed > 0 {
            debug!("replayed {} queued {} events", replayed, self.category.table());
        }
        replayed
    }

    fn resort(&mut self) {
        let records = &self.records;
        let mut order: Vec<i64> = records.keys().copied().collect();
        order.sort_by(|a, b| display_order(&records[a], &records[b]));
        self.order = order;
    }

    fn accepts(&self, record: &HelpRecord) -> bool {
        if record.category() == self.category {
            return true;
        }
        warn!("{} does not belong in the {} store", record.key(), self.category.table());
        false
    }
}

/// Pending before completed, then newest first. Ids break ties so the order
/// is total.
pub fn display_order(a: &HelpRecord, b: &HelpRecord) -> Ordering {
    a.is_completed()
        .cmp(&b.is_completed())
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Fields of `incoming` win, except that status never moves backwards and the
/// creation time never changes.
fn merge(current: &HelpRecord, incoming: HelpRecord) -> HelpRecord {
    HelpRecord {
        status: current.status.merge(incoming.status),
        created_at: current.created_at,
        ..incoming
    }
}
