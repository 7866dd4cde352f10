#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live synchronization with the hazard record store.
//!
//! A [`LiveSync`] keeps an in-memory, arrival-ordered [`LiveCollection`] of
//! one record kind consistent with the store: it opens the live-insert
//! subscription, fetches the snapshot, then prepends every insert the
//! subscription delivers. The subscription is opened first so that no
//! insert can fall in the gap; the duplicate this can cause is absorbed by
//! the collection's id key.
//!
//! The subscription runs in a background task owned by the handle.
//! Dropping the handle (or calling [`LiveSync::close`]) aborts the task and
//! with it the subscription. A dropped channel is reconnected with capped
//! exponential backoff; while reconnecting the status is
//! [`SyncStatus::Paused`]. If the very first subscribe fails the snapshot
//! is still loaded, so the map shows the existing rows without live updates.

pub mod collection;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use protest_map_hazard_models::Record;
use protest_map_store::{RecordStore, SelectFilter};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

pub use collection::LiveCollection;

/// Capacity of the insert notification channel.
const INSERT_BUFFER: usize = 256;

/// Connection state of a [`LiveSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    /// Opening the subscription for the first time.
    Connecting,
    /// Subscribed; inserts are flowing.
    Live,
    /// The subscription dropped; live updates are paused until the
    /// reconnect succeeds.
    #[serde(rename_all = "camelCase")]
    Paused {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt, in milliseconds.
        retry_in_ms: u64,
    },
    /// The handle was closed.
    Closed,
}

/// Bounded exponential backoff for reconnecting a dropped subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Fetches every displayed record of kind `R`, newest first.
///
/// A fetch error is logged and yields an empty list; it never blocks the
/// rest of the map.
pub async fn load_snapshot<R: Record>(store: &dyn RecordStore) -> Vec<R> {
    match store
        .select_all(R::TABLE, SelectFilter::for_table(R::TABLE))
        .await
    {
        Ok(rows) => rows
            .into_iter()
            .filter_map(R::from_stored)
            .filter(R::is_displayed)
            .collect(),
        Err(e) => {
            log::error!("Failed to load {} snapshot: {e}", R::TABLE);
            Vec::new()
        }
    }
}

/// Keeps one record kind in sync with the store.
pub struct LiveSync<R: Record> {
    records: Arc<RwLock<LiveCollection<R>>>,
    status: Arc<watch::Sender<SyncStatus>>,
    inserts: broadcast::Sender<R>,
    task: tokio::task::JoinHandle<()>,
}

impl<R: Record> LiveSync<R> {
    /// Starts syncing `R::TABLE` from `store`.
    ///
    /// Must be called from within a `tokio` runtime.
    #[must_use]
    pub fn start(store: Arc<dyn RecordStore>, policy: ReconnectPolicy) -> Self {
        let records = Arc::new(RwLock::new(LiveCollection::new()));
        let status = Arc::new(watch::Sender::new(SyncStatus::Connecting));
        let (inserts, _) = broadcast::channel(INSERT_BUFFER);

        let task = tokio::spawn(run(
            store,
            policy,
            records.clone(),
            status.clone(),
            inserts.clone(),
        ));

        Self {
            records,
            status,
            inserts,
            task,
        }
    }

    /// The records currently held, in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// A receiver that observes connection state changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// A receiver of every record newly merged into the collection.
    #[must_use]
    pub fn subscribe_inserts(&self) -> broadcast::Receiver<R> {
        self.inserts.subscribe()
    }

    /// Closes the subscription and stops syncing.
    pub fn close(self) {
        drop(self);
    }
}

impl<R: Record> Drop for LiveSync<R> {
    fn drop(&mut self) {
        log::debug!("Stopping {} live sync", R::TABLE);
        self.task.abort();
        self.status.send_replace(SyncStatus::Closed);
    }
}

/// Publishes `next` unless the handle has already been closed.
fn publish(status: &watch::Sender<SyncStatus>, next: SyncStatus) {
    status.send_if_modified(|current| {
        if *current == SyncStatus::Closed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Merges a fresh snapshot into `records`. The first load goes behind
/// anything already present; later loads backfill rows missed while
/// disconnected and announce them as inserts.
async fn merge_snapshot<R: Record>(
    store: &dyn RecordStore,
    records: &RwLock<LiveCollection<R>>,
    inserts: &broadcast::Sender<R>,
    backfill: bool,
) {
    let rows = load_snapshot::<R>(store).await;
    let mut guard = records.write().unwrap_or_else(PoisonError::into_inner);
    if backfill {
        for record in guard.backfill_front(rows) {
            let _ = inserts.send(record);
        }
    } else {
        let loaded = guard.extend_back(rows);
        log::info!("Loaded {loaded} {} rows", R::TABLE);
    }
}

async fn run<R: Record>(
    store: Arc<dyn RecordStore>,
    policy: ReconnectPolicy,
    records: Arc<RwLock<LiveCollection<R>>>,
    status: Arc<watch::Sender<SyncStatus>>,
    inserts: broadcast::Sender<R>,
) {
    let table = R::TABLE;
    let mut attempt = 0u32;
    let mut synced_once = false;

    loop {
        match store.subscribe_insert(table).await {
            Ok(mut subscription) => {
                merge_snapshot(store.as_ref(), &records, &inserts, synced_once).await;
                synced_once = true;
                attempt = 0;
                publish(&status, SyncStatus::Live);

                while let Some(event) = subscription.next().await {
                    match event {
                        Ok(stored) => {
                            let Some(record) = R::from_stored(stored) else {
                                log::warn!("Ignoring foreign record on {table} subscription");
                                continue;
                            };
                            let admitted = records
                                .write()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push_front(record.clone());
                            if admitted {
                                log::debug!("New {table} record {}", record.id());
                                let _ = inserts.send(record);
                            }
                        }
                        Err(e) => {
                            log::warn!("{table} subscription failed: {e}");
                            break;
                        }
                    }
                }
                log::warn!("{table} subscription dropped");
            }
            Err(e) => {
                log::warn!("Failed to subscribe to {table}: {e}");
                if !synced_once {
                    // Static rows still render while live updates are down.
                    merge_snapshot(store.as_ref(), &records, &inserts, false).await;
                    synced_once = true;
                }
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = policy.delay(attempt);
        publish(
            &status,
            SyncStatus::Paused {
                attempt,
                retry_in_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            },
        );
        log::info!("Live updates for {table} paused, reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use protest_map_hazard_models::{
        DangerType, HazardReport, NewHazardReport, NewPanicAlert, NewRecord, PanicAlert, Position,
        RecordId, StoredRecord, Table,
    };
    use protest_map_store::memory::MemoryStore;
    use protest_map_store::{StoreError, Subscription};
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
        }
    }

    fn new_report(danger_type: DangerType) -> NewRecord {
        NewRecord::Hazard(NewHazardReport::new(
            Position::new(-1.30, 36.82),
            danger_type,
            None,
        ))
    }

    fn seeded_report(id: &str) -> StoredRecord {
        StoredRecord::Hazard(HazardReport {
            id: RecordId::from(id),
            location_lat: -1.29,
            location_lng: 36.82,
            danger_type: "Tear Gas".to_string(),
            description: None,
            created_at: Utc::now(),
            is_verified: false,
        })
    }

    async fn wait_for(sync: &watch::Receiver<SyncStatus>, want: fn(&SyncStatus) -> bool) {
        let mut rx = sync.clone();
        tokio::time::timeout(WAIT, rx.wait_for(want))
            .await
            .expect("status never reached")
            .expect("status channel closed");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(16));
        assert_eq!(policy.delay(6), Duration::from_secs(30));
        assert_eq!(policy.delay(60), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn snapshot_failure_yields_empty_list() {
        let store = MemoryStore::new();
        store.set_available(false);
        let rows: Vec<HazardReport> = load_snapshot(&store).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn live_insert_is_prepended_to_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store.seed(seeded_report("s1"));
        store.seed(seeded_report("s2"));
        store.seed(seeded_report("s3"));

        let sync = LiveSync::<HazardReport>::start(store.clone(), fast_policy());
        wait_for(&sync.watch_status(), |s| *s == SyncStatus::Live).await;
        assert_eq!(sync.len(), 3);

        let mut inserts = sync.subscribe_inserts();
        let stored = store.insert(new_report(DangerType::TearGas)).await.unwrap();
        let merged = tokio::time::timeout(WAIT, inserts.recv()).await.unwrap().unwrap();

        assert_eq!(&merged.id, stored.id());
        let records = sync.snapshot();
        assert_eq!(records.len(), 4);
        assert_eq!(&records[0].id, stored.id());
    }

    #[tokio::test]
    async fn only_active_alerts_are_synced() {
        let store = Arc::new(MemoryStore::new());
        let sync = LiveSync::<PanicAlert>::start(store.clone(), fast_policy());
        wait_for(&sync.watch_status(), |s| *s == SyncStatus::Live).await;
        let mut inserts = sync.subscribe_inserts();

        let mut inactive = NewPanicAlert::new(Position::FALLBACK, None);
        inactive.is_active = false;
        store.insert(NewRecord::Panic(inactive)).await.unwrap();
        let active = store
            .insert(NewRecord::Panic(NewPanicAlert::new(Position::FALLBACK, None)))
            .await
            .unwrap();

        let merged = tokio::time::timeout(WAIT, inserts.recv()).await.unwrap().unwrap();
        assert_eq!(&merged.id, active.id());
        assert_eq!(sync.len(), 1);
    }

    /// Wraps a [`MemoryStore`] and hands out already-closed subscriptions
    /// for the first `drops` calls.
    struct FlakyStore {
        inner: MemoryStore,
        drops: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn insert(&self, record: NewRecord) -> Result<StoredRecord, StoreError> {
            self.inner.insert(record).await
        }

        async fn select_all(
            &self,
            table: Table,
            filter: SelectFilter,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            self.inner.select_all(table, filter).await
        }

        async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError> {
            let remaining = self.drops.load(Ordering::SeqCst);
            if remaining > 0 {
                self.drops.store(remaining - 1, Ordering::SeqCst);
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.send(Err(StoreError::Closed { table })).await;
                let task = tokio::spawn(async {});
                return Ok(Subscription::new(table, rx, task.abort_handle()));
            }
            self.inner.subscribe_insert(table).await
        }
    }

    #[tokio::test]
    async fn dropped_subscription_pauses_then_reconnects_and_backfills() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            drops: AtomicUsize::new(2),
        });
        store.inner.seed(seeded_report("before"));

        let sync = LiveSync::<HazardReport>::start(store.clone(), fast_policy());
        let status = sync.watch_status();
        wait_for(&status, |s| matches!(s, SyncStatus::Paused { .. })).await;

        // Written while live updates are paused; picked up by the backfill.
        store.inner.seed(seeded_report("during"));

        wait_for(&status, |s| *s == SyncStatus::Live).await;
        let ids: Vec<String> = sync.snapshot().into_iter().map(|r| r.id.0).collect();
        assert!(ids.contains(&"before".to_string()));
        assert!(ids.contains(&"during".to_string()));
        assert_eq!(ids.len(), 2);
    }

    /// Serves snapshots but never accepts a subscription.
    struct NoLiveStore(MemoryStore);

    #[async_trait]
    impl RecordStore for NoLiveStore {
        async fn insert(&self, record: NewRecord) -> Result<StoredRecord, StoreError> {
            self.0.insert(record).await
        }

        async fn select_all(
            &self,
            table: Table,
            filter: SelectFilter,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            self.0.select_all(table, filter).await
        }

        async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError> {
            Err(StoreError::Unavailable {
                message: format!("realtime disabled for {table}"),
            })
        }
    }

    #[tokio::test]
    async fn snapshot_loads_even_when_subscribing_fails() {
        let store = NoLiveStore(MemoryStore::new());
        store.0.seed(seeded_report("static"));

        let sync = LiveSync::<HazardReport>::start(Arc::new(store), fast_policy());
        wait_for(&sync.watch_status(), |s| matches!(s, SyncStatus::Paused { .. })).await;

        let ids: Vec<String> = sync.snapshot().into_iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec!["static".to_string()]);
    }

    #[tokio::test]
    async fn closing_publishes_closed_status() {
        let sync = LiveSync::<HazardReport>::start(Arc::new(MemoryStore::new()), fast_policy());
        let status = sync.watch_status();
        wait_for(&status, |s| *s == SyncStatus::Live).await;

        sync.close();

        assert_eq!(*status.borrow(), SyncStatus::Closed);
    }

    #[tokio::test]
    async fn closing_the_handle_stops_merging() {
        let store = Arc::new(MemoryStore::new());
        let sync = LiveSync::<HazardReport>::start(store.clone(), fast_policy());
        wait_for(&sync.watch_status(), |s| *s == SyncStatus::Live).await;
        let records = sync.records.clone();

        sync.close();
        tokio::task::yield_now().await;
        store.insert(new_report(DangerType::Other)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(records.read().unwrap().is_empty());
    }
}
