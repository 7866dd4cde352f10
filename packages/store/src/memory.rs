//! Process-local record store.
//!
//! Keeps both tables in memory and fans inserts out to subscribers over a
//! `tokio` broadcast channel per table. Used by tests as the fake store and
//! by the server when no hosted backend is configured.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use protest_map_hazard_models::{
    HazardReport, NewRecord, PanicAlert, RecordId, StoredRecord, Table,
};
use tokio::sync::{broadcast, mpsc};

use crate::{
    RecordStore, SUBSCRIPTION_BUFFER, SelectFilter, StoreError, Subscription, expect_table,
};

/// Capacity of each table's broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// An in-memory [`RecordStore`].
pub struct MemoryStore {
    rows: Mutex<BTreeMap<Table, Vec<StoredRecord>>>,
    channels: BTreeMap<Table, broadcast::Sender<StoredRecord>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let channels = [Table::ChaosReports, Table::PanicAlerts]
            .into_iter()
            .map(|table| (table, broadcast::channel(BROADCAST_CAPACITY).0))
            .collect();
        Self {
            rows: Mutex::new(BTreeMap::new()),
            channels,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Seeds a row without notifying subscribers, as if it had been
    /// written before anyone subscribed.
    pub fn seed(&self, record: StoredRecord) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.table())
            .or_default()
            .push(record);
    }

    /// Number of rows currently held for `table`.
    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .map_or(0, Vec::len)
    }

    /// Whether `table` holds no rows.
    #[must_use]
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                message: "in-memory store is offline".to_string(),
            })
        }
    }

    fn materialize(record: NewRecord) -> StoredRecord {
        let id = RecordId(uuid::Uuid::new_v4().to_string());
        let created_at = Utc::now();
        match record {
            NewRecord::Hazard(r) => StoredRecord::Hazard(HazardReport {
                id,
                location_lat: r.location_lat,
                location_lng: r.location_lng,
                danger_type: r.danger_type,
                description: r.description,
                created_at,
                is_verified: false,
            }),
            NewRecord::Panic(a) => StoredRecord::Panic(PanicAlert {
                id,
                location_lat: a.location_lat,
                location_lng: a.location_lng,
                emergency_note: a.emergency_note,
                created_at,
                is_active: a.is_active,
            }),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: NewRecord) -> Result<StoredRecord, StoreError> {
        self.check_available()?;

        let table = record.table();
        let stored = Self::materialize(record);
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table)
            .or_default()
            .push(stored.clone());

        if let Some(tx) = self.channels.get(&table) {
            // No receivers is not an error: nobody is watching yet.
            let _ = tx.send(stored.clone());
        }

        log::debug!("Inserted {} into {table}", stored.id());
        Ok(stored)
    }

    async fn select_all(
        &self,
        table: Table,
        filter: SelectFilter,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.check_available()?;

        let mut rows: Vec<StoredRecord> = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| match row {
                StoredRecord::Panic(a) => !filter.active_only || a.is_active,
                StoredRecord::Hazard(_) => true,
            })
            .collect();

        rows.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(rows)
    }

    async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError> {
        self.check_available()?;

        let mut inserts = self
            .channels
            .get(&table)
            .ok_or_else(|| StoreError::Config {
                message: format!("no channel for table {table}"),
            })?
            .subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let task = tokio::spawn(async move {
            loop {
                match inserts.recv().await {
                    Ok(record) => {
                        let event = expect_table(table, &record).map(|()| record);
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("{table} subscriber lagged, skipped {skipped} inserts");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(Err(StoreError::Closed { table })).await;
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(table, rx, task.abort_handle()))
    }
}
