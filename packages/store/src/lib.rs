#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hazard record store contract.
//!
//! The protest map never owns its data: hazard reports and panic alerts
//! live in a managed backend that exposes insert, select-all-by-recency,
//! and a live-insert subscription for two tables. This crate defines that
//! contract as the [`RecordStore`] trait and ships two backends:
//!
//! * [`memory::MemoryStore`]: process-local, used by tests and when no
//!   hosted backend is configured.
//! * [`rest::RestStore`]: a `PostgREST`-style hosted backend
//!   (`/rest/v1/<table>`), with inserts delivered by polling.
//!
//! The store client is always passed in explicitly (`Arc<dyn RecordStore>`)
//! so callers can substitute a fake.

pub mod memory;
pub mod rest;
pub mod retry;

use async_trait::async_trait;
use protest_map_hazard_models::{NewRecord, StoredRecord, Table};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur while talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with a non-success status.
    #[error("Store returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The backend cannot be reached or refused the operation.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// The record does not belong to the requested table.
    #[error("Record for table {actual} delivered on {expected}")]
    WrongTable {
        /// The table that was asked for.
        expected: Table,
        /// The table the record belongs to.
        actual: Table,
    },

    /// The subscription channel closed.
    #[error("Subscription to {table} closed")]
    Closed {
        /// The table whose subscription closed.
        table: Table,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },
}

/// Row filter for [`RecordStore::select_all`].
///
/// Results are always ordered by `created_at` descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectFilter {
    /// Only return rows with `is_active = true`.
    pub active_only: bool,
}

impl SelectFilter {
    /// The filter the map uses for each table: every hazard report, only
    /// active panic alerts.
    #[must_use]
    pub const fn for_table(table: Table) -> Self {
        Self {
            active_only: matches!(table, Table::PanicAlerts),
        }
    }
}

/// An event delivered on a [`Subscription`].
pub type SubscriptionEvent = Result<StoredRecord, StoreError>;

/// A live-insert subscription to one table.
///
/// The delivering task is aborted when the handle is dropped, so holding
/// the handle is what keeps the channel open. [`Subscription::unsubscribe`]
/// closes it explicitly.
pub struct Subscription {
    table: Table,
    rx: mpsc::Receiver<SubscriptionEvent>,
    task: tokio::task::AbortHandle,
}

impl Subscription {
    /// Wraps a receiver fed by `task`.
    #[must_use]
    pub const fn new(
        table: Table,
        rx: mpsc::Receiver<SubscriptionEvent>,
        task: tokio::task::AbortHandle,
    ) -> Self {
        Self { table, rx, task }
    }

    /// The table this subscription delivers inserts for.
    #[must_use]
    pub const fn table(&self) -> Table {
        self.table
    }

    /// Waits for the next insert.
    ///
    /// Returns `None` once the channel has closed. A transport failure is
    /// delivered as `Some(Err(..))` and is normally followed by `None`.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Closes the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        log::debug!("Closing {} subscription", self.table);
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Buffer size of subscription channels.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// The minimal CRUD+subscribe interface of the hosted backend.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts one record and returns it as stored (id and `created_at`
    /// assigned by the store).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store rejects or cannot be reached.
    async fn insert(&self, record: NewRecord) -> Result<StoredRecord, StoreError>;

    /// Returns every row of `table` matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    async fn select_all(
        &self,
        table: Table,
        filter: SelectFilter,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Opens a live-insert subscription to `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the subscription cannot be established.
    async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError>;

    /// Closes a subscription previously returned by
    /// [`RecordStore::subscribe_insert`].
    fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }
}

/// Checks that `record` belongs to `table`.
///
/// # Errors
///
/// Returns [`StoreError::WrongTable`] on mismatch.
pub fn expect_table(table: Table, record: &StoredRecord) -> Result<(), StoreError> {
    let actual = record.table();
    if actual == table {
        Ok(())
    } else {
        Err(StoreError::WrongTable {
            expected: table,
            actual,
        })
    }
}
