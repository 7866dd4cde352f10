#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hazard report and panic alert submission.
//!
//! [`report::ReportForm`] gates a hazard report on a pinned location and a
//! chosen danger type before it ever reaches the store.
//! [`panic::PanicFlow`] takes an explicit confirmation, then records the
//! alert and relays the emergency text through external channels.

pub mod dispatch;
pub mod message;
pub mod panic;
pub mod report;

use protest_map_store::StoreError;
use thiserror::Error;

pub use dispatch::{DispatchChannel, LaunchError, Launcher, SystemLauncher};
pub use message::EmergencyMessage;
pub use panic::{Confirmation, DispatchReport, PanicConfig, PanicFlow, PanicState, dispatch_alert};
pub use report::{ReportForm, ReportState};

/// Errors from the submission flows.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Required fields are missing; nothing was sent.
    #[error("Missing {missing}")]
    Incomplete {
        /// What is missing.
        missing: String,
    },

    /// A submission is already in flight.
    #[error("A submission is already in progress")]
    Busy,

    /// The confirmation gesture was not deliberate enough.
    #[error("Alert not confirmed")]
    NotConfirmed,

    /// The action is not valid in the current state.
    #[error("Not allowed while {state}")]
    InvalidState {
        /// The current state.
        state: String,
    },

    /// The store rejected the record.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
