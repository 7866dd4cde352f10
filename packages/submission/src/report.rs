//! Hazard report form.

use protest_map_hazard_models::{DangerType, NewHazardReport, NewRecord, Position, StoredRecord};
use protest_map_store::RecordStore;
use serde::Serialize;

use crate::SubmitError;

/// Where the report form is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportState {
    /// Nothing pinned yet.
    Idle,
    /// A location is pinned but no danger type chosen.
    LocationPinned,
    /// Both location and danger type are set; ready to submit.
    TypeSelected,
    /// Waiting for the store.
    Submitting,
}

/// A hazard report being filled in.
///
/// A failed submission keeps everything entered so the user can retry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportForm {
    location: Option<Position>,
    danger_type: Option<DangerType>,
    description: String,
    submitting: bool,
    last_error: Option<String>,
}

impl ReportForm {
    /// An empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ReportState {
        if self.submitting {
            return ReportState::Submitting;
        }
        match (self.location, self.danger_type) {
            (Some(_), Some(_)) => ReportState::TypeSelected,
            (Some(_), None) => ReportState::LocationPinned,
            (None, _) => ReportState::Idle,
        }
    }

    /// Pins the report location (map click or device position).
    pub const fn pin(&mut self, position: Position) {
        self.location = Some(position);
    }

    /// Chooses the danger type.
    pub const fn select_type(&mut self, danger_type: DangerType) {
        self.danger_type = Some(danger_type);
    }

    /// Sets the free-text description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// The pinned location.
    #[must_use]
    pub const fn location(&self) -> Option<Position> {
        self.location
    }

    /// The chosen danger type.
    #[must_use]
    pub const fn danger_type(&self) -> Option<DangerType> {
        self.danger_type
    }

    /// The description as typed.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The notice from the last failed submission, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the submit action is enabled: both a location and a danger
    /// type are set.
    #[must_use]
    pub const fn can_submit(&self) -> bool {
        self.location.is_some() && self.danger_type.is_some() && !self.submitting
    }

    /// Builds the insert payload, if the form is complete.
    fn payload(&self) -> Option<NewHazardReport> {
        let description = Some(self.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Some(NewHazardReport::new(
            self.location?,
            self.danger_type?,
            description,
        ))
    }

    /// Submits the report.
    ///
    /// On success the form is cleared. On a store error the entered data
    /// is kept and the failure is available from [`Self::last_error`].
    ///
    /// # Errors
    ///
    /// * [`SubmitError::Incomplete`] if location or danger type is unset;
    ///   the store is not contacted.
    /// * [`SubmitError::Store`] if the insert fails.
    pub async fn submit(&mut self, store: &dyn RecordStore) -> Result<StoredRecord, SubmitError> {
        if self.submitting {
            return Err(SubmitError::Busy);
        }
        let Some(payload) = self.payload() else {
            return Err(SubmitError::Incomplete {
                missing: self.missing(),
            });
        };

        self.submitting = true;
        let result = store.insert(NewRecord::Hazard(payload)).await;
        self.submitting = false;

        match result {
            Ok(stored) => {
                log::info!("Submitted hazard report {}", stored.id());
                *self = Self::default();
                Ok(stored)
            }
            Err(e) => {
                log::warn!("Hazard report submission failed: {e}");
                self.last_error = Some(format!("Failed to submit report: {e}"));
                Err(SubmitError::Store(e))
            }
        }
    }

    fn missing(&self) -> String {
        match (self.location, self.danger_type) {
            (None, None) => "location and danger type",
            (None, Some(_)) => "location",
            _ => "danger type",
        }
        .to_string()
    }
}
