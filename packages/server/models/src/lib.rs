#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the protest map server.
//!
//! These types are serialized to JSON for the REST API. Record rows are
//! returned in their store shape; everything else is camelCase.

use protest_map_hazard_models::{
    DangerType, HazardLayer, HazardReport, PanicAlert, Position, SafeZone,
};
use protest_map_routing::{Route, RouteRequest};
use protest_map_sync::SyncStatus;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Live sync state of hazard reports.
    pub reports: SyncStatus,
    /// Live sync state of panic alerts.
    pub alerts: SyncStatus,
}

/// A selectable danger type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDangerType {
    /// Enum name.
    pub id: DangerType,
    /// Human label, as stored.
    pub label: String,
    /// Layer reports of this type land on.
    pub layer: HazardLayer,
}

impl From<DangerType> for ApiDangerType {
    fn from(danger_type: DangerType) -> Self {
        Self {
            id: danger_type,
            label: danger_type.to_string(),
            layer: danger_type.layer(),
        }
    }
}

/// Query parameters for the map endpoint. Unset layers are shown.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapQueryParams {
    /// Show safe zones.
    pub safe_zones: Option<bool>,
    /// Show generic hazards.
    pub hazards: Option<bool>,
    /// Show police blocks.
    pub police_blocks: Option<bool>,
    /// Centre latitude; defaults to the server's position.
    pub lat: Option<f64>,
    /// Centre longitude.
    pub lng: Option<f64>,
}

/// Optional position from query parameters or a request body.
#[must_use]
pub fn position_of(lat: Option<f64>, lng: Option<f64>) -> Option<Position> {
    Some(Position::new(lat?, lng?))
}

/// Request body for submitting a hazard report.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportBody {
    /// Pinned latitude.
    pub lat: Option<f64>,
    /// Pinned longitude.
    pub lng: Option<f64>,
    /// Danger type label, e.g. `"Tear Gas"`.
    pub danger_type: Option<String>,
    /// Optional free text.
    pub description: Option<String>,
}

/// Request body for raising a panic alert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBody {
    /// Latitude; if unset the server's position is used.
    pub lat: Option<f64>,
    /// Longitude.
    pub lng: Option<f64>,
    /// Optional note.
    pub note: Option<String>,
}

/// Query parameters for the nearest safe zone endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestQueryParams {
    /// Origin latitude; defaults to the server's position.
    pub lat: Option<f64>,
    /// Origin longitude.
    pub lng: Option<f64>,
    /// Also ask the routing engine for a path.
    #[serde(default)]
    pub route: bool,
}

/// Nearest safe zone response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNearestSafeZone {
    /// The selected destination and the points to avoid.
    pub request: RouteRequest,
    /// Planned path, if requested and available.
    pub route: Option<Route>,
}

/// Current in-memory records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRecords<T> {
    /// Records, newest arrival first.
    pub records: Vec<T>,
    /// Live sync state of this collection.
    pub status: SyncStatus,
}

/// Events on the server-sent events stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ApiEvent {
    /// A new hazard report.
    Report(HazardReport),
    /// A new panic alert.
    Alert(PanicAlert),
    /// Sync state changed.
    Status {
        /// Hazard report sync state.
        reports: SyncStatus,
        /// Panic alert sync state.
        alerts: SyncStatus,
    },
}

impl ApiEvent {
    /// SSE event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Report(_) => "report",
            Self::Alert(_) => "alert",
            Self::Status { .. } => "status",
        }
    }
}

/// Safe zones are returned as stored in the registry.
pub type ApiSafeZone = SafeZone;
