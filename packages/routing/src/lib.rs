#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Nearest safe zone selection and route planning.
//!
//! Picking the destination is a local computation over the static safe
//! zone list. Getting an actual path there is delegated to a
//! [`RouteProvider`]; the contract of this crate is the selected
//! destination plus the list of points the path should avoid.

pub mod osrm;

use async_trait::async_trait;
use protest_map_hazard_models::{HazardReport, PanicAlert, Position, SafeZone};
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors from a [`RouteProvider`].
#[derive(Debug, Error)]
pub enum RoutingError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not valid JSON of the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The routing engine answered with a non-success status.
    #[error("Routing engine returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The engine found no route between the two points.
    #[error("No route: {message}")]
    NoRoute {
        /// Engine-reported reason.
        message: String,
    },
}

/// Travel mode requested from the routing engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RouteProfile {
    /// On foot.
    #[default]
    Walking,
    /// By bicycle.
    Cycling,
    /// By car.
    Driving,
}

/// Returns the safe zone closest to `origin`.
///
/// Distance is the Euclidean delta over raw latitude/longitude, which is
/// only meaningful at city scale. On a tie the zone listed first wins.
/// Returns `None` only for an empty list.
#[must_use]
pub fn nearest_safe_zone(origin: Position, zones: &[SafeZone]) -> Option<&SafeZone> {
    let mut best: Option<(&SafeZone, f64)> = None;
    for zone in zones {
        let delta = origin.euclidean_delta(zone.position());
        if best.is_none_or(|(_, d)| delta < d) {
            best = Some((zone, delta));
        }
    }
    best.map(|(zone, _)| zone)
}

/// Points a route should steer clear of: every hazard report, then every
/// active panic alert.
#[must_use]
pub fn avoid_list(reports: &[HazardReport], alerts: &[PanicAlert]) -> Vec<Position> {
    reports
        .iter()
        .map(|r| Position::new(r.location_lat, r.location_lng))
        .chain(
            alerts
                .iter()
                .filter(|a| a.is_active)
                .map(|a| Position::new(a.location_lat, a.location_lng)),
        )
        .collect()
}

/// A request for a path to a safe zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    /// Starting point.
    pub origin: Position,
    /// Target zone.
    pub destination: SafeZone,
    /// Points to keep away from.
    pub avoid: Vec<Position>,
    /// Travel mode.
    pub profile: RouteProfile,
}

impl RouteRequest {
    /// Builds a walking request from `origin` to its nearest safe zone,
    /// avoiding every known hazard and active alert.
    ///
    /// Returns `None` when `zones` is empty.
    #[must_use]
    pub fn to_nearest(
        origin: Position,
        zones: &[SafeZone],
        reports: &[HazardReport],
        alerts: &[PanicAlert],
    ) -> Option<Self> {
        let destination = nearest_safe_zone(origin, zones)?.clone();
        Some(Self {
            origin,
            destination,
            avoid: avoid_list(reports, alerts),
            profile: RouteProfile::Walking,
        })
    }
}

/// A planned path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Path vertices from origin to destination.
    pub geometry: Vec<Position>,
    /// Length in metres.
    pub distance_m: f64,
    /// Expected travel time in seconds.
    pub duration_s: f64,
    /// Smallest distance in metres between the path and any avoid point,
    /// or `None` if there was nothing to avoid.
    pub min_clearance_m: Option<f64>,
    /// Whether no candidate path kept the required clearance and this one
    /// was returned anyway.
    pub passes_near_hazard: bool,
}

/// A routing engine.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Plans a path for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if the engine is unreachable or finds no
    /// route.
    async fn route(&self, request: &RouteRequest) -> Result<Route, RoutingError>;
}

/// Plans a route, treating any failure as "no route layer".
pub async fn plan(provider: &dyn RouteProvider, request: &RouteRequest) -> Option<Route> {
    match provider.route(request).await {
        Ok(route) => {
            log::debug!(
                "Route to {} is {:.0} m ({:.0} s)",
                request.destination.name,
                route.distance_m,
                route.duration_s
            );
            Some(route)
        }
        Err(e) => {
            log::warn!("Routing to {} failed: {e}", request.destination.name);
            None
        }
    }
}
