//! OSRM-compatible routing client.
//!
//! OSRM has no native "avoid these points" option, so the client asks for
//! alternative routes and picks the first one whose geometry keeps the
//! configured clearance from every avoid point. If none does, the fastest
//! route is returned flagged [`Route::passes_near_hazard`].

use std::time::Duration;

use async_trait::async_trait;
use geo::{Closest, ClosestPoint, Distance, Haversine, LineString, Point};
use protest_map_hazard_models::Position;
use serde::Deserialize;

use crate::{Route, RouteProfile, RouteProvider, RouteRequest, RoutingError};

/// Public foot-profile OSRM instance.
pub const DEFAULT_ROUTING_URL: &str = "https://routing.openstreetmap.de/routed-foot";

/// Default clearance a route must keep from avoid points, in metres.
pub const DEFAULT_CLEARANCE_M: f64 = 100.0;

/// Routing engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OsrmConfig {
    /// Base URL; `/route/v1/<profile>/...` is appended.
    pub base_url: String,
    /// Required clearance from avoid points, in metres.
    pub clearance_m: f64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ROUTING_URL.to_string(),
            clearance_m: DEFAULT_CLEARANCE_M,
        }
    }
}

impl OsrmConfig {
    /// Reads `ROUTING_URL` and `ROUTE_CLEARANCE_M`, falling back to the
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("ROUTING_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map_or_else(
                || DEFAULT_ROUTING_URL.to_string(),
                |url| url.trim_end_matches('/').to_string(),
            );
        let clearance_m = std::env::var("ROUTE_CLEARANCE_M")
            .ok()
            .and_then(|m| m.parse().ok())
            .unwrap_or(DEFAULT_CLEARANCE_M);
        Self {
            base_url,
            clearance_m,
        }
    }
}

/// A [`RouteProvider`] backed by an OSRM HTTP API.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: reqwest::Client,
    config: OsrmConfig,
}

impl OsrmClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Http`] if the HTTP client cannot be built.
    pub fn new(config: OsrmConfig) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }

    fn route_url(&self, request: &RouteRequest) -> String {
        let to = request.destination.position();
        format!(
            "{}/route/v1/{}/{},{};{},{}",
            self.config.base_url,
            profile_segment(request.profile),
            request.origin.lng,
            request.origin.lat,
            to.lng,
            to.lat,
        )
    }
}

/// OSRM's name for a travel mode.
const fn profile_segment(profile: RouteProfile) -> &'static str {
    match profile {
        RouteProfile::Walking => "foot",
        RouteProfile::Cycling => "bike",
        RouteProfile::Driving => "driving",
    }
}

#[async_trait]
impl RouteProvider for OsrmClient {
    async fn route(&self, request: &RouteRequest) -> Result<Route, RoutingError> {
        let url = self.route_url(request);
        log::debug!("Requesting route: {url}");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("alternatives", "true"),
                ("overview", "full"),
                ("geometries", "geojson"),
            ])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() && status.as_u16() != 400 {
            return Err(RoutingError::Status {
                status: status.as_u16(),
                message: text.chars().take(300).collect(),
            });
        }

        let body: OsrmResponse = serde_json::from_str(&text)?;
        let candidates = body.into_candidates()?;
        select_route(candidates, &request.avoid, self.config.clearance_m).ok_or_else(|| {
            RoutingError::NoRoute {
                message: "engine returned no routes".to_string(),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// A route as returned by the engine, before clearance is checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Path vertices.
    pub geometry: Vec<Position>,
    /// Length in metres.
    pub distance_m: f64,
    /// Travel time in seconds.
    pub duration_s: f64,
}

impl OsrmResponse {
    fn into_candidates(self) -> Result<Vec<Candidate>, RoutingError> {
        if self.code != "Ok" {
            return Err(RoutingError::NoRoute {
                message: self.message.unwrap_or(self.code),
            });
        }
        Ok(self
            .routes
            .into_iter()
            .map(|r| Candidate {
                geometry: r
                    .geometry
                    .coordinates
                    .into_iter()
                    .map(|[lng, lat]| Position::new(lat, lng))
                    .collect(),
                distance_m: r.distance,
                duration_s: r.duration,
            })
            .collect())
    }
}

/// Smallest haversine distance in metres from any avoid point to the
/// path. Each point is measured to its closest spot on the polyline, so a
/// long straight segment passing over a hazard counts. `None` when either
/// side is empty.
#[must_use]
pub fn clearance(geometry: &[Position], avoid: &[Position]) -> Option<f64> {
    let to_point = |p: &Position| Point::new(p.lng, p.lat);
    let path: LineString<f64> = geometry.iter().map(|p| (p.lng, p.lat)).collect();

    avoid
        .iter()
        .filter_map(|a| {
            let a = to_point(a);
            match path.closest_point(&a) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => Some(Haversine.distance(a, p)),
                // Single-vertex paths have no segments.
                Closest::Indeterminate => geometry
                    .iter()
                    .map(|v| Haversine.distance(a, to_point(v)))
                    .min_by(f64::total_cmp),
            }
        })
        .min_by(f64::total_cmp)
}

/// Picks the first candidate that keeps `clearance_m` from every avoid
/// point, else the fastest candidate flagged as passing near a hazard.
#[must_use]
pub fn select_route(candidates: Vec<Candidate>, avoid: &[Position], clearance_m: f64) -> Option<Route> {
    let scored: Vec<(Candidate, Option<f64>)> = candidates
        .into_iter()
        .map(|c| {
            let min = clearance(&c.geometry, avoid);
            (c, min)
        })
        .collect();

    let clear = scored
        .iter()
        .position(|(_, min)| min.is_none_or(|m| m >= clearance_m));

    let (index, passes_near_hazard) = match clear {
        Some(i) => (i, false),
        None => {
            let fastest = scored
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.0.duration_s.total_cmp(&b.0.duration_s))
                .map(|(i, _)| i)?;
            (fastest, true)
        }
    };

    let (candidate, min_clearance_m) = scored.into_iter().nth(index)?;
    Some(Route {
        geometry: candidate.geometry,
        distance_m: candidate.distance_m,
        duration_s: candidate.duration_s,
        min_clearance_m,
        passes_near_hazard,
    })
}
