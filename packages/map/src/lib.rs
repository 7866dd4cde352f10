#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map view state and marker layers.
//!
//! A [`MapViewState`] is what a map screen holds while it is open: the
//! centre position, the layer toggles, the live record collections, the
//! click-to-pin mode, and the current route request. Opening one starts
//! live sync for both record kinds; dropping it stops them.

pub mod export;
pub mod markers;

use std::sync::Arc;

use protest_map_geolocation::{GeolocationProvider, PositionFix};
use protest_map_hazard_models::{HazardLayer, HazardReport, PanicAlert, Position, safe_zones};
use protest_map_routing::RouteRequest;
use protest_map_store::RecordStore;
use protest_map_sync::{LiveSync, ReconnectPolicy, SyncStatus};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use export::feature_collection;
pub use markers::{Marker, MarkerKind, render_markers};

/// Base map tile URL template.
pub const TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Attribution required by the tile provider.
pub const TILE_ATTRIBUTION: &str =
    "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors";

/// Initial zoom level.
pub const DEFAULT_ZOOM: u8 = 13;

/// A toggleable marker layer. Panic alerts are not a layer: they are
/// always drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Layer {
    /// Curated safe zones.
    SafeZones,
    /// Generic hazard reports.
    Hazards,
    /// Reports classified as police blocks.
    PoliceBlocks,
}

/// Which toggleable layers are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerVisibility {
    /// Safe zone markers.
    pub safe_zones: bool,
    /// Generic hazard markers.
    pub hazards: bool,
    /// Police-block markers.
    pub police_blocks: bool,
}

impl Default for LayerVisibility {
    fn default() -> Self {
        Self {
            safe_zones: true,
            hazards: true,
            police_blocks: true,
        }
    }
}

impl LayerVisibility {
    /// Whether reports on `layer` are drawn.
    #[must_use]
    pub const fn shows(self, layer: HazardLayer) -> bool {
        match layer {
            HazardLayer::Hazard => self.hazards,
            HazardLayer::PoliceBlock => self.police_blocks,
        }
    }

    /// Mutable access to one toggle.
    pub const fn flag_mut(&mut self, layer: Layer) -> &mut bool {
        match layer {
            Layer::SafeZones => &mut self.safe_zones,
            Layer::Hazards => &mut self.hazards,
            Layer::PoliceBlocks => &mut self.police_blocks,
        }
    }
}

/// Callback receiving a pinned location.
pub type PinHandler = Box<dyn FnMut(Position) + Send + Sync>;

/// State of an open map view.
pub struct MapViewState {
    center: PositionFix,
    layers: LayerVisibility,
    reports: LiveSync<HazardReport>,
    alerts: LiveSync<PanicAlert>,
    pin_handler: Option<PinHandler>,
    route: Option<RouteRequest>,
}

impl MapViewState {
    /// Opens a map view centred on the current (or fallback) position and
    /// starts syncing both record kinds from `store`.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        geolocation: &GeolocationProvider,
        policy: ReconnectPolicy,
    ) -> Self {
        let center = geolocation.get_current_position().await;
        log::info!("Opening map view at {} ({:?})", center.position, center.origin);

        Self {
            center,
            layers: LayerVisibility::default(),
            reports: LiveSync::start(store.clone(), policy),
            alerts: LiveSync::start(store, policy),
            pin_handler: None,
            route: None,
        }
    }

    /// Where the map is centred.
    #[must_use]
    pub const fn center(&self) -> &PositionFix {
        &self.center
    }

    /// Current layer toggles.
    #[must_use]
    pub const fn layers(&self) -> LayerVisibility {
        self.layers
    }

    /// Replaces all layer toggles.
    pub const fn set_layers(&mut self, layers: LayerVisibility) {
        self.layers = layers;
    }

    /// Flips one layer and returns its new state.
    pub const fn toggle(&mut self, layer: Layer) -> bool {
        let flag = self.layers.flag_mut(layer);
        *flag = !*flag;
        *flag
    }

    /// Hazard reports currently held, newest arrival first.
    #[must_use]
    pub fn reports(&self) -> Vec<HazardReport> {
        self.reports.snapshot()
    }

    /// Active panic alerts currently held, newest arrival first.
    #[must_use]
    pub fn alerts(&self) -> Vec<PanicAlert> {
        self.alerts.snapshot()
    }

    /// Live sync state of the hazard and panic collections.
    #[must_use]
    pub fn sync_status(&self) -> (SyncStatus, SyncStatus) {
        (self.reports.status(), self.alerts.status())
    }

    /// The hazard report sync handle.
    #[must_use]
    pub const fn report_sync(&self) -> &LiveSync<HazardReport> {
        &self.reports
    }

    /// The panic alert sync handle.
    #[must_use]
    pub const fn alert_sync(&self) -> &LiveSync<PanicAlert> {
        &self.alerts
    }

    /// Every visible marker, given the current toggles.
    #[must_use]
    pub fn markers(&self) -> Vec<Marker> {
        render_markers(
            self.center.position,
            safe_zones::canonical(),
            &self.reports(),
            &self.alerts(),
            self.layers,
        )
    }

    /// The visible markers as `GeoJSON`.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::FeatureCollection {
        feature_collection(&self.markers())
    }

    /// Enters report mode: the next clicks are passed to `handler`.
    pub fn enter_report_mode(&mut self, handler: PinHandler) {
        self.pin_handler = Some(handler);
    }

    /// Leaves report mode.
    pub fn exit_report_mode(&mut self) {
        self.pin_handler = None;
    }

    /// Whether clicks currently pin a location.
    #[must_use]
    pub const fn in_report_mode(&self) -> bool {
        self.pin_handler.is_some()
    }

    /// Handles a map click. Returns whether it pinned a location.
    pub fn click(&mut self, at: Position) -> bool {
        let Some(handler) = self.pin_handler.as_mut() else {
            return false;
        };
        log::debug!("Pinned {at}");
        handler(at);
        true
    }

    /// Builds a request for a route from the centre to the nearest safe
    /// zone, avoiding current hazards and alerts, and keeps it as the
    /// active route.
    pub fn request_route_to_nearest(&mut self) -> Option<&RouteRequest> {
        self.route = RouteRequest::to_nearest(
            self.center.position,
            safe_zones::canonical(),
            &self.reports(),
            &self.alerts(),
        );
        self.route.as_ref()
    }

    /// The active route request, if any.
    #[must_use]
    pub const fn route(&self) -> Option<&RouteRequest> {
        self.route.as_ref()
    }

    /// Drops the active route request.
    pub fn clear_route(&mut self) {
        self.route = None;
    }

    /// Tears the view down, closing both subscriptions.
    pub fn close(self) {
        log::info!("Closing map view");
        drop(self);
    }
}
