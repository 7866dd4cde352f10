//! Marker layers.
//!
//! Turns the static safe zones and the live record collections into the
//! list of markers the map draws, applying the layer toggles and the
//! police-block classification.

use chrono::{DateTime, Utc};
use protest_map_hazard_models::{HazardLayer, HazardReport, PanicAlert, Position, SafeZone};
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::LayerVisibility;

/// What a marker represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MarkerKind {
    /// The viewer's own (or fallback) position.
    CurrentPosition,
    /// A curated safe zone.
    SafeZone,
    /// A generic hazard report.
    Hazard,
    /// A hazard report classified as a police block.
    PoliceBlock,
    /// An active panic alert.
    Panic,
}

/// Continuous animation drawn around a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Animation {
    /// Slow pulse.
    Pulse,
    /// Expanding ping ring, used for urgency.
    Ping,
}

/// Visual treatment of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStyle {
    /// CSS colour of the marker body.
    pub color: &'static str,
    /// Icon name drawn inside the marker.
    pub icon: &'static str,
    /// Optional animation.
    pub animation: Option<Animation>,
}

impl MarkerStyle {
    /// Style for a marker kind.
    #[must_use]
    pub const fn for_kind(kind: MarkerKind) -> Self {
        match kind {
            MarkerKind::CurrentPosition => Self {
                color: "#3b82f6",
                icon: "pin",
                animation: None,
            },
            MarkerKind::SafeZone => Self {
                color: "#22c55e",
                icon: "shield",
                animation: None,
            },
            MarkerKind::Hazard => Self {
                color: "#ef4444",
                icon: "alert-triangle",
                animation: Some(Animation::Pulse),
            },
            MarkerKind::PoliceBlock => Self {
                color: "#f97316",
                icon: "alert-triangle",
                animation: Some(Animation::Pulse),
            },
            MarkerKind::Panic => Self {
                color: "#991b1b",
                icon: "alert-triangle",
                animation: Some(Animation::Ping),
            },
        }
    }
}

/// Detail popup shown when a marker is tapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Popup {
    /// Heading line.
    pub title: String,
    /// Free text, if any.
    pub body: Option<String>,
    /// Small badge (zone type, "EMERGENCY").
    pub badge: Option<String>,
    /// Local time of the record, `HH:MM:SS`.
    pub time: Option<String>,
    /// Trailing status line ("Verified Report", "Active Alert").
    pub footer: Option<String>,
}

/// A single map marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    /// Stable key, unique within a render.
    pub key: String,
    /// What the marker represents.
    pub kind: MarkerKind,
    /// Where it is drawn.
    pub position: Position,
    /// How it is drawn.
    pub style: MarkerStyle,
    /// Tap-to-open details.
    pub popup: Popup,
}

/// Formats a record timestamp for a popup.
#[must_use]
pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// The "You are here" marker.
#[must_use]
pub fn current_position_marker(position: Position) -> Marker {
    Marker {
        key: "current".to_string(),
        kind: MarkerKind::CurrentPosition,
        position,
        style: MarkerStyle::for_kind(MarkerKind::CurrentPosition),
        popup: Popup {
            title: "📍 You are here".to_string(),
            body: None,
            badge: None,
            time: None,
            footer: None,
        },
    }
}

/// Marker for a safe zone.
#[must_use]
pub fn safe_zone_marker(zone: &SafeZone) -> Marker {
    Marker {
        key: format!("safe-{}", zone.id),
        kind: MarkerKind::SafeZone,
        position: zone.position(),
        style: MarkerStyle::for_kind(MarkerKind::SafeZone),
        popup: Popup {
            title: zone.name.clone(),
            body: Some(zone.description.clone()),
            badge: Some(format!("✅ {}", zone.kind)),
            time: None,
            footer: Some("Safe Haven".to_string()),
        },
    }
}

/// Marker for a hazard report, on whichever layer it classifies into.
#[must_use]
pub fn hazard_marker(report: &HazardReport) -> Marker {
    let (kind, prefix) = match report.layer() {
        HazardLayer::Hazard => (MarkerKind::Hazard, "chaos"),
        HazardLayer::PoliceBlock => (MarkerKind::PoliceBlock, "police"),
    };
    Marker {
        key: format!("{prefix}-{}", report.id),
        kind,
        position: Position::new(report.location_lat, report.location_lng),
        style: MarkerStyle::for_kind(kind),
        popup: Popup {
            title: report.danger_type.clone(),
            body: report.description.clone(),
            badge: None,
            time: Some(format_time(report.created_at)),
            footer: report.is_verified.then(|| "✓ Verified Report".to_string()),
        },
    }
}

/// Marker for a panic alert.
#[must_use]
pub fn panic_marker(alert: &PanicAlert) -> Marker {
    Marker {
        key: format!("panic-{}", alert.id),
        kind: MarkerKind::Panic,
        position: Position::new(alert.location_lat, alert.location_lng),
        style: MarkerStyle::for_kind(MarkerKind::Panic),
        popup: Popup {
            title: "🚨 PANIC ALERT".to_string(),
            body: alert.emergency_note.clone(),
            badge: Some("🆘 EMERGENCY".to_string()),
            time: Some(format_time(alert.created_at)),
            footer: Some("⚡ Active Alert".to_string()),
        },
    }
}

/// Builds every visible marker.
///
/// Each hazard report lands on exactly one of the hazard and police-block
/// layers and is shown only if that layer is visible. Panic alerts are
/// always shown.
#[must_use]
pub fn render_markers(
    center: Position,
    zones: &[SafeZone],
    reports: &[HazardReport],
    alerts: &[PanicAlert],
    layers: LayerVisibility,
) -> Vec<Marker> {
    let mut markers = vec![current_position_marker(center)];

    if layers.safe_zones {
        markers.extend(zones.iter().map(safe_zone_marker));
    }

    markers.extend(
        reports
            .iter()
            .filter(|r| layers.shows(r.layer()))
            .map(hazard_marker),
    );

    markers.extend(alerts.iter().filter(|a| a.is_active).map(panic_marker));

    markers
}
