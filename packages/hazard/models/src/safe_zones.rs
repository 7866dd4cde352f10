//! Compile-time registry of curated safe zones.
//!
//! Safe zones are configuration, not user data. They are defined in TOML
//! files under `zones/`, embedded at compile time, parsed once, and never
//! change at runtime.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::Position;

/// A static location considered safe to route toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeZone {
    /// Stable identifier within the registry.
    pub id: u32,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// Display name.
    pub name: String,
    /// Short label shown on the popup badge (e.g. "Community Safe Zone").
    pub kind: String,
    /// One-line description.
    pub description: String,
}

impl SafeZone {
    /// Where the zone is.
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }
}

#[derive(Deserialize)]
struct ZoneFile {
    zones: Vec<SafeZone>,
}

const ZONE_TOML: &str = include_str!("../zones/nairobi.toml");

static CANONICAL: LazyLock<Vec<SafeZone>> = LazyLock::new(|| {
    toml::de::from_str::<ZoneFile>(ZONE_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse embedded safe zones: {e}"))
        .zones
});

/// Returns the canonical safe zone list, in registry order.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed (a build-time invariant).
#[must_use]
pub fn canonical() -> &'static [SafeZone] {
    &CANONICAL
}
