#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hazard report, panic alert, and safe zone types.
//!
//! This crate defines the record shapes shared across the protest map:
//! the two store-backed record kinds (`chaos_reports` and `panic_alerts`),
//! the fixed danger type taxonomy, the police-block classification rule,
//! and the static safe zone registry.

pub mod safe_zones;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use safe_zones::SafeZone;

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

impl Position {
    /// Nairobi city centre, used whenever the device position is unknown.
    pub const FALLBACK: Self = Self::new(-1.2921, 36.8219);

    /// Creates a new position.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Straight-line distance over raw latitude/longitude deltas.
    ///
    /// This is a planar approximation in degrees, only meaningful for
    /// comparing nearby points at city scale.
    #[must_use]
    pub fn euclidean_delta(self, other: Self) -> f64 {
        (self.lat - other.lat).hypot(self.lng - other.lng)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lng)
    }
}

/// The kinds of danger a protester can report.
///
/// The string form is the human label stored in the `danger_type` column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum DangerType {
    /// Tear gas deployed
    #[serde(rename = "Tear Gas")]
    #[strum(serialize = "Tear Gas")]
    TearGas,
    /// Police raid under way
    #[serde(rename = "Police Raid")]
    #[strum(serialize = "Police Raid")]
    PoliceRaid,
    /// People being arrested
    #[serde(rename = "Arrests in Progress")]
    #[strum(serialize = "Arrests in Progress")]
    ArrestsInProgress,
    /// Violence or fighting
    #[serde(rename = "Violence/Fighting")]
    #[strum(serialize = "Violence/Fighting")]
    Violence,
    /// Road blocked by police or barricades
    #[serde(rename = "Roadblock")]
    #[strum(serialize = "Roadblock")]
    Roadblock,
    /// Water cannons in use
    #[serde(rename = "Water Cannons")]
    #[strum(serialize = "Water Cannons")]
    WaterCannons,
    /// Rubber bullets fired
    #[serde(rename = "Rubber Bullets")]
    #[strum(serialize = "Rubber Bullets")]
    RubberBullets,
    /// Anything else
    #[serde(rename = "Other")]
    #[strum(serialize = "Other")]
    Other,
}

impl DangerType {
    /// Returns all variants of this enum, in the order they are offered to
    /// the reporter.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::TearGas,
            Self::PoliceRaid,
            Self::ArrestsInProgress,
            Self::Violence,
            Self::Roadblock,
            Self::WaterCannons,
            Self::RubberBullets,
            Self::Other,
        ]
    }

    /// Returns the map layer reports of this type are drawn on.
    #[must_use]
    pub fn layer(self) -> HazardLayer {
        HazardLayer::classify(self.as_ref())
    }
}

/// Which of the two mutually exclusive hazard layers a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HazardLayer {
    /// The generic hazard ("chaos zone") layer.
    Hazard,
    /// The police-block layer.
    PoliceBlock,
}

/// Substrings that route a report onto the police-block layer.
const POLICE_BLOCK_KEYWORDS: &[&str] = &["roadblock", "police", "block"];

impl HazardLayer {
    /// Classifies a free-form danger type string.
    ///
    /// Any type containing "roadblock", "police", or "block"
    /// (case-insensitive) is a police block; everything else is a generic
    /// hazard.
    #[must_use]
    pub fn classify(danger_type: &str) -> Self {
        let lowered = danger_type.to_lowercase();
        if POLICE_BLOCK_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            Self::PoliceBlock
        } else {
            Self::Hazard
        }
    }
}

/// Store-assigned record identifier.
///
/// Hosted tables use either UUID or bigint primary keys, so numeric ids
/// are accepted on input and normalized to their decimal string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two logical tables of the hazard record store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    /// Hazard reports.
    ChaosReports,
    /// Panic alerts.
    PanicAlerts,
}

/// A hazard report as stored in `chaos_reports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardReport {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Latitude.
    pub location_lat: f64,
    /// Longitude.
    pub location_lng: f64,
    /// Danger type label. Kept as a string so rows written by other
    /// clients with labels outside [`DangerType`] still render.
    pub danger_type: String,
    /// Optional free text.
    pub description: Option<String>,
    /// When the store accepted the report.
    pub created_at: DateTime<Utc>,
    /// Set by moderators, never by this client.
    #[serde(default)]
    pub is_verified: bool,
}

impl HazardReport {
    /// Which hazard layer this report is drawn on.
    #[must_use]
    pub fn layer(&self) -> HazardLayer {
        HazardLayer::classify(&self.danger_type)
    }
}

/// A panic alert as stored in `panic_alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicAlert {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Latitude.
    pub location_lat: f64,
    /// Longitude.
    pub location_lng: f64,
    /// Optional note typed by the person in distress.
    pub emergency_note: Option<String>,
    /// When the store accepted the alert.
    pub created_at: DateTime<Utc>,
    /// Only active alerts are fetched and displayed.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

const fn default_true() -> bool {
    true
}

/// Insert payload for `chaos_reports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHazardReport {
    /// Latitude.
    pub location_lat: f64,
    /// Longitude.
    pub location_lng: f64,
    /// Danger type label.
    pub danger_type: String,
    /// Optional free text.
    pub description: Option<String>,
}

impl NewHazardReport {
    /// Builds an insert payload from a pinned position and a danger type.
    #[must_use]
    pub fn new(position: Position, danger_type: DangerType, description: Option<String>) -> Self {
        Self {
            location_lat: position.lat,
            location_lng: position.lng,
            danger_type: danger_type.to_string(),
            description,
        }
    }
}

/// Insert payload for `panic_alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPanicAlert {
    /// Latitude.
    pub location_lat: f64,
    /// Longitude.
    pub location_lng: f64,
    /// Optional note.
    pub emergency_note: Option<String>,
    /// Always `true` on insert.
    pub is_active: bool,
}

impl NewPanicAlert {
    /// Builds an active alert payload.
    #[must_use]
    pub const fn new(position: Position, emergency_note: Option<String>) -> Self {
        Self {
            location_lat: position.lat,
            location_lng: position.lng,
            emergency_note,
            is_active: true,
        }
    }
}

/// A record of either kind, as it comes out of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    /// A `chaos_reports` row.
    Hazard(HazardReport),
    /// A `panic_alerts` row.
    Panic(PanicAlert),
}

impl StoredRecord {
    /// The table this record lives in.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Hazard(_) => Table::ChaosReports,
            Self::Panic(_) => Table::PanicAlerts,
        }
    }

    /// The record's identifier.
    #[must_use]
    pub const fn id(&self) -> &RecordId {
        match self {
            Self::Hazard(r) => &r.id,
            Self::Panic(a) => &a.id,
        }
    }

    /// When the record was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Hazard(r) => r.created_at,
            Self::Panic(a) => a.created_at,
        }
    }
}

/// An insert payload of either kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NewRecord {
    /// A new `chaos_reports` row.
    Hazard(NewHazardReport),
    /// A new `panic_alerts` row.
    Panic(NewPanicAlert),
}

impl NewRecord {
    /// The table this payload is inserted into.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Hazard(_) => Table::ChaosReports,
            Self::Panic(_) => Table::PanicAlerts,
        }
    }
}

/// Common behaviour of the two store-backed record kinds.
pub trait Record: Clone + Send + Sync + 'static {
    /// The table records of this kind live in.
    const TABLE: Table;

    /// Store-assigned identifier.
    fn id(&self) -> &RecordId;

    /// Creation timestamp.
    fn created_at(&self) -> DateTime<Utc>;

    /// Where the record is on the map.
    fn position(&self) -> Position;

    /// Whether the record should be shown at all.
    fn is_displayed(&self) -> bool {
        true
    }

    /// Narrows a [`StoredRecord`] to this kind.
    fn from_stored(record: StoredRecord) -> Option<Self>;
}

impl Record for HazardReport {
    const TABLE: Table = Table::ChaosReports;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn position(&self) -> Position {
        Position::new(self.location_lat, self.location_lng)
    }

    fn from_stored(record: StoredRecord) -> Option<Self> {
        match record {
            StoredRecord::Hazard(r) => Some(r),
            StoredRecord::Panic(_) => None,
        }
    }
}

impl Record for PanicAlert {
    const TABLE: Table = Table::PanicAlerts;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn position(&self) -> Position {
        Position::new(self.location_lat, self.location_lng)
    }

    fn is_displayed(&self) -> bool {
        self.is_active
    }

    fn from_stored(record: StoredRecord) -> Option<Self> {
        match record {
            StoredRecord::Panic(a) => Some(a),
            StoredRecord::Hazard(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn danger_type_labels_roundtrip() {
        for dt in DangerType::all() {
            let label = dt.to_string();
            let parsed: DangerType = label.parse().unwrap();
            assert_eq!(parsed, *dt);
        }
        assert_eq!(DangerType::TearGas.to_string(), "Tear Gas");
        assert_eq!(DangerType::Violence.to_string(), "Violence/Fighting");
    }

    #[test]
    fn danger_type_serializes_as_label() {
        let json = serde_json::to_string(&DangerType::ArrestsInProgress).unwrap();
        assert_eq!(json, "\"Arrests in Progress\"");
    }

    #[test]
    fn police_keywords_classify_case_insensitively() {
        assert_eq!(HazardLayer::classify("Roadblock"), HazardLayer::PoliceBlock);
        assert_eq!(HazardLayer::classify("POLICE RAID"), HazardLayer::PoliceBlock);
        assert_eq!(
            HazardLayer::classify("Heavy police presence"),
            HazardLayer::PoliceBlock
        );
        assert_eq!(HazardLayer::classify("street blocked"), HazardLayer::PoliceBlock);
        assert_eq!(HazardLayer::classify("Tear Gas"), HazardLayer::Hazard);
        assert_eq!(HazardLayer::classify(""), HazardLayer::Hazard);
    }

    #[test]
    fn only_police_and_roadblock_types_are_police_blocks() {
        let police: Vec<DangerType> = DangerType::all()
            .iter()
            .copied()
            .filter(|dt| dt.layer() == HazardLayer::PoliceBlock)
            .collect();
        assert_eq!(police, vec![DangerType::PoliceRaid, DangerType::Roadblock]);
    }

    #[test]
    fn table_names_match_store() {
        assert_eq!(Table::ChaosReports.as_ref(), "chaos_reports");
        assert_eq!(Table::PanicAlerts.to_string(), "panic_alerts");
    }

    #[test]
    fn deserializes_hazard_row_with_defaults() {
        let row = serde_json::json!({
            "id": "7b1c",
            "location_lat": -1.30,
            "location_lng": 36.82,
            "danger_type": "Tear Gas",
            "description": null,
            "created_at": "2026-10-16T09:15:00Z"
        });
        let report: HazardReport = serde_json::from_value(row).unwrap();
        assert_eq!(report.id, RecordId::from("7b1c"));
        assert!(!report.is_verified);
        assert!(report.description.is_none());
        assert_eq!(report.layer(), HazardLayer::Hazard);
    }

    #[test]
    fn numeric_ids_become_strings() {
        let id: RecordId = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(id, RecordId::from("42"));
        let id: RecordId = serde_json::from_value(serde_json::json!("abc")).unwrap();
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn stored_record_narrows_to_kind() {
        let alert = PanicAlert {
            id: RecordId::from("a1"),
            location_lat: -1.29,
            location_lng: 36.82,
            emergency_note: None,
            created_at: Utc::now(),
            is_active: true,
        };
        let stored = StoredRecord::Panic(alert.clone());
        assert_eq!(stored.table(), Table::PanicAlerts);
        assert!(HazardReport::from_stored(stored.clone()).is_none());
        assert_eq!(PanicAlert::from_stored(stored), Some(alert));
    }

    #[test]
    fn inactive_alerts_are_not_displayed() {
        let alert = PanicAlert {
            id: RecordId::from("a2"),
            location_lat: 0.0,
            location_lng: 0.0,
            emergency_note: None,
            created_at: Utc::now(),
            is_active: false,
        };
        assert!(!alert.is_displayed());
    }

    #[test]
    fn euclidean_delta_is_planar() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.euclidean_delta(b) - 5.0).abs() < f64::EPSILON);
    }
}
