//! Emergency message text.

use chrono::{DateTime, Utc};
use protest_map_hazard_models::Position;
use serde::Serialize;

/// The text relayed through every dispatch channel when a panic alert is
/// confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyMessage {
    /// Where help is needed.
    pub position: Position,
    /// When the alert was raised.
    pub time: DateTime<Utc>,
    /// Optional note from the person in distress.
    pub note: Option<String>,
}

impl EmergencyMessage {
    /// Creates a message. A blank note is dropped.
    #[must_use]
    pub fn new(position: Position, time: DateTime<Utc>, note: Option<&str>) -> Self {
        Self {
            position,
            time,
            note: note
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }
    }

    /// Map link for the position.
    #[must_use]
    pub fn maps_url(&self) -> String {
        format!(
            "https://maps.google.com/?q={:.6},{:.6}",
            self.position.lat, self.position.lng
        )
    }
}

impl std::fmt::Display for EmergencyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "🚨 EMERGENCY ALERT 🚨")?;
        writeln!(f, "I need immediate help!")?;
        writeln!(f, "Location: {}", self.position)?;
        writeln!(f, "Map: {}", self.maps_url())?;
        write!(f, "Time: {}", self.time.format("%Y-%m-%d %H:%M:%S UTC"))?;
        if let Some(note) = &self.note {
            write!(f, "\nNote: {note}")?;
        }
        Ok(())
    }
}
