#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Best-effort current position.
//!
//! [`GeolocationProvider`] wraps a platform [`LocationSource`] and never
//! fails: permission denial, timeouts, unsupported platforms, and any other
//! error all resolve to [`Position::FALLBACK`]. A single attempt is made per
//! call, bounded by [`PositionOptions::timeout`]. A device fix younger than
//! [`PositionOptions::max_age`] is reused without asking the source again.

pub mod http;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protest_map_hazard_models::Position;
use serde::Serialize;
use thiserror::Error;

/// Errors a [`LocationSource`] can report.
#[derive(Debug, Error)]
pub enum GeolocationError {
    /// The user refused location access.
    #[error("Location permission denied")]
    PermissionDenied,

    /// The platform has no location capability.
    #[error("Geolocation is not supported")]
    Unsupported,

    /// No fix within the allotted time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The position could not be determined.
    #[error("Position unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },
}

/// Options for a position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Upper bound on how long a single attempt may take.
    pub timeout: Duration,
    /// How old a previously obtained fix may be and still be reused.
    pub max_age: Duration,
    /// Ask the source for its most accurate fix.
    pub high_accuracy: bool,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_age: Duration::from_secs(5 * 60),
            high_accuracy: true,
        }
    }
}

/// A platform position source.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Returns the device position.
    ///
    /// # Errors
    ///
    /// Returns [`GeolocationError`] when no position can be determined.
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Position, GeolocationError>;
}

/// A source that always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedSource(pub Position);

#[async_trait]
impl LocationSource for FixedSource {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Position, GeolocationError> {
        Ok(self.0)
    }
}

/// Where a [`PositionFix`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FixOrigin {
    /// Freshly reported by the source.
    Device,
    /// A recent device fix reused within `max_age`.
    Cached,
    /// The fixed fallback coordinate.
    Fallback,
}

/// The result of a position request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    /// The position.
    pub position: Position,
    /// Where it came from.
    pub origin: FixOrigin,
    /// When the position was obtained.
    pub acquired_at: DateTime<Utc>,
}

impl PositionFix {
    /// Whether this is the fallback rather than a real fix.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.origin == FixOrigin::Fallback
    }
}

/// Never-failing current position provider.
pub struct GeolocationProvider {
    source: Option<Arc<dyn LocationSource>>,
    options: PositionOptions,
    fallback: Position,
    last_fix: Mutex<Option<(Instant, PositionFix)>>,
}

impl GeolocationProvider {
    /// Creates a provider over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn LocationSource>, options: PositionOptions) -> Self {
        Self {
            source: Some(source),
            options,
            fallback: Position::FALLBACK,
            last_fix: Mutex::new(None),
        }
    }

    /// A provider for platforms without geolocation; always yields the
    /// fallback.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            source: None,
            options: PositionOptions::default(),
            fallback: Position::FALLBACK,
            last_fix: Mutex::new(None),
        }
    }

    /// Overrides the fallback coordinate.
    #[must_use]
    pub const fn with_fallback(mut self, fallback: Position) -> Self {
        self.fallback = fallback;
        self
    }

    /// The coordinate used when no fix is available.
    #[must_use]
    pub const fn fallback(&self) -> Position {
        self.fallback
    }

    /// Returns the current position, or the fallback on any failure.
    pub async fn get_current_position(&self) -> PositionFix {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let Some(source) = &self.source else {
            log::debug!("Geolocation unsupported, using fallback");
            return self.fallback_fix();
        };

        let attempt =
            tokio::time::timeout(self.options.timeout, source.current_position(&self.options))
                .await
                .unwrap_or(Err(GeolocationError::Timeout(self.options.timeout)));

        match attempt {
            Ok(position) => {
                let fix = PositionFix {
                    position,
                    origin: FixOrigin::Device,
                    acquired_at: Utc::now(),
                };
                *self.last_fix.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((Instant::now(), fix));
                fix
            }
            Err(e) => {
                log::warn!("Geolocation failed ({e}), using fallback {}", self.fallback);
                self.fallback_fix()
            }
        }
    }

    fn cached(&self) -> Option<PositionFix> {
        let guard = self.last_fix.lock().unwrap_or_else(PoisonError::into_inner);
        let (at, fix) = guard.as_ref()?;
        (at.elapsed() <= self.options.max_age).then_some(PositionFix {
            origin: FixOrigin::Cached,
            ..*fix
        })
    }

    fn fallback_fix(&self) -> PositionFix {
        PositionFix {
            position: self.fallback,
            origin: FixOrigin::Fallback,
            acquired_at: Utc::now(),
        }
    }
}
