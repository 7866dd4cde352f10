//! Panic alert flow.
//!
//! `Idle -> ConfirmPending -> Confirmed -> CapturingLocation -> Dispatching
//! -> Cooldown -> Idle`, with `ConfirmPending -> Idle` on cancel. Pressing
//! the button only asks for confirmation; confirming takes a separate,
//! deliberate gesture.
//!
//! Dispatch records the alert in the store and sends the emergency text
//! over every configured channel at the same time. A failed insert is
//! reported but never holds back the channels.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use protest_map_geolocation::GeolocationProvider;
use protest_map_hazard_models::{NewPanicAlert, NewRecord, Position, StoredRecord};
use protest_map_store::RecordStore;
use serde::Serialize;

use crate::SubmitError;
use crate::dispatch::{DEFAULT_EMERGENCY_PHONE, DispatchChannel, Launcher};
use crate::message::EmergencyMessage;

/// How long the button must be held to confirm.
pub const CONFIRM_HOLD: Duration = Duration::from_secs(2);

/// Word that confirms when typed.
pub const CONFIRM_WORD: &str = "HELP";

/// Default lockout after a dispatch.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Default time the alert insert may take before the dispatch report is
/// returned without it.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(3);

/// Where the panic flow is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PanicState {
    /// Ready.
    Idle,
    /// Pressed; waiting for an explicit confirmation or a cancel.
    ConfirmPending,
    /// Confirmed; ready to dispatch.
    Confirmed,
    /// Waiting for a position fix.
    CapturingLocation,
    /// Sending and recording the alert.
    Dispatching,
    /// Locked out to prevent a double dispatch.
    Cooldown,
}

/// A confirmation gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The button was held down for this long.
    Hold(Duration),
    /// The user typed this text.
    Typed(String),
}

impl Confirmation {
    /// Whether the gesture is deliberate enough to send an alert.
    #[must_use]
    pub fn is_sufficient(&self) -> bool {
        match self {
            Self::Hold(held) => *held >= CONFIRM_HOLD,
            Self::Typed(text) => text.trim().eq_ignore_ascii_case(CONFIRM_WORD),
        }
    }
}

/// Panic flow settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicConfig {
    /// Channels sent to, in order.
    pub channels: Vec<DispatchChannel>,
    /// Number for the phone channel.
    pub emergency_phone: String,
    /// Lockout after a dispatch.
    pub cooldown: Duration,
    /// Upper bound on waiting for the store insert.
    pub record_timeout: Duration,
}

impl Default for PanicConfig {
    fn default() -> Self {
        Self {
            channels: DispatchChannel::all().to_vec(),
            emergency_phone: DEFAULT_EMERGENCY_PHONE.to_string(),
            cooldown: DEFAULT_COOLDOWN,
            record_timeout: DEFAULT_RECORD_TIMEOUT,
        }
    }
}

impl PanicConfig {
    /// Reads `EMERGENCY_PHONE`, `PANIC_COOLDOWN_MS`, and
    /// `PANIC_RECORD_TIMEOUT_MS`, falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            emergency_phone: std::env::var("EMERGENCY_PHONE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.emergency_phone),
            cooldown: std::env::var("PANIC_COOLDOWN_MS")
                .ok()
                .and_then(|ms| ms.parse().ok())
                .map_or(defaults.cooldown, Duration::from_millis),
            record_timeout: std::env::var("PANIC_RECORD_TIMEOUT_MS")
                .ok()
                .and_then(|ms| ms.parse().ok())
                .map_or(defaults.record_timeout, Duration::from_millis),
            channels: defaults.channels,
        }
    }
}

/// What happened on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    /// The channel.
    pub channel: DispatchChannel,
    /// The deep link, if it could be built.
    pub url: Option<String>,
    /// `None` if no launch was attempted, otherwise whether it worked.
    pub launched: Option<bool>,
    /// Failure description.
    pub error: Option<String>,
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// The text that was sent.
    pub message: EmergencyMessage,
    /// Formatted text.
    pub text: String,
    /// One entry per configured channel.
    pub channels: Vec<ChannelOutcome>,
    /// The stored alert, if the insert worked.
    pub recorded: Option<StoredRecord>,
    /// Why the insert failed, if it did.
    pub store_error: Option<String>,
}

impl DispatchReport {
    /// Whether the alert made it into the store.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        self.recorded.is_some()
    }

    /// Whether any channel was opened or linked.
    #[must_use]
    pub fn any_channel_sent(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.url.is_some() && c.launched != Some(false))
    }
}

/// Records a panic alert and sends it over every channel in `config`.
///
/// The insert and the launches run concurrently and independently. The
/// insert is given at most `config.record_timeout`; past that the report
/// comes back unrecorded so a slow store never holds back the links. With
/// no `launcher`, links are only built (the caller opens them).
pub async fn dispatch_alert(
    store: &dyn RecordStore,
    launcher: Option<&dyn Launcher>,
    position: Position,
    note: Option<&str>,
    config: &PanicConfig,
) -> DispatchReport {
    let message = EmergencyMessage::new(position, Utc::now(), note);
    let record = NewRecord::Panic(NewPanicAlert::new(position, message.note.clone()));

    let launches = config.channels.iter().map(|&channel| {
        let message = &message;
        async move {
            let url = match channel.link(message, &config.emergency_phone) {
                Ok(url) => url,
                Err(e) => {
                    log::error!("Could not build {channel} link: {e}");
                    return ChannelOutcome {
                        channel,
                        url: None,
                        launched: None,
                        error: Some(e.to_string()),
                    };
                }
            };
            let (launched, error) = match launcher {
                None => (None, None),
                Some(launcher) => match launcher.launch(&url).await {
                    Ok(()) => (Some(true), None),
                    Err(e) => {
                        log::warn!("Opening {channel} failed: {e}");
                        (Some(false), Some(e.to_string()))
                    }
                },
            };
            ChannelOutcome {
                channel,
                url: Some(url.to_string()),
                launched,
                error,
            }
        }
    });

    let (inserted, channels) = tokio::join!(
        tokio::time::timeout(config.record_timeout, store.insert(record)),
        join_all(launches)
    );

    let (recorded, store_error) = match inserted {
        Ok(Ok(stored)) => {
            log::info!("Recorded panic alert {}", stored.id());
            (Some(stored), None)
        }
        Ok(Err(e)) => {
            log::error!("Failed to record panic alert: {e}");
            (None, Some(format!("Alert sent, but not saved to the map: {e}")))
        }
        Err(_) => {
            log::error!(
                "Recording panic alert took longer than {:?}",
                config.record_timeout
            );
            (
                None,
                Some("Alert sent, but saving it to the map timed out".to_string()),
            )
        }
    };

    DispatchReport {
        text: message.to_string(),
        message,
        channels,
        recorded,
        store_error,
    }
}

/// The panic button.
#[derive(Debug)]
pub struct PanicFlow {
    state: PanicState,
    note: String,
    config: PanicConfig,
    cooldown_until: Option<Instant>,
}

impl PanicFlow {
    /// A flow in the `Idle` state.
    #[must_use]
    pub const fn new(config: PanicConfig) -> Self {
        Self {
            state: PanicState::Idle,
            note: String::new(),
            config,
            cooldown_until: None,
        }
    }

    /// Current state. An expired cooldown reads as `Idle`.
    #[must_use]
    pub fn state(&mut self) -> PanicState {
        self.expire_cooldown();
        self.state
    }

    /// The note as typed.
    #[must_use]
    pub fn note(&self) -> &str {
        &self.note
    }

    /// Sets the optional note.
    pub fn set_note(&mut self, note: impl Into<String>) {
        self.note = note.into();
    }

    /// Presses the button. From `Idle` this asks for confirmation; in any
    /// other state it does nothing. Returns the resulting state.
    pub fn press(&mut self) -> PanicState {
        self.expire_cooldown();
        if self.state == PanicState::Idle {
            self.state = PanicState::ConfirmPending;
        }
        self.state
    }

    /// Backs out of a pending confirmation.
    pub fn cancel(&mut self) {
        if self.state == PanicState::ConfirmPending {
            log::debug!("Panic alert cancelled");
            self.state = PanicState::Idle;
        }
    }

    /// Confirms a pending alert.
    ///
    /// # Errors
    ///
    /// * [`SubmitError::InvalidState`] if nothing is pending.
    /// * [`SubmitError::NotConfirmed`] if the gesture is not deliberate
    ///   enough; the alert stays pending.
    pub fn confirm(&mut self, gesture: &Confirmation) -> Result<(), SubmitError> {
        if self.state != PanicState::ConfirmPending {
            return Err(SubmitError::InvalidState {
                state: format!("{:?}", self.state),
            });
        }
        if !gesture.is_sufficient() {
            return Err(SubmitError::NotConfirmed);
        }
        self.state = PanicState::Confirmed;
        Ok(())
    }

    /// Captures the position, then records and sends the alert. Ends in
    /// `Cooldown`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::InvalidState`] unless the alert was
    /// confirmed. Store and channel failures do not error; they are in the
    /// returned report.
    pub async fn dispatch(
        &mut self,
        geolocation: &GeolocationProvider,
        store: &dyn RecordStore,
        launcher: &dyn Launcher,
    ) -> Result<DispatchReport, SubmitError> {
        if self.state != PanicState::Confirmed {
            return Err(SubmitError::InvalidState {
                state: format!("{:?}", self.state),
            });
        }

        self.state = PanicState::CapturingLocation;
        let fix = geolocation.get_current_position().await;

        self.state = PanicState::Dispatching;
        log::warn!("Dispatching panic alert at {}", fix.position);
        let report = dispatch_alert(
            store,
            Some(launcher),
            fix.position,
            Some(self.note.as_str()),
            &self.config,
        )
        .await;

        self.state = PanicState::Cooldown;
        self.cooldown_until = Some(Instant::now() + self.config.cooldown);
        Ok(report)
    }

    /// Waits out any remaining cooldown.
    pub async fn wait_cooldown(&mut self) {
        if let Some(until) = self.cooldown_until {
            tokio::time::sleep_until(until.into()).await;
        }
        self.expire_cooldown();
    }

    fn expire_cooldown(&mut self) {
        if self.state == PanicState::Cooldown
            && self.cooldown_until.is_some_and(|until| Instant::now() >= until)
        {
            self.state = PanicState::Idle;
            self.cooldown_until = None;
            self.note.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use protest_map_geolocation::{FixedSource, PositionOptions};
    use protest_map_hazard_models::{PanicAlert, Table};
    use protest_map_store::memory::MemoryStore;
    use protest_map_store::{SelectFilter, StoreError, Subscription};
    use reqwest::Url;

    use crate::dispatch::LaunchError;

    #[derive(Default)]
    struct Recording {
        opened: Mutex<Vec<String>>,
        fail_phone: bool,
    }

    #[async_trait]
    impl Launcher for Recording {
        async fn launch(&self, url: &Url) -> Result<(), LaunchError> {
            if self.fail_phone && url.scheme() == "tel" {
                return Err(LaunchError::Unsupported {
                    scheme: "tel".to_string(),
                });
            }
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn geolocation() -> GeolocationProvider {
        GeolocationProvider::new(
            Arc::new(FixedSource(Position::new(-1.29, 36.82))),
            PositionOptions::default(),
        )
    }

    fn config(cooldown: Duration) -> PanicConfig {
        PanicConfig {
            cooldown,
            ..PanicConfig::default()
        }
    }

    fn confirmed(cooldown: Duration) -> PanicFlow {
        let mut flow = PanicFlow::new(config(cooldown));
        flow.press();
        flow.confirm(&Confirmation::Hold(CONFIRM_HOLD)).unwrap();
        flow
    }

    #[test]
    fn second_press_does_not_confirm() {
        let mut flow = PanicFlow::new(PanicConfig::default());
        assert_eq!(flow.press(), PanicState::ConfirmPending);
        assert_eq!(flow.press(), PanicState::ConfirmPending);
    }

    #[test]
    fn quick_tap_or_wrong_word_is_not_confirmation() {
        let mut flow = PanicFlow::new(PanicConfig::default());
        flow.press();
        assert!(matches!(
            flow.confirm(&Confirmation::Hold(Duration::from_millis(300))),
            Err(SubmitError::NotConfirmed)
        ));
        assert!(matches!(
            flow.confirm(&Confirmation::Typed("yes".to_string())),
            Err(SubmitError::NotConfirmed)
        ));
        assert_eq!(flow.state(), PanicState::ConfirmPending);

        flow.confirm(&Confirmation::Typed(" help ".to_string())).unwrap();
        assert_eq!(flow.state(), PanicState::Confirmed);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let mut flow = PanicFlow::new(PanicConfig::default());
        flow.press();
        flow.cancel();
        assert_eq!(flow.state(), PanicState::Idle);
        assert!(flow.confirm(&Confirmation::Hold(CONFIRM_HOLD)).is_err());
    }

    #[tokio::test]
    async fn dispatch_requires_confirmation() {
        let mut flow = PanicFlow::new(PanicConfig::default());
        flow.press();
        let result = flow
            .dispatch(&geolocation(), &MemoryStore::new(), &Recording::default())
            .await;
        assert!(matches!(result, Err(SubmitError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn confirmed_alert_without_note_is_sent_and_recorded() {
        let store = MemoryStore::new();
        let launcher = Recording::default();
        let mut flow = confirmed(Duration::from_secs(3));

        let report = flow.dispatch(&geolocation(), &store, &launcher).await.unwrap();

        assert!(report.text.contains("EMERGENCY ALERT"));
        assert!(report.text.contains("-1.290000, 36.820000"));
        assert!(!report.text.contains("Note:"));
        assert!(report.is_recorded());

        let Some(StoredRecord::Panic(PanicAlert { emergency_note, .. })) = report.recorded else {
            panic!("expected a panic alert row");
        };
        assert_eq!(emergency_note, None);
        assert_eq!(store.len(Table::PanicAlerts), 1);

        let opened = launcher.opened.lock().unwrap();
        assert_eq!(opened.len(), 3);
        assert!(opened[0].starts_with("https://wa.me/?text="));
        assert_eq!(opened[2], "tel:999");
        drop(opened);

        assert_eq!(flow.state(), PanicState::Cooldown);
        assert_eq!(flow.press(), PanicState::Cooldown);
    }

    #[tokio::test]
    async fn store_failure_does_not_block_channels() {
        let store = MemoryStore::new();
        store.set_available(false);
        let launcher = Recording::default();
        let mut flow = confirmed(Duration::from_secs(3));

        let report = flow.dispatch(&geolocation(), &store, &launcher).await.unwrap();

        assert!(!report.is_recorded());
        assert!(report.store_error.is_some());
        assert!(report.any_channel_sent());
        assert_eq!(launcher.opened.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn one_channel_failing_leaves_the_others() {
        let launcher = Recording {
            fail_phone: true,
            ..Recording::default()
        };
        let mut flow = confirmed(Duration::from_secs(3));

        let report = flow
            .dispatch(&geolocation(), &MemoryStore::new(), &launcher)
            .await
            .unwrap();

        let phone = &report.channels[2];
        assert_eq!(phone.channel, DispatchChannel::Phone);
        assert_eq!(phone.launched, Some(false));
        assert_eq!(report.channels[0].launched, Some(true));
        assert_eq!(launcher.opened.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_clears_note_and_returns_to_idle() {
        let mut flow = confirmed(Duration::from_millis(20));
        flow.set_note("by the fountain");

        let report = flow
            .dispatch(&geolocation(), &MemoryStore::new(), &Recording::default())
            .await
            .unwrap();
        assert!(report.text.ends_with("Note: by the fountain"));

        flow.wait_cooldown().await;

        assert_eq!(flow.state(), PanicState::Idle);
        assert_eq!(flow.note(), "");
        assert_eq!(flow.press(), PanicState::ConfirmPending);
    }

    /// A store whose inserts hang for a long time, then fail.
    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        async fn insert(&self, _record: NewRecord) -> Result<StoredRecord, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(StoreError::Status {
                status: 503,
                message: "unavailable".to_string(),
            })
        }

        async fn select_all(
            &self,
            _table: Table,
            _filter: SelectFilter,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError> {
            Err(StoreError::Closed { table })
        }
    }

    #[tokio::test]
    async fn stalled_store_does_not_hold_back_links() {
        let config = PanicConfig {
            record_timeout: Duration::from_millis(50),
            ..PanicConfig::default()
        };
        let started = Instant::now();

        let report = dispatch_alert(&StalledStore, None, Position::FALLBACK, None, &config).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!report.is_recorded());
        assert!(report.store_error.as_ref().unwrap().contains("timed out"));
        assert_eq!(report.channels.len(), 3);
        assert!(report.any_channel_sent());
    }

    #[tokio::test]
    async fn link_only_dispatch_launches_nothing() {
        let report = dispatch_alert(
            &MemoryStore::new(),
            None,
            Position::FALLBACK,
            Some("note"),
            &PanicConfig::default(),
        )
        .await;
        assert!(report.channels.iter().all(|c| c.launched.is_none() && c.url.is_some()));
        assert!(report.any_channel_sent());
    }
}
