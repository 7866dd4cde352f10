//! External dispatch channels.
//!
//! Each channel turns the emergency text into a deep link that an
//! operating system can hand to the right app. Launching is behind the
//! [`Launcher`] trait so that each channel can fail on its own.

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::message::EmergencyMessage;

/// Emergency number dialled when none is configured.
pub const DEFAULT_EMERGENCY_PHONE: &str = "999";

/// Errors launching a deep link.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The link could not be built.
    #[error("Invalid link: {message}")]
    InvalidUrl {
        /// Parser message.
        message: String,
    },

    /// Nothing on this platform handles the link.
    #[error("No handler for {scheme} links")]
    Unsupported {
        /// URL scheme.
        scheme: String,
    },

    /// The handler was found but failed.
    #[error("Launch failed: {message}")]
    Failed {
        /// Description of what went wrong.
        message: String,
    },
}

/// Where an emergency message can be sent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum DispatchChannel {
    /// `WhatsApp` share sheet.
    WhatsApp,
    /// X/Twitter post composer.
    Twitter,
    /// Phone dialer.
    Phone,
}

impl DispatchChannel {
    /// Returns all channels, in the order they are offered.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::WhatsApp, Self::Twitter, Self::Phone]
    }

    /// Deep link for `message` on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::InvalidUrl`] if the phone number does not
    /// form a valid `tel:` URL.
    pub fn link(self, message: &EmergencyMessage, phone: &str) -> Result<Url, LaunchError> {
        let text = message.to_string();
        let parsed = match self {
            Self::WhatsApp => Url::parse_with_params("https://wa.me/", [("text", &text)]),
            Self::Twitter => {
                Url::parse_with_params("https://twitter.com/intent/tweet", [("text", &text)])
            }
            Self::Phone => Url::parse(&format!("tel:{phone}")),
        };
        parsed.map_err(|e| LaunchError::InvalidUrl {
            message: e.to_string(),
        })
    }
}

/// Opens deep links.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Opens `url` in whatever handles its scheme.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] if nothing could open it.
    async fn launch(&self, url: &Url) -> Result<(), LaunchError>;
}

/// Opens links with the desktop's `xdg-open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl Launcher for SystemLauncher {
    async fn launch(&self, url: &Url) -> Result<(), LaunchError> {
        let status = tokio::process::Command::new("xdg-open")
            .arg(url.as_str())
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LaunchError::Unsupported {
                    scheme: url.scheme().to_string(),
                },
                _ => LaunchError::Failed {
                    message: e.to_string(),
                },
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(LaunchError::Failed {
                message: format!("xdg-open exited with {status}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use protest_map_hazard_models::Position;

    fn message() -> EmergencyMessage {
        EmergencyMessage::new(
            Position::new(-1.29, 36.82),
            Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap(),
            None,
        )
    }

    fn text_param(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "text")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn whatsapp_link_carries_the_message() {
        let url = DispatchChannel::WhatsApp.link(&message(), "999").unwrap();
        assert_eq!(url.host_str(), Some("wa.me"));
        assert_eq!(text_param(&url), message().to_string());
    }

    #[test]
    fn twitter_link_targets_the_composer() {
        let url = DispatchChannel::Twitter.link(&message(), "999").unwrap();
        assert!(url.as_str().starts_with("https://twitter.com/intent/tweet?text="));
        assert!(text_param(&url).contains("EMERGENCY ALERT"));
    }

    #[test]
    fn phone_link_dials_the_number() {
        let url = DispatchChannel::Phone.link(&message(), "112").unwrap();
        assert_eq!(url.as_str(), "tel:112");
    }
}
