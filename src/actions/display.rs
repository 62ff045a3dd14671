//! Desktop popup for notifications

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Action, DISPLAY};
use crate::notify::{EventType, Notification};

const APP_NAME: &str = "Android Notifier";
const POPUP_TIMEOUT_MS: i32 = 5000;

/// Shows a desktop notification through the session's notification daemon
pub struct DisplayAction;

impl DisplayAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DisplayAction {
    fn default() -> Self {
        Self::new()
    }
}

/// Popup title for a notification
pub fn title_for(notification: &Notification) -> String {
    match &notification.event_type {
        EventType::Ring => "Phone is ringing".to_string(),
        EventType::Battery => "Phone battery state".to_string(),
        EventType::Sms => "Phone received an SMS".to_string(),
        EventType::Mms => "Phone received an MMS".to_string(),
        EventType::Ping => "Phone sent a ping".to_string(),
        EventType::User => notification.data.clone(),
        EventType::Unknown(raw) => format!("Unknown notification: {}", raw),
    }
}

#[async_trait]
impl Action for DisplayAction {
    fn name(&self) -> &str {
        DISPLAY
    }

    async fn handle(&self, notification: &Notification) -> Result<()> {
        let title = title_for(notification);
        let body = notification.contents.clone();
        debug!(title = %title, "Showing notification");

        tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .appname(APP_NAME)
                .summary(&title)
                .body(&body)
                .timeout(POPUP_TIMEOUT_MS)
                .show()
                .map(|_| ())
        })
        .await
        .context("Display task panicked")?
        .context("Failed to show desktop notification")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::decode;

    #[test]
    fn test_titles() {
        let ring = decode(b"d/1/RING/555-1234").unwrap();
        assert_eq!(title_for(&ring), "Phone is ringing");

        let user = decode(b"v2/d/2/USER/Custom title/body").unwrap();
        assert_eq!(title_for(&user), "Custom title");

        let unknown = decode(b"d/3/VOICEMAIL/x").unwrap();
        assert_eq!(title_for(&unknown), "Unknown notification: VOICEMAIL");
    }

    #[test]
    fn test_name() {
        assert_eq!(DisplayAction::new().name(), "display");
    }
}
