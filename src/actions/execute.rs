//! Runs the user's command for a notification
//!
//! The command is the `executeTarget` preference. Notification fields are
//! passed through the environment:
//!
//! | Variable                  | Field             |
//! |---------------------------|-------------------|
//! | `NOTIFICATION_DEVICE_ID`  | device id         |
//! | `NOTIFICATION_ID`         | notification id   |
//! | `NOTIFICATION_TYPE`       | event type        |
//! | `NOTIFICATION_CONTENTS`   | contents          |
//! | `NOTIFICATION_DATA`       | data              |
//! | `NOTIFICATION_SERIALIZED` | raw payload       |

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use super::Action;
use crate::app::preferences::PreferenceStore;
use crate::notify::Notification;

pub struct ExecuteAction {
    preferences: Arc<PreferenceStore>,
}

impl ExecuteAction {
    pub fn new(preferences: Arc<PreferenceStore>) -> Self {
        Self { preferences }
    }
}

#[async_trait]
impl Action for ExecuteAction {
    fn name(&self) -> &str {
        "execute"
    }

    async fn handle(&self, notification: &Notification) -> Result<()> {
        let Some(target) = self.preferences.execute_target() else {
            debug!("No execute target configured");
            return Ok(());
        };

        let status = Command::new(&target)
            .env("NOTIFICATION_DEVICE_ID", &notification.device_id)
            .env("NOTIFICATION_ID", &notification.notification_id)
            .env("NOTIFICATION_TYPE", notification.event_type.as_str())
            .env("NOTIFICATION_CONTENTS", &notification.contents)
            .env("NOTIFICATION_DATA", &notification.data)
            .env("NOTIFICATION_SERIALIZED", &notification.raw)
            .status()
            .await
            .with_context(|| format!("Failed to execute {}", target.display()))?;

        if !status.success() {
            anyhow::bail!("{} exited with {}", target.display(), status);
        }
        Ok(())
    }
}
