//! Copies notification contents to the clipboard

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Action;
use crate::notify::Notification;

pub struct CopyAction;

impl CopyAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CopyAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for CopyAction {
    fn name(&self) -> &str {
        "copy"
    }

    async fn handle(&self, notification: &Notification) -> Result<()> {
        let contents = notification.contents.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut clipboard = arboard::Clipboard::new().context("Failed to open clipboard")?;
            clipboard
                .set_text(contents)
                .context("Failed to set clipboard text")?;
            Ok(())
        })
        .await
        .context("Clipboard task panicked")?
    }
}
