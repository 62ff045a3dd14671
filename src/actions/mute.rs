//! Mutes the master audio channel

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::Action;
use crate::notify::Notification;

/// Mutes audio by running a mixer command (`amixer -q set Master mute`)
pub struct MuteAction {
    program: String,
    args: Vec<String>,
}

impl MuteAction {
    pub fn new() -> Self {
        Self {
            program: "amixer".to_string(),
            args: ["-q", "set", "Master", "mute"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Use a different mixer command
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for MuteAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for MuteAction {
    fn name(&self) -> &str {
        "mute"
    }

    async fn handle(&self, _notification: &Notification) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.program, stderr.trim());
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::notify::decode;

    #[tokio::test]
    async fn test_failed_command_is_an_error() {
        let action = MuteAction::with_command("false", Vec::new());
        let n = decode(b"d/1/RING/x").unwrap();
        assert!(action.handle(&n).await.is_err());
    }

    #[tokio::test]
    async fn test_successful_command() {
        let action = MuteAction::with_command("true", Vec::new());
        let n = decode(b"d/1/RING/x").unwrap();
        assert!(action.handle(&n).await.is_ok());
    }
}
