//! Side effects run for accepted notifications
//!
//! Every action implements [`Action`]. Its name is the second half of the
//! preference key that enables it (`sms.copy` enables `copy` for SMS).

pub mod copy;
pub mod display;
pub mod execute;
pub mod mute;

use anyhow::Result;
use async_trait::async_trait;

use crate::notify::Notification;

pub use copy::CopyAction;
pub use display::DisplayAction;
pub use execute::ExecuteAction;
pub use mute::MuteAction;

/// Name of the display-class action; the only one run for pings
pub const DISPLAY: &str = "display";

/// A registered notification handler
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in preference keys and logs
    fn name(&self) -> &str;

    /// Run the action; errors are logged by the caller and do not stop
    /// other actions
    async fn handle(&self, notification: &Notification) -> Result<()>;
}
