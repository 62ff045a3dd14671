pub mod config;
pub mod preferences;

pub use config::Config;
pub use preferences::{PreferenceStore, PreferenceValue, ReceiveFrom};
