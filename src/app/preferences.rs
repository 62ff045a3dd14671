//! User preferences
//!
//! A flat key/value store (`wifiMethod`, `sms.display`, ...) backed by a TOML
//! file. Dotted keys are written as tables:
//!
//! ```toml
//! wifiMethod = true
//!
//! [sms]
//! display = true
//! copy = false
//! ```
//!
//! Subscribers get a payload-less change signal and re-read whatever they
//! need.

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const WIFI_METHOD: &str = "wifiMethod";
pub const TCP_METHOD: &str = "tcpMethod";
pub const BLUETOOTH_METHOD: &str = "bluetoothMethod";
pub const START_AT_LOGIN: &str = "startAtLogin";
pub const EXECUTE_TARGET: &str = "executeTarget";
pub const RECEIVE_FROM: &str = "receiveNotificationsFrom";
pub const PAIRED_DEVICES: &str = "pairedDevices";

const EVENT_TYPES: &[&str] = &["ring", "sms", "mms", "battery", "user"];
const ACTIONS: &[&str] = &["display", "mute", "execute", "copy"];

/// A single preference value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl PreferenceValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PreferenceValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PreferenceValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PreferenceValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Parse a command-line value: `true`/`false`, `a,b,c` for lists when
    /// `list` is set, otherwise text
    pub fn parse(value: &str, list: bool) -> Self {
        match value {
            "true" => PreferenceValue::Bool(true),
            "false" => PreferenceValue::Bool(false),
            _ if list => PreferenceValue::List(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            _ => PreferenceValue::Text(value.to_string()),
        }
    }

    fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(b) => Some(PreferenceValue::Bool(*b)),
            toml::Value::String(s) => Some(PreferenceValue::Text(s.clone())),
            toml::Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .map(PreferenceValue::List),
            _ => None,
        }
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            PreferenceValue::Bool(b) => toml::Value::Boolean(*b),
            PreferenceValue::Text(s) => toml::Value::String(s.clone()),
            PreferenceValue::List(l) => {
                toml::Value::Array(l.iter().cloned().map(toml::Value::String).collect())
            }
        }
    }
}

impl fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceValue::Bool(b) => write!(f, "{}", b),
            PreferenceValue::Text(s) => write!(f, "{}", s),
            PreferenceValue::List(l) => write!(f, "{}", l.join(",")),
        }
    }
}

/// Which devices notifications are accepted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveFrom {
    Any,
    PairedOnly,
}

/// Default preference set
pub fn defaults() -> BTreeMap<String, PreferenceValue> {
    let mut values = BTreeMap::new();
    for key in [START_AT_LOGIN, WIFI_METHOD, TCP_METHOD, BLUETOOTH_METHOD] {
        values.insert(key.to_string(), PreferenceValue::Bool(false));
    }
    for event_type in EVENT_TYPES {
        for action in ACTIONS {
            values.insert(
                format!("{}.{}", event_type, action),
                PreferenceValue::Bool(false),
            );
        }
    }
    values.insert(
        RECEIVE_FROM.to_string(),
        PreferenceValue::Text("any".to_string()),
    );
    values.insert(PAIRED_DEVICES.to_string(), PreferenceValue::List(Vec::new()));
    values
}

/// Shared preference store
///
/// Constructed once by the application and handed out as `Arc`.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, PreferenceValue>>,
    changes: watch::Sender<u64>,
}

impl PreferenceStore {
    fn with_values(path: Option<PathBuf>, values: BTreeMap<String, PreferenceValue>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            path,
            values: RwLock::new(values),
            changes,
        }
    }

    /// Store without a backing file, starting from the defaults
    pub fn in_memory() -> Self {
        Self::with_values(None, defaults())
    }

    /// Open the store at `path`, writing the defaults if the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self::with_values(Some(path.clone()), defaults());

        if path.exists() {
            let values = read_file(&path)?;
            store.replace(values);
        } else {
            store.save()?;
            info!("Created default preferences at {}", path.display());
        }
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Receiver that changes whenever the preference set changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn get(&self, key: &str) -> Option<PreferenceValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Boolean value of `key`; `None` if unset or not a boolean
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// True only if `key` holds exactly `true`
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get_bool(key) == Some(true)
    }

    pub fn execute_target(&self) -> Option<PathBuf> {
        self.get(EXECUTE_TARGET)
            .and_then(|v| v.as_text().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn receive_from(&self) -> ReceiveFrom {
        match self.get(RECEIVE_FROM).as_ref().and_then(|v| v.as_text()) {
            Some("these") => ReceiveFrom::PairedOnly,
            _ => ReceiveFrom::Any,
        }
    }

    pub fn paired_devices(&self) -> Vec<String> {
        self.get(PAIRED_DEVICES)
            .and_then(|v| v.as_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }

    /// Copy of the whole preference set
    pub fn snapshot(&self) -> BTreeMap<String, PreferenceValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set a value, signalling subscribers only if it actually changed
    pub fn set(&self, key: impl Into<String>, value: PreferenceValue) {
        let key = key.into();
        let changed = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            if values.get(&key) == Some(&value) {
                false
            } else {
                values.insert(key.clone(), value);
                true
            }
        };
        if changed {
            debug!(key = %key, "Preference changed");
            self.notify_changed();
        }
    }

    pub fn set_bool(&self, key: impl Into<String>, value: bool) {
        self.set(key, PreferenceValue::Bool(value));
    }

    /// Re-read the backing file and signal subscribers
    pub fn load(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let values = read_file(path)?;
        self.replace(values);
        self.notify_changed();
        Ok(())
    }

    /// Write the current set to the backing file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = to_toml_string(&self.snapshot())?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))?;
        Ok(())
    }

    /// Reload whenever the backing file is modified on disk
    ///
    /// The returned watcher must be kept alive for as long as reloading
    /// should happen.
    pub fn watch_file(self: &Arc<Self>) -> Result<Option<RecommendedWatcher>> {
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };

        let store = Arc::downgrade(self);
        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Preference watcher error: {}", e);
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name() == watched.file_name()) {
                return;
            }
            if let Some(store) = store.upgrade() {
                if let Err(e) = store.load() {
                    warn!("Failed to reload preferences: {:#}", e);
                }
            }
        })
        .context("Failed to create preference watcher")?;

        // Watch the directory so editors that replace the file are seen too
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        Ok(Some(watcher))
    }

    fn replace(&self, loaded: BTreeMap<String, PreferenceValue>) {
        let mut values = defaults();
        values.extend(loaded);
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<String, PreferenceValue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read preferences: {}", path.display()))?;
    parse_toml(&content)
}

/// Parse a preference file, flattening tables into dotted keys
pub fn parse_toml(content: &str) -> Result<BTreeMap<String, PreferenceValue>> {
    let table: toml::Table =
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse preferences: {}", e))?;
    let mut values = BTreeMap::new();
    flatten("", &table, &mut values);
    Ok(values)
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, PreferenceValue>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten(&full_key, inner, out),
            other => match PreferenceValue::from_toml(other) {
                Some(v) => {
                    out.insert(full_key, v);
                }
                None => warn!(key = %full_key, "Ignoring preference with unsupported type"),
            },
        }
    }
}

fn to_toml_string(values: &BTreeMap<String, PreferenceValue>) -> Result<String> {
    let mut root = toml::Table::new();
    for (key, value) in values {
        match key.split_once('.') {
            Some((section, name)) => {
                let entry = root
                    .entry(section.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                if let toml::Value::Table(t) = entry {
                    t.insert(name.to_string(), value.to_toml());
                }
            }
            None => {
                root.insert(key.clone(), value.to_toml());
            }
        }
    }
    Ok(toml::to_string_pretty(&root)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_value_display_matches_parse() {
        let list = PreferenceValue::parse("a, b,,c", true);
        assert_eq!(list.to_string(), "a,b,c");
        assert_eq!(PreferenceValue::parse("true", false).to_string(), "true");
        assert_eq!(PreferenceValue::parse("/bin/x", false).to_string(), "/bin/x");
    }

    #[test]
    fn test_defaults() {
        let store = PreferenceStore::in_memory();
        assert_eq!(store.get_bool("sms.display"), Some(false));
        assert_eq!(store.get_bool(WIFI_METHOD), Some(false));
        assert_eq!(store.receive_from(), ReceiveFrom::Any);
        assert!(store.paired_devices().is_empty());
        assert!(store.execute_target().is_none());
        assert!(!store.contains("ping.display"));
        assert!(!store.contains("voicemail.display"));
    }

    #[test]
    fn test_set_signals_only_on_change() {
        let store = PreferenceStore::in_memory();
        let mut rx = store.subscribe();

        store.set_bool("sms.copy", false);
        assert!(!rx.has_changed().unwrap());

        store.set_bool("sms.copy", true);
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        assert!(store.is_enabled("sms.copy"));
    }

    #[test]
    fn test_is_enabled_requires_boolean_true() {
        let store = PreferenceStore::in_memory();
        store.set("sms.display", PreferenceValue::Text("true".to_string()));
        assert!(!store.is_enabled("sms.display"));
        assert!(!store.is_enabled("missing.key"));
    }

    #[test]
    fn test_open_creates_file_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs/preferences.toml");

        let store = PreferenceStore::open(&path).unwrap();
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[sms]"));
        assert!(content.contains("wifiMethod = false"));
        assert_eq!(store.get_bool("ring.mute"), Some(false));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.toml");

        let store = PreferenceStore::open(&path).unwrap();
        store.set_bool("sms.copy", true);
        store.set(RECEIVE_FROM, PreferenceValue::Text("these".to_string()));
        store.set(
            PAIRED_DEVICES,
            PreferenceValue::List(vec!["abc".to_string(), "def".to_string()]),
        );
        store.set(EXECUTE_TARGET, PreferenceValue::Text("/bin/true".to_string()));
        store.save().unwrap();

        let reopened = PreferenceStore::open(&path).unwrap();
        assert!(reopened.is_enabled("sms.copy"));
        assert_eq!(reopened.receive_from(), ReceiveFrom::PairedOnly);
        assert_eq!(reopened.paired_devices(), vec!["abc", "def"]);
        assert_eq!(reopened.execute_target(), Some(PathBuf::from("/bin/true")));
    }

    #[test]
    fn test_parse_dotted_and_quoted_keys() {
        let values = parse_toml(
            r#"
            wifiMethod = true
            "ring.display" = true

            [sms]
            copy = true
            "#,
        )
        .unwrap();
        assert_eq!(values.get("wifiMethod"), Some(&PreferenceValue::Bool(true)));
        assert_eq!(values.get("ring.display"), Some(&PreferenceValue::Bool(true)));
        assert_eq!(values.get("sms.copy"), Some(&PreferenceValue::Bool(true)));
    }

    #[test]
    fn test_load_reloads_and_signals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        let store = PreferenceStore::open(&path).unwrap();
        let rx = store.subscribe();

        std::fs::write(&path, "tcpMethod = true\n").unwrap();
        store.load().unwrap();

        assert!(rx.has_changed().unwrap());
        assert!(store.is_enabled(TCP_METHOD));
        // Keys missing from the file fall back to their defaults
        assert_eq!(store.get_bool("sms.display"), Some(false));
    }

    #[tokio::test]
    async fn test_watch_reloads_edited_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        let store = Arc::new(PreferenceStore::open(&path).unwrap());
        let mut rx = store.subscribe();
        let _watcher = store.watch_file().unwrap().expect("store has a file");

        std::fs::write(&path, "wifiMethod = true\n").unwrap();

        // Earlier writes may still be reported, so wait for the new value
        let reloaded = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !store.is_enabled(WIFI_METHOD) {
                rx.changed().await.unwrap();
            }
        })
        .await;
        assert!(reloaded.is_ok(), "edited file was not reloaded");
        assert!(store.is_enabled(WIFI_METHOD));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        std::fs::write(&path, "wifiMethod = [").unwrap();
        assert!(PreferenceStore::open(&path).is_err());
    }

    #[test]
    fn test_parse_cli_value() {
        assert_eq!(PreferenceValue::parse("true", false), PreferenceValue::Bool(true));
        assert_eq!(
            PreferenceValue::parse("a, b", true),
            PreferenceValue::List(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            PreferenceValue::parse("these", false),
            PreferenceValue::Text("these".to_string())
        );
    }
}
