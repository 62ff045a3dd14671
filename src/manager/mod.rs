//! Notification dispatch
//!
//! The manager owns every listener and action. Listeners push raw payloads
//! into a single queue; the manager drains it on its own task, so decoding,
//! duplicate suppression and action dispatch happen one payload at a time.
//! Preference changes are handled on the same task by starting or stopping
//! listeners to match their enabling preference.

pub mod dedup;

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::actions::{Action, DISPLAY};
use crate::app::preferences::{PreferenceStore, ReceiveFrom};
use crate::listener::{Listener, ListenerError, PayloadSink, RawPayload};
use crate::notify::{decode, DecodeError, EventType, Notification};

pub use dedup::{RecentIds, DEFAULT_WINDOW};

const PAYLOAD_QUEUE_SIZE: usize = 100;

/// Lifecycle of a managed listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to start listeners: {}", describe_failures(.0))]
    ListenersFailed(Vec<ListenerError>),
}

fn describe_failures(failures: &[ListenerError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// What happened to one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payload could not be decoded
    Rejected(DecodeError),
    /// Notification id was seen recently
    Duplicate,
    /// Sender is not in the paired device list
    UnpairedDevice,
    /// Actions were run; names of those that ran and those that failed
    Dispatched {
        fired: Vec<String>,
        failed: Vec<String>,
    },
}

struct ListenerSlot {
    listener: Box<dyn Listener>,
    preference_key: String,
    state: ListenerState,
}

impl ListenerSlot {
    async fn start(&mut self, sink: &PayloadSink) -> Result<(), ListenerError> {
        if self.state == ListenerState::Running {
            return Ok(());
        }

        self.state = ListenerState::Starting;
        match self.listener.start(sink.clone()).await {
            Ok(()) => {
                self.state = ListenerState::Running;
                Ok(())
            }
            Err(e) => {
                error!(listener = %self.listener.name(), error = %e, "Listener failed to start");
                self.state = ListenerState::Stopped;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        if self.state == ListenerState::Stopped {
            return;
        }

        self.state = ListenerState::Stopping;
        self.listener.stop().await;
        self.state = ListenerState::Stopped;
    }
}

/// Routes notifications from listeners to actions
pub struct DispatchManager {
    preferences: Arc<PreferenceStore>,
    listeners: Vec<ListenerSlot>,
    actions: Vec<Arc<dyn Action>>,
    recent: RecentIds,
    payload_tx: PayloadSink,
    payload_rx: mpsc::Receiver<RawPayload>,
    changes: watch::Receiver<u64>,
}

impl DispatchManager {
    pub fn new(preferences: Arc<PreferenceStore>) -> Self {
        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_QUEUE_SIZE);
        // Subscribed here so changes made before `run` are not missed
        let changes = preferences.subscribe();
        Self {
            changes,
            preferences,
            listeners: Vec::new(),
            actions: Vec::new(),
            recent: RecentIds::default(),
            payload_tx,
            payload_rx,
        }
    }

    /// Number of notification ids remembered for duplicate suppression
    pub fn with_dedup_window(mut self, size: usize) -> Self {
        self.recent = RecentIds::new(size);
        self
    }

    /// Register a listener enabled by the boolean preference `preference_key`
    pub fn add_listener(&mut self, listener: Box<dyn Listener>, preference_key: impl Into<String>) {
        let preference_key = preference_key.into();
        info!(listener = listener.name(), preference = %preference_key, "Registering listener");
        self.listeners.push(ListenerSlot {
            listener,
            preference_key,
            state: ListenerState::Stopped,
        });
    }

    /// Register an action; actions run in registration order
    pub fn add_action(&mut self, action: Arc<dyn Action>) {
        info!(action = action.name(), "Registering action");
        self.actions.push(action);
    }

    pub fn listener_state(&self, name: &str) -> Option<ListenerState> {
        self.listeners
            .iter()
            .find(|slot| slot.listener.name() == name)
            .map(|slot| slot.state)
    }

    pub fn recent_ids(&self) -> &RecentIds {
        &self.recent
    }

    /// Sender feeding the manager's payload queue
    pub fn payload_sink(&self) -> PayloadSink {
        self.payload_tx.clone()
    }

    /// Start every listener whose preference is enabled
    ///
    /// All listeners are attempted; the ones that fail to bind are reported
    /// together while the others keep running.
    pub async fn start(&mut self) -> Result<(), ManagerError> {
        let mut failures = Vec::new();
        for slot in &mut self.listeners {
            if !self.preferences.is_enabled(&slot.preference_key) {
                continue;
            }
            if let Err(e) = slot.start(&self.payload_tx).await {
                failures.push(e);
            }
        }
        into_result(failures)
    }

    /// Stop every listener regardless of preferences
    pub async fn stop(&mut self) {
        for slot in &mut self.listeners {
            slot.stop().await;
        }
    }

    /// Bring listeners in line with the current preferences
    ///
    /// Listeners already in their desired state are left alone.
    pub async fn reconcile(&mut self) -> Result<(), ManagerError> {
        let mut failures = Vec::new();
        for slot in &mut self.listeners {
            let enabled = self.preferences.is_enabled(&slot.preference_key);
            let started = slot.state == ListenerState::Running;

            if enabled && !started {
                if let Err(e) = slot.start(&self.payload_tx).await {
                    failures.push(e);
                }
            } else if !enabled && started {
                slot.stop().await;
            }
        }
        into_result(failures)
    }

    /// Decode, filter and dispatch one payload
    pub async fn handle_payload(&mut self, payload: &RawPayload) -> DispatchOutcome {
        let notification = match decode(&payload.bytes) {
            Ok(n) => n,
            Err(e) => {
                debug!(listener = %payload.listener, error = %e, "Discarding undecodable payload");
                return DispatchOutcome::Rejected(e);
            }
        };

        if !self.is_device_accepted(&notification) {
            debug!(
                device_id = %notification.device_id,
                "Discarding notification from unpaired device"
            );
            return DispatchOutcome::UnpairedDevice;
        }

        if !self.recent.insert(&notification.notification_id) {
            debug!(
                notification_id = %notification.notification_id,
                "Discarding duplicate notification"
            );
            return DispatchOutcome::Duplicate;
        }

        info!(
            listener = %payload.listener,
            device_id = %notification.device_id,
            notification_id = %notification.notification_id,
            event_type = %notification.event_type,
            "Notification received"
        );
        self.dispatch(&notification).await
    }

    /// Run every enabled action for `notification`
    pub async fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        let mut fired = Vec::new();
        let mut failed = Vec::new();

        for action in &self.actions {
            if !self.is_action_enabled(action.as_ref(), notification) {
                continue;
            }

            let name = action.name().to_string();
            match action.handle(notification).await {
                Ok(()) => debug!(action = %name, "Action completed"),
                Err(e) => {
                    warn!(action = %name, error = %format!("{:#}", e), "Action failed");
                    failed.push(name.clone());
                }
            }
            fired.push(name);
        }

        DispatchOutcome::Dispatched { fired, failed }
    }

    fn is_action_enabled(&self, action: &dyn Action, notification: &Notification) -> bool {
        // Pings only test connectivity and have no preferences of their own
        if notification.event_type == EventType::Ping {
            return action.name() == DISPLAY;
        }

        let key = format!(
            "{}.{}",
            notification.event_type.preference_prefix(),
            action.name()
        );
        if notification.event_type.is_unknown() && !self.preferences.contains(&key) {
            return action.name() == DISPLAY;
        }
        self.preferences.is_enabled(&key)
    }

    fn is_device_accepted(&self, notification: &Notification) -> bool {
        // Pings always pass so a new device can be identified and paired
        if notification.event_type == EventType::Ping {
            return true;
        }
        match self.preferences.receive_from() {
            ReceiveFrom::Any => true,
            ReceiveFrom::PairedOnly => self
                .preferences
                .paired_devices()
                .iter()
                .any(|d| d == &notification.device_id),
        }
    }

    /// Process payloads and preference changes until `shutdown` resolves,
    /// then stop all listeners
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                res = self.changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                    debug!("Preferences changed, reconciling listeners");
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "Some listeners could not be started");
                    }
                }
                payload = self.payload_rx.recv() => {
                    let Some(payload) = payload else { break };
                    self.handle_payload(&payload).await;
                }
            }
        }

        self.stop().await;
    }
}

fn into_result(failures: Vec<ListenerError>) -> Result<(), ManagerError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ManagerError::ListenersFailed(failures))
    }
}
