//! Remote receiver connection lifecycle and remote playback backend.
//!
//! The manager owns the receiver channel and walks it through
//! `Unavailable -> Available -> Connecting -> Connected -> Disconnected`:
//! - availability is fed from discovery and never implies a session
//! - a successful handshake is held for a short stabilisation delay, during
//!   which liveness drops are absorbed
//! - liveness lost while connected opens a grace window; only its expiry
//!   tears the session down
//!
//! All timing is deadline based and evaluated by [`RemoteSessionManager::poll`].

use std::time::Instant;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::broadcast::Sender;

use crate::backend::{validate_locator, BackendKind, MediaHandle, MediaListener, PlaybackBackend};
use crate::config::RemoteConfig;
use crate::discovery::ReceiverDevice;
use crate::error::PlaybackError;
use crate::protocol::{Message, RemoteMessage};
use crate::workout::{MediaRef, Segment};

/// Receiver-reported player state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    Playing,
    Paused,
    Buffering,
    Idle,
}

impl PlayerState {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "PLAYING" => Some(Self::Playing),
            "PAUSED" => Some(Self::Paused),
            "BUFFERING" | "LOADING" => Some(Self::Buffering),
            "IDLE" => Some(Self::Idle),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
            Self::Buffering => "BUFFERING",
            Self::Idle => "IDLE",
        }
    }
}

/// Why a receiver went idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdleReason {
    Finished,
    Cancelled,
    Interrupted,
    Error,
}

impl IdleReason {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "FINISHED" => Some(Self::Finished),
            "CANCELLED" => Some(Self::Cancelled),
            "INTERRUPTED" => Some(Self::Interrupted),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Finished => "FINISHED",
            Self::Cancelled => "CANCELLED",
            Self::Interrupted => "INTERRUPTED",
            Self::Error => "ERROR",
        }
    }
}

/// Snapshot of one receiver media status report.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReceiverStatus {
    pub player_state: PlayerState,
    pub idle_reason: Option<IdleReason>,
    pub current_time_s: f64,
    pub duration_s: Option<f64>,
}

impl ReceiverStatus {
    /// Parses a `MEDIA_STATUS` payload; other message types yield `None`.
    pub fn from_media_status(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        if value.get("type").and_then(Value::as_str) != Some("MEDIA_STATUS") {
            return None;
        }
        let status = value.get("status")?.as_array()?.first()?;
        let player_state = status
            .get("playerState")
            .and_then(Value::as_str)
            .and_then(PlayerState::from_wire)?;
        Some(Self {
            player_state,
            idle_reason: status
                .get("idleReason")
                .and_then(Value::as_str)
                .and_then(IdleReason::from_wire),
            current_time_s: status
                .get("currentTime")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0),
            duration_s: status
                .get("media")
                .and_then(|media| media.get("duration"))
                .and_then(Value::as_f64)
                .filter(|duration| *duration > 0.0),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.player_state == PlayerState::Idle && self.idle_reason == Some(IdleReason::Finished)
    }

    pub fn is_failed(&self) -> bool {
        self.player_state == PlayerState::Idle && self.idle_reason == Some(IdleReason::Error)
    }
}

/// Connection lifecycle as seen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Unavailable,
    Available,
    Connecting,
    Connected,
    Disconnected,
}

/// Host-provided transport to a remote receiver.
///
/// Connect and load are dispatched; their outcome arrives through the
/// [`ConnectionListener`] and [`MediaListener`] respectively.
pub trait ReceiverChannel: Send {
    fn connect(
        &mut self,
        device: &ReceiverDevice,
        listener: ConnectionListener,
    ) -> Result<(), String>;
    fn disconnect(&mut self);
    fn load_media(&mut self, media: &MediaRef, start_offset_s: f64) -> Result<(), String>;
    fn set_listener(&mut self, listener: Option<MediaListener>);
    fn play(&mut self) -> Result<(), String>;
    fn pause(&mut self) -> Result<(), String>;
    fn seek(&mut self, position_s: f64) -> Result<(), String>;
    fn request_status(&mut self) -> Result<(), String>;
}

/// Sink for transport-level connection callbacks.
#[derive(Debug, Clone)]
pub struct ConnectionListener {
    bus_producer: Sender<Message>,
}

impl ConnectionListener {
    pub fn new(bus_producer: Sender<Message>) -> Self {
        Self { bus_producer }
    }

    pub fn handshake_succeeded(&self, device_name: impl Into<String>) {
        let _ = self
            .bus_producer
            .send(Message::Remote(RemoteMessage::HandshakeSucceeded {
                device_name: device_name.into(),
            }));
    }

    pub fn handshake_failed(&self, message: impl Into<String>) {
        let _ = self
            .bus_producer
            .send(Message::Remote(RemoteMessage::HandshakeFailed(message.into())));
    }

    pub fn liveness_changed(&self, alive: bool) {
        let _ = self
            .bus_producer
            .send(Message::Remote(RemoteMessage::LivenessChanged { alive }));
    }
}

/// Cached view of an established receiver session.
#[derive(Debug, Clone)]
pub struct ReceiverConnection {
    pub device_name: String,
    pub last_status: Option<ReceiverStatus>,
    pub status_at: Option<Instant>,
}

impl ReceiverConnection {
    fn new(device_name: String) -> Self {
        Self {
            device_name,
            last_status: None,
            status_at: None,
        }
    }

    /// Elapsed time extrapolated from the last report while the receiver is playing.
    pub fn estimated_elapsed(&self, now: Instant) -> f64 {
        let (Some(status), Some(status_at)) = (self.last_status.as_ref(), self.status_at) else {
            return 0.0;
        };
        if status.player_state != PlayerState::Playing {
            return status.current_time_s;
        }
        let estimate =
            status.current_time_s + now.saturating_duration_since(status_at).as_secs_f64();
        match status.duration_s {
            Some(duration) => estimate.min(duration),
            None => estimate,
        }
    }
}

/// Lifecycle outcomes the session controller reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Connected { device_name: String },
    ConnectFailed(PlaybackError),
    /// Liveness came back within the grace window.
    Reconnected,
    Disconnected,
}

pub struct RemoteSessionManager {
    channel: Box<dyn ReceiverChannel>,
    bus_producer: Sender<Message>,
    config: RemoteConfig,
    state: RemoteState,
    devices: Vec<ReceiverDevice>,
    pending_device_name: Option<String>,
    connection: Option<ReceiverConnection>,
    stabilize_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
    handle: Option<MediaHandle>,
    resume_offset_s: f64,
}

impl RemoteSessionManager {
    pub fn new(
        channel: Box<dyn ReceiverChannel>,
        bus_producer: Sender<Message>,
        config: RemoteConfig,
    ) -> Self {
        Self {
            channel,
            bus_producer,
            config,
            state: RemoteState::Unavailable,
            devices: Vec::new(),
            pending_device_name: None,
            connection: None,
            stabilize_deadline: None,
            grace_deadline: None,
            handle: None,
            resume_offset_s: 0.0,
        }
    }

    pub fn state(&self) -> RemoteState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == RemoteState::Connected
    }

    pub fn connection(&self) -> Option<&ReceiverConnection> {
        self.connection.as_ref()
    }

    pub fn devices(&self) -> &[ReceiverDevice] {
        &self.devices
    }

    /// Applies new timing; running deadlines are not moved.
    pub fn set_config(&mut self, config: RemoteConfig) {
        self.config = config;
    }

    fn set_state(&mut self, state: RemoteState) {
        if self.state == state {
            return;
        }
        debug!("RemoteSessionManager: {:?} -> {:?}", self.state, state);
        self.state = state;
        let device_name = self
            .connection
            .as_ref()
            .map(|connection| connection.device_name.clone())
            .or_else(|| self.pending_device_name.clone());
        let _ = self
            .bus_producer
            .send(Message::Remote(RemoteMessage::StateChanged {
                state,
                device_name,
            }));
    }

    fn idle_state(&self) -> RemoteState {
        if self.devices.is_empty() {
            RemoteState::Unavailable
        } else {
            RemoteState::Available
        }
    }

    pub fn availability_changed(&mut self, devices: Vec<ReceiverDevice>) {
        debug!(
            "RemoteSessionManager: {} receiver(s) available",
            devices.len()
        );
        self.devices = devices;
        if matches!(
            self.state,
            RemoteState::Unavailable | RemoteState::Available | RemoteState::Disconnected
        ) {
            let next = self.idle_state();
            self.set_state(next);
        }
    }

    /// Starts a connect handshake with the first available receiver.
    pub fn connect(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            RemoteState::Connected => {
                debug!("RemoteSessionManager: connect ignored, already connected");
                return Ok(());
            }
            RemoteState::Connecting => {
                debug!("RemoteSessionManager: connect ignored, handshake in progress");
                return Ok(());
            }
            RemoteState::Unavailable | RemoteState::Available | RemoteState::Disconnected => {}
        }
        let Some(device) = self.devices.first().cloned() else {
            return Err(PlaybackError::ReceiverUnavailable);
        };

        self.pending_device_name = Some(device.name.clone());
        self.set_state(RemoteState::Connecting);
        let listener = ConnectionListener::new(self.bus_producer.clone());
        if let Err(err) = self.channel.connect(&device, listener) {
            warn!("RemoteSessionManager: connect to '{}' failed: {}", device.name, err);
            self.pending_device_name = None;
            let next = self.idle_state();
            self.set_state(next);
            return Err(PlaybackError::Connect(err));
        }
        info!(
            "RemoteSessionManager: connecting to '{}' ({}:{})",
            device.name, device.address, device.port
        );
        Ok(())
    }

    pub fn handshake_succeeded(&mut self, device_name: String, now: Instant) {
        if self.state != RemoteState::Connecting || self.stabilize_deadline.is_some() {
            debug!("RemoteSessionManager: unexpected handshake success ignored");
            return;
        }
        self.pending_device_name = Some(device_name);
        self.stabilize_deadline = Some(now + self.config.connect_stabilization());
    }

    pub fn handshake_failed(&mut self, message: String) -> Option<RemoteEvent> {
        if self.state != RemoteState::Connecting {
            return None;
        }
        warn!("RemoteSessionManager: handshake failed: {}", message);
        self.channel.disconnect();
        self.stabilize_deadline = None;
        self.pending_device_name = None;
        let next = self.idle_state();
        self.set_state(next);
        Some(RemoteEvent::ConnectFailed(PlaybackError::Connect(message)))
    }

    pub fn liveness_changed(&mut self, alive: bool, now: Instant) -> Option<RemoteEvent> {
        match self.state {
            RemoteState::Connecting => {
                if !alive {
                    debug!("RemoteSessionManager: liveness drop absorbed while stabilising");
                }
                None
            }
            RemoteState::Connected if !alive => {
                if self.grace_deadline.is_none() {
                    info!(
                        "RemoteSessionManager: receiver unreachable, waiting {:?} before disconnecting",
                        self.config.reconnect_grace()
                    );
                    self.grace_deadline = Some(now + self.config.reconnect_grace());
                }
                None
            }
            RemoteState::Connected => {
                if self.grace_deadline.take().is_some() {
                    info!("RemoteSessionManager: receiver reachable again");
                    return Some(RemoteEvent::Reconnected);
                }
                None
            }
            _ => None,
        }
    }

    /// User-requested disconnect.
    pub fn disconnect(&mut self) -> Option<RemoteEvent> {
        match self.state {
            RemoteState::Connecting | RemoteState::Connected => {
                info!("RemoteSessionManager: disconnect requested");
                self.teardown();
                Some(RemoteEvent::Disconnected)
            }
            _ => None,
        }
    }

    /// Evaluates the stabilisation and grace deadlines.
    pub fn poll(&mut self, now: Instant) -> Vec<RemoteEvent> {
        let mut events = Vec::new();
        if self.state == RemoteState::Connecting
            && self.stabilize_deadline.is_some_and(|deadline| now >= deadline)
        {
            self.stabilize_deadline = None;
            let device_name = self.pending_device_name.take().unwrap_or_default();
            self.connection = Some(ReceiverConnection::new(device_name.clone()));
            info!("RemoteSessionManager: connected to '{}'", device_name);
            self.set_state(RemoteState::Connected);
            events.push(RemoteEvent::Connected { device_name });
        }
        if self.state == RemoteState::Connected
            && self.grace_deadline.is_some_and(|deadline| now >= deadline)
        {
            warn!("RemoteSessionManager: receiver did not come back, disconnecting");
            self.teardown();
            events.push(RemoteEvent::Disconnected);
        }
        events
    }

    pub fn record_status(&mut self, status: ReceiverStatus, now: Instant) {
        if let Some(connection) = self.connection.as_mut() {
            connection.last_status = Some(status);
            connection.status_at = Some(now);
        }
    }

    /// Extrapolated position and duration of the current media while the receiver plays.
    pub fn estimated_progress(&self, now: Instant) -> Option<(f64, Option<f64>)> {
        let connection = self.connection.as_ref()?;
        let status = connection.last_status.as_ref()?;
        (status.player_state == PlayerState::Playing)
            .then(|| (connection.estimated_elapsed(now), status.duration_s))
    }

    /// Position the next load starts from; consumed by that load.
    pub fn set_resume_offset(&mut self, offset_s: f64) {
        self.resume_offset_s = offset_s.max(0.0);
    }

    fn teardown(&mut self) {
        self.channel.set_listener(None);
        self.channel.disconnect();
        self.connection = None;
        self.handle = None;
        self.pending_device_name = None;
        self.stabilize_deadline = None;
        self.grace_deadline = None;
        self.resume_offset_s = 0.0;
        self.set_state(RemoteState::Disconnected);
    }

    fn transport(&self, action: &str, result: Result<(), String>) -> Result<(), PlaybackError> {
        result.map_err(|err| {
            warn!("RemoteSessionManager: {} command failed: {}", action, err);
            PlaybackError::Load(format!("{} failed: {}", action, err))
        })
    }

    fn ensure_connected(&self) -> Result<(), PlaybackError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PlaybackError::NotConnected)
        }
    }
}

impl PlaybackBackend for RemoteSessionManager {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteReceiver
    }

    fn load(&mut self, segment: &Segment) -> Result<MediaHandle, PlaybackError> {
        self.ensure_connected()?;
        validate_locator(segment)?;
        self.channel.set_listener(None);
        self.handle = None;
        if let Some(connection) = self.connection.as_mut() {
            connection.last_status = None;
            connection.status_at = None;
        }
        let offset = std::mem::take(&mut self.resume_offset_s);
        self.channel
            .load_media(&segment.media, offset)
            .map_err(PlaybackError::Load)?;
        let handle = MediaHandle::next(segment.position);
        self.handle = Some(handle);
        debug!(
            "RemoteSessionManager: loading segment {} ({}) at {:.1}s",
            segment.position, segment.media.name, offset
        );
        Ok(handle)
    }

    fn set_listener(&mut self, listener: MediaListener) {
        self.channel.set_listener(Some(listener));
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        let result = self.channel.play();
        self.transport("play", result)
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        let result = self.channel.pause();
        self.transport("pause", result)
    }

    fn seek(&mut self, position_s: f64) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        let result = self.channel.seek(position_s.max(0.0));
        self.transport("seek", result)?;
        if let Some(connection) = self.connection.as_mut() {
            connection.last_status = None;
            connection.status_at = None;
        }
        Ok(())
    }

    fn elapsed_seconds(&self) -> f64 {
        self.connection
            .as_ref()
            .map(|connection| connection.estimated_elapsed(Instant::now()))
            .unwrap_or(0.0)
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.last_status.as_ref())
            .and_then(|status| status.duration_s)
    }

    fn request_status(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Err(err) = self.channel.request_status() {
            warn!("RemoteSessionManager: status request failed: {}", err);
        }
    }

    fn release(&mut self) {
        self.channel.set_listener(None);
        if self.handle.take().is_some() && self.is_connected() {
            if let Err(err) = self.channel.pause() {
                debug!("RemoteSessionManager: pause on release failed: {}", err);
            }
        }
    }
}
