//! Uniform contract over the playback surfaces a session can drive.
//!
//! Every surface (local element, mirrored element, remote receiver) loads one
//! segment at a time and reports what happens to it through a handle-scoped
//! [`MediaListener`]. Events carry the handle they were produced for, so the
//! controller can discard anything belonging to a segment it already left.

pub mod element;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::Sender;

use crate::error::PlaybackError;
use crate::protocol::{BackendMessage, Message};
use crate::remote_session::ReceiverStatus;
use crate::workout::Segment;

pub use element::{ElementBackend, MediaElement};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Playback surface families. Each one needs its own end-of-segment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Mirrored,
    RemoteReceiver,
}

/// Opaque token identifying one load of one segment.
///
/// Ids are unique for the life of the process, across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct MediaHandle {
    id: u64,
    position: usize,
}

impl MediaHandle {
    pub(crate) fn next(position: usize) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            position,
        }
    }

    /// Segment position this handle was loaded for.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Handle-scoped sink for media events, posted onto the shared bus.
#[derive(Debug, Clone)]
pub struct MediaListener {
    handle: MediaHandle,
    bus_producer: Sender<Message>,
}

impl MediaListener {
    pub fn new(handle: MediaHandle, bus_producer: Sender<Message>) -> Self {
        Self {
            handle,
            bus_producer,
        }
    }

    pub fn handle(&self) -> MediaHandle {
        self.handle
    }

    pub fn ready(&self) {
        self.send(BackendMessage::Ready(self.handle));
    }

    pub fn autoplay_blocked(&self) {
        self.send(BackendMessage::AutoplayBlocked(self.handle));
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(BackendMessage::LoadFailed {
            handle: self.handle,
            message: message.into(),
        });
    }

    /// Native end-of-media signal. May be unreliable depending on the surface.
    pub fn ended(&self) {
        self.send(BackendMessage::NativeEnded(self.handle));
    }

    pub fn time_update(&self, current_s: f64, duration_s: Option<f64>) {
        self.send(BackendMessage::TimeUpdate {
            handle: self.handle,
            current_s,
            duration_s,
        });
    }

    pub fn receiver_status(&self, status: ReceiverStatus) {
        self.send(BackendMessage::ReceiverStatus {
            handle: self.handle,
            status,
        });
    }

    fn send(&self, message: BackendMessage) {
        let _ = self.bus_producer.send(Message::Backend(message));
    }
}

/// Capability contract every playback surface satisfies.
///
/// Mutating operations are dispatched, not awaited: their outcome arrives
/// later through the attached listener.
pub trait PlaybackBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Starts loading `segment` and returns the handle for this load.
    ///
    /// Any listener attached for a previous load is detached first.
    fn load(&mut self, segment: &Segment) -> Result<MediaHandle, PlaybackError>;

    /// Attaches the listener for the current load, replacing any earlier one.
    fn set_listener(&mut self, listener: MediaListener);

    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self) -> Result<(), PlaybackError>;

    fn seek(&mut self, position_s: f64) -> Result<(), PlaybackError>;

    /// Last known playback position; 0 before media is ready.
    fn elapsed_seconds(&self) -> f64;

    /// Media duration once known.
    fn duration_seconds(&self) -> Option<f64>;

    /// Asks the surface to refresh its reported status.
    fn request_status(&mut self) {}

    /// Stops playback and detaches the listener. Safe to call repeatedly.
    fn release(&mut self);
}

/// Rejects locators no surface could ever play.
pub(crate) fn validate_locator(segment: &Segment) -> Result<(), PlaybackError> {
    let locator = segment.media.locator.trim();
    if locator.is_empty() {
        return Err(PlaybackError::Load(format!(
            "segment {} ('{}') has no media locator",
            segment.position, segment.media.name
        )));
    }
    if locator.chars().any(char::is_whitespace) {
        return Err(PlaybackError::Load(format!(
            "segment {} has a malformed media locator '{}'",
            segment.position, locator
        )));
    }
    Ok(())
}
