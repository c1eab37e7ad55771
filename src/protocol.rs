//! Event-bus protocol shared by the controller, backends, and host UI.
//!
//! This module defines all message payloads exchanged between the session
//! controller, playback surfaces, the remote receiver transport, discovery,
//! and the host application.

use crate::backend::{BackendKind, MediaHandle};
use crate::config::Config;
use crate::discovery::ReceiverDevice;
use crate::error::ErrorKind;
use crate::remote_session::{ReceiverStatus, RemoteState};
use crate::session::SessionPhase;
use crate::workout::Workout;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Session(SessionMessage),
    Backend(BackendMessage),
    Remote(RemoteMessage),
    Config(ConfigMessage),
}

/// Recovery choices offered alongside a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Recovery {
    pub can_retry: bool,
    pub can_skip: bool,
}

/// Session commands from the host UI and notifications back to it.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    // Commands
    Start {
        workout: Workout,
        /// Opaque identity used only to attribute the recently-played record.
        user_token: Option<String>,
    },
    Next,
    Previous,
    SkipRest,
    RequestManualPlay,
    RetrySegment,
    SkipFailedSegment,
    SeekTo(f64),
    Abandon,

    // Notifications
    IndexChanged(usize),
    PhaseChanged(SessionPhase),
    RestTick(u32),
    SegmentLoading {
        index: usize,
        handle: MediaHandle,
        backend: BackendKind,
    },
    Complete,
    Disconnected,
    Abandoned,
    Error {
        kind: ErrorKind,
        message: String,
        recovery: Option<Recovery>,
    },
    RecentlyPlayed {
        user_token: Option<String>,
        workout_id: String,
        session_id: String,
    },
}

/// Media events posted by playback surfaces, tagged with the handle they belong to.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    Ready(MediaHandle),
    AutoplayBlocked(MediaHandle),
    LoadFailed {
        handle: MediaHandle,
        message: String,
    },
    NativeEnded(MediaHandle),
    TimeUpdate {
        handle: MediaHandle,
        current_s: f64,
        duration_s: Option<f64>,
    },
    ReceiverStatus {
        handle: MediaHandle,
        status: ReceiverStatus,
    },
    /// The local element started or stopped mirroring to a wireless display.
    MirroringChanged(bool),
}

/// Remote receiver commands, transport callbacks, and state notifications.
#[derive(Debug, Clone)]
pub enum RemoteMessage {
    Connect,
    Disconnect,
    AvailabilityChanged(Vec<ReceiverDevice>),
    HandshakeSucceeded { device_name: String },
    HandshakeFailed(String),
    LivenessChanged { alive: bool },
    StateChanged {
        state: RemoteState,
        device_name: Option<String>,
    },
}

/// Runtime configuration updates.
#[derive(Debug, Clone)]
pub enum ConfigMessage {
    ConfigChanged(Config),
}
