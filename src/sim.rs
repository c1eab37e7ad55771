//! Simulated playback surfaces for headless runs and tests.
//!
//! Each surface is split into the half handed to a backend and a driver half
//! that advances simulated time and injects faults (autoplay rejection, load
//! failures, duplicate end events, stalled remote streams, dropped liveness).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde_json::json;

use crate::backend::{MediaElement, MediaListener};
use crate::discovery::ReceiverDevice;
use crate::remote_session::{
    ConnectionListener, IdleReason, PlayerState, ReceiverChannel, ReceiverStatus,
};
use crate::workout::MediaRef;

const DEFAULT_MEDIA_DURATION_S: f64 = 30.0;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MediaCatalog {
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
}

impl MediaCatalog {
    fn duration_of(&self, locator: &str) -> f64 {
        self.durations
            .get(locator)
            .copied()
            .unwrap_or(DEFAULT_MEDIA_DURATION_S)
    }
}

#[derive(Default)]
struct ElementState {
    catalog: MediaCatalog,
    source: Option<MediaRef>,
    listener: Option<MediaListener>,
    position_s: f64,
    playing: bool,
    ready_sent: bool,
    ended: bool,
    block_autoplay: bool,
    suppress_ended: bool,
    duplicate_ended: bool,
    loads: usize,
    pauses: usize,
}

/// Element half handed to an [`ElementBackend`](crate::backend::ElementBackend).
pub struct SimulatedElement {
    state: Arc<Mutex<ElementState>>,
}

/// Driver half of a [`SimulatedElement`].
#[derive(Clone)]
pub struct ElementDriver {
    state: Arc<Mutex<ElementState>>,
}

pub fn simulated_element() -> (SimulatedElement, ElementDriver) {
    let state = Arc::new(Mutex::new(ElementState::default()));
    (
        SimulatedElement {
            state: state.clone(),
        },
        ElementDriver { state },
    )
}

impl MediaElement for SimulatedElement {
    fn set_source(&mut self, media: &MediaRef) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.catalog.failing.contains(&media.locator) {
            return Err(format!("cannot open '{}'", media.locator));
        }
        state.source = Some(media.clone());
        state.position_s = 0.0;
        state.playing = false;
        state.ready_sent = false;
        state.ended = false;
        state.loads += 1;
        Ok(())
    }

    fn play(&mut self) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.source.is_none() {
            return Err("no source".to_string());
        }
        state.playing = !state.ended;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), String> {
        let mut state = lock(&self.state);
        state.playing = false;
        state.pauses += 1;
        Ok(())
    }

    fn seek(&mut self, position_s: f64) -> Result<(), String> {
        let mut state = lock(&self.state);
        let Some(source) = state.source.as_ref() else {
            return Err("no source".to_string());
        };
        let duration = state.catalog.duration_of(&source.locator);
        state.position_s = position_s.clamp(0.0, duration);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).position_s
    }

    fn duration(&self) -> Option<f64> {
        let state = lock(&self.state);
        let source = state.source.as_ref()?;
        Some(state.catalog.duration_of(&source.locator))
    }

    fn set_listener(&mut self, listener: Option<MediaListener>) {
        lock(&self.state).listener = listener;
    }
}

impl ElementDriver {
    pub fn set_duration(&self, locator: &str, duration_s: f64) {
        lock(&self.state)
            .catalog
            .durations
            .insert(locator.to_string(), duration_s);
    }

    pub fn fail_locator(&self, locator: &str) {
        lock(&self.state)
            .catalog
            .failing
            .insert(locator.to_string());
    }

    pub fn heal_locator(&self, locator: &str) {
        lock(&self.state).catalog.failing.remove(locator);
    }

    pub fn set_block_autoplay(&self, blocked: bool) {
        lock(&self.state).block_autoplay = blocked;
    }

    /// Mirrored displays often never deliver the ended event.
    pub fn set_suppress_ended(&self, suppressed: bool) {
        lock(&self.state).suppress_ended = suppressed;
    }

    pub fn set_duplicate_ended(&self, duplicate: bool) {
        lock(&self.state).duplicate_ended = duplicate;
    }

    /// Advances simulated time by `dt_s`.
    ///
    /// The first step after a load only reports readiness (or autoplay
    /// rejection); later steps move the position and report time updates.
    pub fn advance(&self, dt_s: f64) {
        let mut state = lock(&self.state);
        let Some(listener) = state.listener.clone() else {
            return;
        };
        let Some(source) = state.source.clone() else {
            return;
        };
        if !state.ready_sent {
            state.ready_sent = true;
            if state.block_autoplay {
                listener.autoplay_blocked();
            } else {
                state.playing = true;
                listener.ready();
            }
            return;
        }
        if !state.playing || state.ended {
            return;
        }

        let duration = state.catalog.duration_of(&source.locator);
        state.position_s = (state.position_s + dt_s.max(0.0)).min(duration);
        listener.time_update(state.position_s, Some(duration));
        if state.position_s >= duration {
            state.ended = true;
            state.playing = false;
            if !state.suppress_ended {
                listener.ended();
                if state.duplicate_ended {
                    listener.ended();
                }
            }
        }
    }

    pub fn loads(&self) -> usize {
        lock(&self.state).loads
    }

    pub fn pauses(&self) -> usize {
        lock(&self.state).pauses
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    pub fn position(&self) -> f64 {
        lock(&self.state).position_s
    }

    pub fn current_locator(&self) -> Option<String> {
        lock(&self.state)
            .source
            .as_ref()
            .map(|source| source.locator.clone())
    }
}

#[derive(Default)]
struct ReceiverState {
    catalog: MediaCatalog,
    connection_listener: Option<ConnectionListener>,
    device_name: Option<String>,
    handshake_pending: bool,
    fail_handshake: Option<String>,
    media: Option<MediaRef>,
    listener: Option<MediaListener>,
    player_state: Option<PlayerState>,
    idle_reason: Option<IdleReason>,
    position_s: f64,
    stall_at_s: Option<f64>,
    duplicate_finished: bool,
    silent: bool,
    loads: Vec<(String, f64)>,
    status_requests: usize,
}

impl ReceiverState {
    fn status_payload(&self) -> Option<String> {
        let media = self.media.as_ref()?;
        let player_state = self.player_state?;
        let mut status = json!({
            "playerState": player_state.as_wire(),
            "currentTime": self.position_s,
            "media": { "contentId": media.locator, "duration": self.catalog.duration_of(&media.locator) },
        });
        if let Some(reason) = self.idle_reason {
            status["idleReason"] = json!(reason.as_wire());
        }
        Some(json!({ "type": "MEDIA_STATUS", "status": [status] }).to_string())
    }

    fn publish_status(&self) {
        if self.silent {
            return;
        }
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let Some(status) = self
            .status_payload()
            .as_deref()
            .and_then(ReceiverStatus::from_media_status)
        else {
            return;
        };
        listener.receiver_status(status);
    }
}

/// Receiver half handed to a [`RemoteSessionManager`](crate::remote_session::RemoteSessionManager).
pub struct SimulatedReceiver {
    state: Arc<Mutex<ReceiverState>>,
}

/// Driver half of a [`SimulatedReceiver`].
#[derive(Clone)]
pub struct ReceiverDriver {
    state: Arc<Mutex<ReceiverState>>,
}

pub fn simulated_receiver() -> (SimulatedReceiver, ReceiverDriver) {
    let state = Arc::new(Mutex::new(ReceiverState::default()));
    (
        SimulatedReceiver {
            state: state.clone(),
        },
        ReceiverDriver { state },
    )
}

/// Device record advertised for the simulated receiver.
pub fn simulated_device() -> ReceiverDevice {
    ReceiverDevice {
        id: "sim-receiver".to_string(),
        name: "Simulated Receiver".to_string(),
        model: "Simulator".to_string(),
        host: "localhost".to_string(),
        address: "127.0.0.1".to_string(),
        port: 8009,
        video_out: true,
    }
}

impl ReceiverChannel for SimulatedReceiver {
    fn connect(
        &mut self,
        device: &ReceiverDevice,
        listener: ConnectionListener,
    ) -> Result<(), String> {
        let mut state = lock(&self.state);
        state.connection_listener = Some(listener);
        state.device_name = Some(device.name.clone());
        state.handshake_pending = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.connection_listener = None;
        state.device_name = None;
        state.handshake_pending = false;
        state.media = None;
        state.player_state = None;
    }

    fn load_media(&mut self, media: &MediaRef, start_offset_s: f64) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.device_name.is_none() {
            return Err("receiver session closed".to_string());
        }
        state.loads.push((media.locator.clone(), start_offset_s));
        state.media = Some(media.clone());
        state.position_s = start_offset_s;
        state.idle_reason = None;
        if state.catalog.failing.contains(&media.locator) {
            state.player_state = Some(PlayerState::Idle);
            state.idle_reason = Some(IdleReason::Error);
        } else {
            state.player_state = Some(PlayerState::Buffering);
        }
        Ok(())
    }

    fn set_listener(&mut self, listener: Option<MediaListener>) {
        lock(&self.state).listener = listener;
    }

    fn play(&mut self) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.player_state == Some(PlayerState::Paused) {
            state.player_state = Some(PlayerState::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.player_state == Some(PlayerState::Playing) {
            state.player_state = Some(PlayerState::Paused);
        }
        Ok(())
    }

    fn seek(&mut self, position_s: f64) -> Result<(), String> {
        let mut state = lock(&self.state);
        state.position_s = position_s.max(0.0);
        Ok(())
    }

    fn request_status(&mut self) -> Result<(), String> {
        let mut state = lock(&self.state);
        state.status_requests += 1;
        state.publish_status();
        Ok(())
    }
}

impl ReceiverDriver {
    pub fn set_duration(&self, locator: &str, duration_s: f64) {
        lock(&self.state)
            .catalog
            .durations
            .insert(locator.to_string(), duration_s);
    }

    pub fn fail_locator(&self, locator: &str) {
        lock(&self.state)
            .catalog
            .failing
            .insert(locator.to_string());
    }

    pub fn set_fail_handshake(&self, reason: Option<&str>) {
        lock(&self.state).fail_handshake = reason.map(ToString::to_string);
    }

    /// Freezes reported position at `position_s` without ever finishing.
    pub fn stall_at(&self, position_s: Option<f64>) {
        lock(&self.state).stall_at_s = position_s;
    }

    pub fn set_duplicate_finished(&self, duplicate: bool) {
        lock(&self.state).duplicate_finished = duplicate;
    }

    /// Keeps playing but stops answering with status reports.
    pub fn set_silent(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    /// Answers a pending connect request.
    pub fn complete_handshake(&self) {
        let mut state = lock(&self.state);
        if !state.handshake_pending {
            return;
        }
        state.handshake_pending = false;
        let Some(listener) = state.connection_listener.clone() else {
            return;
        };
        match state.fail_handshake.clone() {
            Some(reason) => {
                state.device_name = None;
                listener.handshake_failed(reason);
            }
            None => {
                let name = state.device_name.clone().unwrap_or_default();
                debug!("SimulatedReceiver: handshake with '{}' complete", name);
                listener.handshake_succeeded(name);
            }
        }
    }

    pub fn set_liveness(&self, alive: bool) {
        if let Some(listener) = lock(&self.state).connection_listener.as_ref() {
            listener.liveness_changed(alive);
        }
    }

    /// Advances simulated receiver time and publishes a status report.
    pub fn advance(&self, dt_s: f64) {
        let mut state = lock(&self.state);
        let Some(media) = state.media.clone() else {
            return;
        };
        match state.player_state {
            Some(PlayerState::Buffering) => {
                state.player_state = Some(PlayerState::Playing);
            }
            Some(PlayerState::Playing) => {
                let duration = state.catalog.duration_of(&media.locator);
                let mut position = (state.position_s + dt_s.max(0.0)).min(duration);
                if let Some(stall) = state.stall_at_s {
                    position = position.min(stall);
                }
                state.position_s = position;
                if position >= duration {
                    state.player_state = Some(PlayerState::Idle);
                    state.idle_reason = Some(IdleReason::Finished);
                    if state.duplicate_finished {
                        state.publish_status();
                    }
                }
            }
            Some(PlayerState::Paused) | Some(PlayerState::Idle) | None => {}
        }
        state.publish_status();
    }

    pub fn loads(&self) -> Vec<(String, f64)> {
        lock(&self.state).loads.clone()
    }

    pub fn status_requests(&self) -> usize {
        lock(&self.state).status_requests
    }

    pub fn player_state(&self) -> Option<PlayerState> {
        lock(&self.state).player_state
    }

    pub fn is_connected(&self) -> bool {
        let state = lock(&self.state);
        state.device_name.is_some() && !state.handshake_pending
    }
}
