//! Workout session orchestration.
//!
//! The controller owns the session index and phase and is the only component
//! that mutates them. It:
//! - consumes host commands, backend media events, and remote lifecycle input
//!   from the bus
//! - loads segments on the active backend and routes its signals through the
//!   end-of-segment detector
//! - sequences rests, completion, manual navigation, and load-failure recovery
//! - hands the current segment over to a remote receiver when one connects

use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::backend::{BackendKind, ElementBackend, MediaHandle, MediaListener, PlaybackBackend};
use crate::config::{sanitize_config, Config};
use crate::detector::{EndOfSegmentDetector, EndSignal, SegmentFinished};
use crate::error::PlaybackError;
use crate::protocol::{
    BackendMessage, ConfigMessage, Message, Recovery, RemoteMessage, SessionMessage,
};
use crate::remote_session::{PlayerState, ReceiverStatus, RemoteEvent, RemoteSessionManager};
use crate::rest_scheduler::{RestEvent, RestScheduler};
use crate::session::{Session, SessionPhase, SessionSnapshot};
use crate::workout::Workout;

/// Backend currently serving `kind`; remote kinds fall back to the element when no manager exists.
fn backend_for<'a>(
    kind: BackendKind,
    element: &'a mut ElementBackend,
    remote: &'a mut Option<RemoteSessionManager>,
) -> &'a mut dyn PlaybackBackend {
    match (kind, remote) {
        (BackendKind::RemoteReceiver, Some(remote)) => remote,
        _ => element,
    }
}

pub struct SessionController {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    config: Config,
    element: ElementBackend,
    remote: Option<RemoteSessionManager>,
    detector: EndOfSegmentDetector,
    rest: RestScheduler,
    session: Option<Session>,
}

impl SessionController {
    pub fn new(
        config: Config,
        element: ElementBackend,
        remote: Option<RemoteSessionManager>,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        let config = sanitize_config(config);
        Self {
            bus_consumer,
            bus_producer,
            detector: EndOfSegmentDetector::new(config.detection.clone()),
            rest: RestScheduler::new(config.playback.rest_tick()),
            config,
            element,
            remote,
            session: None,
        }
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session
            .as_ref()
            .map(|session| session.snapshot(self.detector.is_handled()))
    }

    /// Duplicate end signals dropped since the controller started.
    pub fn duplicates_ignored(&self) -> u64 {
        self.detector.duplicates_ignored()
    }

    fn emit(&self, message: SessionMessage) {
        let _ = self.bus_producer.send(Message::Session(message));
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == phase {
            return;
        }
        debug!("SessionController: {:?} -> {:?}", session.phase, phase);
        session.phase = phase;
        self.emit(SessionMessage::PhaseChanged(phase));
    }

    fn phase(&self) -> Option<SessionPhase> {
        self.session.as_ref().map(|session| session.phase)
    }

    fn preferred_backend_kind(&self) -> BackendKind {
        match self.remote.as_ref() {
            Some(remote) if remote.is_connected() => BackendKind::RemoteReceiver,
            _ => self.element.kind(),
        }
    }

    fn current_backend(&mut self) -> Option<&mut dyn PlaybackBackend> {
        let kind = self.session.as_ref()?.backend;
        Some(backend_for(kind, &mut self.element, &mut self.remote))
    }

    fn is_current(&self, handle: MediaHandle) -> bool {
        let current = self.session.as_ref().and_then(|session| session.handle);
        if current == Some(handle) {
            return true;
        }
        debug!(
            "SessionController: dropping event for stale handle of segment {}",
            handle.position()
        );
        false
    }

    fn start_session(&mut self, workout: Workout, user_token: Option<String>, now: Instant) {
        if let Some(previous) = self.session.as_ref() {
            info!(
                "SessionController: replacing session {} for workout '{}'",
                previous.id,
                previous.workout.id()
            );
            self.teardown_session();
        }
        let session = Session::new(workout, user_token, self.preferred_backend_kind());
        info!(
            "SessionController: session {} started for workout '{}' ({} segments)",
            session.id,
            session.workout.id(),
            session.workout.len()
        );
        self.emit(SessionMessage::RecentlyPlayed {
            user_token: session.user_token.clone(),
            workout_id: session.workout.id().to_string(),
            session_id: session.id.to_string(),
        });
        self.session = Some(session);
        self.go_to(0, now);
    }

    fn teardown_session(&mut self) {
        self.rest.cancel();
        self.detector.cancel();
        if let Some(backend) = self.current_backend() {
            backend.release();
        }
        self.session = None;
    }

    /// Moves to `index`, cancelling everything tied to the previous segment.
    fn go_to(&mut self, index: usize, now: Instant) {
        self.rest.cancel();
        self.detector.cancel();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.index = index;
        session.rest_remaining_s = None;
        self.emit(SessionMessage::IndexChanged(index));
        self.load_current(now, None);
    }

    /// Loads the current index on the preferred backend.
    fn load_current(&mut self, now: Instant, resume_at_s: Option<f64>) {
        let kind = self.preferred_backend_kind();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let index = session.index;
        let Some(segment) = session.workout.segment(index).cloned() else {
            error!("SessionController: index {} is out of range", index);
            return;
        };
        session.backend = kind;
        session.handle = None;
        session.pending_load_error = None;
        session.transition_in_flight = true;
        self.set_phase(SessionPhase::Loading);

        if let (Some(offset), Some(remote)) = (resume_at_s, self.remote.as_mut()) {
            remote.set_resume_offset(offset);
        }
        let backend = backend_for(kind, &mut self.element, &mut self.remote);
        match backend.load(&segment) {
            Ok(handle) => {
                backend.set_listener(MediaListener::new(handle, self.bus_producer.clone()));
                if let Some(session) = self.session.as_mut() {
                    session.handle = Some(handle);
                    session.transition_in_flight = false;
                }
                self.detector.begin(handle, kind, now);
                info!(
                    "SessionController: loading segment {} '{}' on {:?}",
                    index, segment.media.name, kind
                );
                self.emit(SessionMessage::SegmentLoading {
                    index,
                    handle,
                    backend: kind,
                });
            }
            Err(err) => self.surface_load_error(err),
        }
    }

    fn surface_load_error(&mut self, err: PlaybackError) {
        self.detector.cancel();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        warn!(
            "SessionController: segment {} failed to load: {}",
            session.index, err
        );
        let recovery = Recovery {
            can_retry: true,
            can_skip: !session.is_last(),
        };
        session.handle = None;
        session.transition_in_flight = false;
        session.pending_load_error = Some(err.clone());
        self.set_phase(SessionPhase::Loading);
        self.emit(SessionMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
            recovery: Some(recovery),
        });
    }

    fn on_ready(&mut self) {
        if self.phase() != Some(SessionPhase::Loading) {
            return;
        }
        self.set_phase(SessionPhase::Playing);
    }

    fn on_autoplay_blocked(&mut self) {
        if !matches!(
            self.phase(),
            Some(SessionPhase::Loading | SessionPhase::Playing)
        ) {
            return;
        }
        info!("SessionController: autoplay blocked, waiting for user interaction");
        self.set_phase(SessionPhase::AwaitingUserInteraction);
    }

    fn on_load_failed(&mut self, message: String) {
        if !matches!(
            self.phase(),
            Some(SessionPhase::Loading | SessionPhase::Playing)
        ) {
            return;
        }
        if let Some(backend) = self.current_backend() {
            backend.release();
        }
        self.surface_load_error(PlaybackError::Load(message));
    }

    fn on_segment_finished(&mut self, finished: SegmentFinished, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !matches!(session.phase, SessionPhase::Loading | SessionPhase::Playing) {
            debug!(
                "SessionController: finish ignored in phase {:?}",
                session.phase
            );
            return;
        }
        let index = session.index;
        if session.is_last() {
            info!(
                "SessionController: workout complete via {:?}",
                finished.strategy
            );
            self.rest.cancel();
            if let Some(backend) = self.current_backend() {
                backend.release();
            }
            self.set_phase(SessionPhase::Complete);
            self.emit(SessionMessage::Complete);
            return;
        }

        let rest_s = session.workout.rest_after(index);
        if rest_s == 0 {
            self.go_to(index + 1, now);
            return;
        }
        if self.config.playback.pause_during_rest {
            if let Some(backend) = self.current_backend() {
                if let Err(err) = backend.pause() {
                    debug!("SessionController: pause before rest failed: {}", err);
                }
            }
        }
        self.set_phase(SessionPhase::Resting);
        let events = self.rest.start(rest_s, now);
        self.handle_rest_events(events, now);
    }

    fn handle_rest_events(&mut self, events: Vec<RestEvent>, now: Instant) {
        for event in events {
            match event {
                RestEvent::Tick { remaining_s } => {
                    if let Some(session) = self.session.as_mut() {
                        session.rest_remaining_s = Some(remaining_s);
                    }
                    self.emit(SessionMessage::RestTick(remaining_s));
                }
                RestEvent::Complete { period } => {
                    let Some(session) = self.session.as_ref() else {
                        continue;
                    };
                    if session.phase != SessionPhase::Resting {
                        continue;
                    }
                    debug!("SessionController: rest period {} complete", period);
                    let next = session.index + 1;
                    self.go_to(next, now);
                }
            }
        }
    }

    fn navigate(&mut self, forward: bool, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.transition_in_flight
            || !matches!(session.phase, SessionPhase::Playing | SessionPhase::Resting)
        {
            debug!(
                "SessionController: navigation dropped in phase {:?}",
                session.phase
            );
            return;
        }
        let target = if forward {
            if session.is_last() {
                return;
            }
            session.index + 1
        } else {
            if session.index == 0 {
                return;
            }
            session.index - 1
        };
        if let Some(backend) = self.current_backend() {
            backend.release();
        }
        self.go_to(target, now);
    }

    fn skip_rest(&mut self, now: Instant) {
        if self.phase() != Some(SessionPhase::Resting) {
            return;
        }
        if let Some(event) = self.rest.skip() {
            self.handle_rest_events(vec![event], now);
        }
    }

    fn request_manual_play(&mut self) {
        if self.phase() != Some(SessionPhase::AwaitingUserInteraction) {
            return;
        }
        let result = match self.current_backend() {
            Some(backend) => backend.play(),
            None => return,
        };
        match result {
            Ok(()) => self.set_phase(SessionPhase::Playing),
            Err(err) => {
                warn!("SessionController: manual play failed: {}", err);
                let can_skip = self
                    .session
                    .as_ref()
                    .is_some_and(|session| !session.is_last());
                self.emit(SessionMessage::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recovery: Some(Recovery {
                        can_retry: true,
                        can_skip,
                    }),
                });
            }
        }
    }

    fn retry_segment(&mut self, now: Instant) {
        let pending = self
            .session
            .as_ref()
            .is_some_and(|session| session.pending_load_error.is_some());
        if !pending {
            return;
        }
        info!("SessionController: retrying segment");
        self.load_current(now, None);
    }

    fn skip_failed_segment(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(err) = session.pending_load_error.clone() else {
            return;
        };
        if session.is_last() {
            info!("SessionController: last segment cannot be skipped");
            self.emit(SessionMessage::Error {
                kind: err.kind(),
                message: err.to_string(),
                recovery: Some(Recovery {
                    can_retry: true,
                    can_skip: false,
                }),
            });
            return;
        }
        let next = session.index + 1;
        self.go_to(next, now);
    }

    fn seek(&mut self, position_s: f64) {
        if !matches!(
            self.phase(),
            Some(SessionPhase::Playing | SessionPhase::AwaitingUserInteraction)
        ) {
            return;
        }
        let result = match self.current_backend() {
            Some(backend) => backend.seek(position_s),
            None => return,
        };
        match result {
            Ok(()) => self.detector.reset_progress(),
            Err(err) => warn!("SessionController: seek failed: {}", err),
        }
    }

    fn abandon(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        info!("SessionController: session {} abandoned", session.id);
        self.teardown_session();
        self.emit(SessionMessage::Abandoned);
    }

    fn on_receiver_status(&mut self, handle: MediaHandle, status: ReceiverStatus, now: Instant) {
        if let Some(remote) = self.remote.as_mut() {
            remote.record_status(status.clone(), now);
        }
        if status.is_failed() {
            self.on_load_failed("receiver could not play the media".to_string());
            return;
        }
        if status.player_state == PlayerState::Idle {
            if let Some(reason) = status.idle_reason {
                if let Some(finished) = self.detector.observe(handle, EndSignal::ReceiverIdle(reason)) {
                    self.on_segment_finished(finished, now);
                }
            }
            return;
        }
        if status.player_state == PlayerState::Playing {
            self.on_ready();
        }
        let signal = EndSignal::Progress {
            current_s: status.current_time_s,
            duration_s: status.duration_s,
        };
        if let Some(finished) = self.detector.observe(handle, signal) {
            self.on_segment_finished(finished, now);
        }
    }

    fn on_mirroring_changed(&mut self, mirrored: bool, now: Instant) {
        self.element.set_mirroring(mirrored);
        let kind = self.element.kind();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.backend == BackendKind::RemoteReceiver {
            return;
        }
        info!("SessionController: element output switched to {:?}", kind);
        session.backend = kind;
        self.detector.switch_backend(kind, now);
    }

    fn on_remote_event(&mut self, event: RemoteEvent, now: Instant) {
        match event {
            RemoteEvent::Connected { device_name } => {
                info!("SessionController: receiver '{}' connected", device_name);
                if self.config.playback.handoff_on_remote_connect {
                    self.hand_off_to_remote(now);
                }
            }
            RemoteEvent::Reconnected => {
                debug!("SessionController: receiver recovered within grace period");
            }
            RemoteEvent::ConnectFailed(err) => {
                self.emit(SessionMessage::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recovery: None,
                });
            }
            RemoteEvent::Disconnected => self.on_remote_disconnected(),
        }
    }

    /// Moves the live segment onto the receiver without changing the index.
    fn hand_off_to_remote(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.phase.is_terminal()
            || session.backend == BackendKind::RemoteReceiver
            || session.pending_load_error.is_some()
        {
            return;
        }
        let phase = session.phase;
        let resume_at_s = self.element.elapsed_seconds();
        self.element.release();
        self.detector.cancel();
        if phase == SessionPhase::Resting {
            if let Some(session) = self.session.as_mut() {
                session.backend = BackendKind::RemoteReceiver;
                session.handle = None;
            }
            return;
        }
        info!(
            "SessionController: handing segment over to receiver at {:.1}s",
            resume_at_s
        );
        self.load_current(now, Some(resume_at_s));
    }

    fn on_remote_disconnected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase.is_terminal() || session.backend != BackendKind::RemoteReceiver {
            return;
        }
        warn!("SessionController: receiver lost, session disconnected");
        self.rest.cancel();
        self.detector.cancel();
        session.handle = None;
        session.transition_in_flight = false;
        session.rest_remaining_s = None;
        self.set_phase(SessionPhase::Disconnected);
        self.emit(SessionMessage::Disconnected);
    }

    fn connect_remote(&mut self) {
        let result = match self.remote.as_mut() {
            Some(remote) => remote.connect(),
            None => Err(PlaybackError::ReceiverUnavailable),
        };
        if let Err(err) = result {
            warn!("SessionController: remote connect rejected: {}", err);
            self.emit(SessionMessage::Error {
                kind: err.kind(),
                message: err.to_string(),
                recovery: None,
            });
        }
    }

    fn apply_config(&mut self, config: Config) {
        let config = sanitize_config(config);
        self.detector.set_config(config.detection.clone());
        self.rest.set_tick(config.playback.rest_tick());
        if let Some(remote) = self.remote.as_mut() {
            remote.set_config(config.remote.clone());
        }
        self.config = config;
    }

    fn handle_session_message(&mut self, message: SessionMessage, now: Instant) {
        match message {
            SessionMessage::Start {
                workout,
                user_token,
            } => self.start_session(workout, user_token, now),
            SessionMessage::Next => self.navigate(true, now),
            SessionMessage::Previous => self.navigate(false, now),
            SessionMessage::SkipRest => self.skip_rest(now),
            SessionMessage::RequestManualPlay => self.request_manual_play(),
            SessionMessage::RetrySegment => self.retry_segment(now),
            SessionMessage::SkipFailedSegment => self.skip_failed_segment(now),
            SessionMessage::SeekTo(position_s) => self.seek(position_s),
            SessionMessage::Abandon => self.abandon(),
            SessionMessage::IndexChanged(_)
            | SessionMessage::PhaseChanged(_)
            | SessionMessage::RestTick(_)
            | SessionMessage::SegmentLoading { .. }
            | SessionMessage::Complete
            | SessionMessage::Disconnected
            | SessionMessage::Abandoned
            | SessionMessage::Error { .. }
            | SessionMessage::RecentlyPlayed { .. } => {}
        }
    }

    fn handle_backend_message(&mut self, message: BackendMessage, now: Instant) {
        match message {
            BackendMessage::Ready(handle) => {
                if self.is_current(handle) {
                    self.on_ready();
                }
            }
            BackendMessage::AutoplayBlocked(handle) => {
                if self.is_current(handle) {
                    self.on_autoplay_blocked();
                }
            }
            BackendMessage::LoadFailed { handle, message } => {
                if self.is_current(handle) {
                    self.on_load_failed(message);
                }
            }
            BackendMessage::NativeEnded(handle) => {
                if !self.is_current(handle) {
                    return;
                }
                if let Some(finished) = self.detector.observe(handle, EndSignal::NativeEnded) {
                    self.on_segment_finished(finished, now);
                }
            }
            BackendMessage::TimeUpdate {
                handle,
                current_s,
                duration_s,
            } => {
                if !self.is_current(handle) {
                    return;
                }
                let signal = EndSignal::Progress {
                    current_s,
                    duration_s,
                };
                if let Some(finished) = self.detector.observe(handle, signal) {
                    self.on_segment_finished(finished, now);
                }
            }
            BackendMessage::ReceiverStatus { handle, status } => {
                if self.is_current(handle) {
                    self.on_receiver_status(handle, status, now);
                }
            }
            BackendMessage::MirroringChanged(mirrored) => self.on_mirroring_changed(mirrored, now),
        }
    }

    fn handle_remote_message(&mut self, message: RemoteMessage, now: Instant) {
        let event = match message {
            RemoteMessage::Connect => {
                self.connect_remote();
                None
            }
            RemoteMessage::Disconnect => self.remote.as_mut().and_then(|remote| remote.disconnect()),
            RemoteMessage::AvailabilityChanged(devices) => {
                if let Some(remote) = self.remote.as_mut() {
                    remote.availability_changed(devices);
                }
                None
            }
            RemoteMessage::HandshakeSucceeded { device_name } => {
                if let Some(remote) = self.remote.as_mut() {
                    remote.handshake_succeeded(device_name, now);
                }
                None
            }
            RemoteMessage::HandshakeFailed(message) => self
                .remote
                .as_mut()
                .and_then(|remote| remote.handshake_failed(message)),
            RemoteMessage::LivenessChanged { alive } => self
                .remote
                .as_mut()
                .and_then(|remote| remote.liveness_changed(alive, now)),
            RemoteMessage::StateChanged { .. } => None,
        };
        if let Some(event) = event {
            self.on_remote_event(event, now);
        }
    }

    /// Applies one bus message at `now`.
    pub fn handle_message(&mut self, message: Message, now: Instant) {
        match message {
            Message::Session(message) => self.handle_session_message(message, now),
            Message::Backend(message) => self.handle_backend_message(message, now),
            Message::Remote(message) => self.handle_remote_message(message, now),
            Message::Config(ConfigMessage::ConfigChanged(config)) => self.apply_config(config),
        }
    }

    /// Advances every deadline owned by the controller to `now`.
    pub fn poll(&mut self, now: Instant) {
        let rest_events = self.rest.poll(now);
        self.handle_rest_events(rest_events, now);

        let remote_events = self
            .remote
            .as_mut()
            .map(|remote| remote.poll(now))
            .unwrap_or_default();
        for event in remote_events {
            self.on_remote_event(event, now);
        }

        if self.detector.poll_due(now) && !self.finish_from_estimate(now) {
            if let Some(backend) = self.current_backend() {
                backend.request_status();
            }
        }
    }

    /// Checks the receiver's extrapolated position between status reports.
    fn finish_from_estimate(&mut self, now: Instant) -> bool {
        let Some(handle) = self
            .session
            .as_ref()
            .filter(|session| session.backend == BackendKind::RemoteReceiver)
            .and_then(|session| session.handle)
        else {
            return false;
        };
        let Some((current_s, duration_s)) = self
            .remote
            .as_ref()
            .and_then(|remote| remote.estimated_progress(now))
        else {
            return false;
        };
        let signal = EndSignal::Estimated {
            current_s,
            duration_s,
        };
        match self.detector.observe(handle, signal) {
            Some(finished) => {
                self.on_segment_finished(finished, now);
                true
            }
            None => false,
        }
    }

    fn process_pending_bus_messages(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(message) => self.handle_message(message, Instant::now()),
                Err(tokio::sync::broadcast::error::TryRecvError::Empty) => return false,
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("SessionController: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::TryRecvError::Closed) => return true,
            }
        }
    }

    /// Starts the blocking controller loop.
    pub fn run(&mut self) {
        info!("SessionController: started");
        loop {
            if self.process_pending_bus_messages() {
                break;
            }
            self.poll(Instant::now());
            thread::sleep(self.config.playback.idle_loop_sleep());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionController;
    use crate::backend::{BackendKind, ElementBackend, MediaHandle};
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::protocol::{
        BackendMessage, ConfigMessage, Message, Recovery, RemoteMessage, SessionMessage,
    };
    use crate::remote_session::RemoteSessionManager;
    use crate::session::SessionPhase;
    use crate::sim::{
        simulated_device, simulated_element, simulated_receiver, ElementDriver, ReceiverDriver,
    };
    use crate::workout::{MediaRef, Segment, Workout};
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

    fn locator(position: usize) -> String {
        format!("https://media.example/{position}.mp4")
    }

    fn workout(rests: &[u32]) -> Workout {
        let segments = rests
            .iter()
            .enumerate()
            .map(|(position, rest_seconds)| Segment {
                position,
                active_seconds: 30,
                rest_seconds: *rest_seconds,
                media: MediaRef {
                    locator: locator(position),
                    name: format!("Movement {position}"),
                    thumbnail: None,
                },
            })
            .collect();
        Workout::new("workout-1", "Full Body", segments).expect("test workout should be valid")
    }

    /// Drives the controller synchronously with an injected clock.
    struct ControllerHarness {
        controller: SessionController,
        bus_sender: Sender<Message>,
        pump: Receiver<Message>,
        now: Instant,
        element: ElementDriver,
        receiver: Option<ReceiverDriver>,
        notifications: Vec<SessionMessage>,
    }

    impl ControllerHarness {
        fn new() -> Self {
            Self::with_config(Config::default(), false)
        }

        fn with_remote() -> Self {
            Self::with_config(Config::default(), true)
        }

        fn with_config(config: Config, with_remote: bool) -> Self {
            let (bus_sender, _) = broadcast::channel(4096);
            let pump = bus_sender.subscribe();
            let (element, element_driver) = simulated_element();
            let (remote, receiver) = if with_remote {
                let (channel, driver) = simulated_receiver();
                let manager = RemoteSessionManager::new(
                    Box::new(channel),
                    bus_sender.clone(),
                    config.remote.clone(),
                );
                (Some(manager), Some(driver))
            } else {
                (None, None)
            };
            let controller = SessionController::new(
                config,
                ElementBackend::local(Box::new(element)),
                remote,
                bus_sender.subscribe(),
                bus_sender.clone(),
            );
            Self {
                controller,
                bus_sender,
                pump,
                now: Instant::now(),
                element: element_driver,
                receiver,
                notifications: Vec::new(),
            }
        }

        fn settle(&mut self) {
            loop {
                match self.pump.try_recv() {
                    Ok(message) => {
                        if let Message::Session(notification) = &message {
                            self.notifications.push(notification.clone());
                        }
                        self.controller.handle_message(message, self.now);
                    }
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }

        fn send(&mut self, message: Message) {
            self.bus_sender
                .send(message)
                .expect("failed to send message to bus");
            self.settle();
        }

        fn command(&mut self, command: SessionMessage) {
            self.send(Message::Session(command));
        }

        fn start(&mut self, rests: &[u32]) {
            self.command(SessionMessage::Start {
                workout: workout(rests),
                user_token: Some("user-1".to_string()),
            });
        }

        fn tick(&mut self, step: Duration) {
            self.now += step;
            self.controller.poll(self.now);
            self.settle();
        }

        fn advance_element(&mut self, dt_s: f64) {
            self.element.advance(dt_s);
            self.settle();
        }

        /// Readiness, then playback through to the end of a 30s segment.
        fn play_element_segment(&mut self) {
            self.advance_element(0.0);
            self.advance_element(30.0);
        }

        fn receiver(&self) -> &ReceiverDriver {
            self.receiver.as_ref().expect("harness has no receiver")
        }

        fn advance_receiver(&mut self, dt_s: f64) {
            self.receiver().advance(dt_s);
            self.settle();
        }

        fn connect_remote(&mut self) {
            self.send(Message::Remote(RemoteMessage::AvailabilityChanged(vec![
                simulated_device(),
            ])));
            self.send(Message::Remote(RemoteMessage::Connect));
            self.receiver().complete_handshake();
            self.settle();
            self.tick(Duration::from_millis(500));
        }

        fn phase(&self) -> Option<SessionPhase> {
            self.controller.snapshot().map(|snapshot| snapshot.phase)
        }

        fn index_changes(&self) -> Vec<usize> {
            self.notifications
                .iter()
                .filter_map(|message| match message {
                    SessionMessage::IndexChanged(index) => Some(*index),
                    _ => None,
                })
                .collect()
        }

        fn phases(&self) -> Vec<SessionPhase> {
            self.notifications
                .iter()
                .filter_map(|message| match message {
                    SessionMessage::PhaseChanged(phase) => Some(*phase),
                    _ => None,
                })
                .collect()
        }

        fn rest_ticks(&self) -> Vec<u32> {
            self.notifications
                .iter()
                .filter_map(|message| match message {
                    SessionMessage::RestTick(remaining) => Some(*remaining),
                    _ => None,
                })
                .collect()
        }

        fn errors(&self) -> Vec<(ErrorKind, Option<Recovery>)> {
            self.notifications
                .iter()
                .filter_map(|message| match message {
                    SessionMessage::Error { kind, recovery, .. } => Some((*kind, *recovery)),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, predicate: impl Fn(&SessionMessage) -> bool) -> usize {
            self.notifications
                .iter()
                .filter(|message| predicate(message))
                .count()
        }

        fn last_loading(&self) -> (usize, MediaHandle, BackendKind) {
            self.notifications
                .iter()
                .rev()
                .find_map(|message| match message {
                    SessionMessage::SegmentLoading {
                        index,
                        handle,
                        backend,
                    } => Some((*index, *handle, *backend)),
                    _ => None,
                })
                .expect("no segment has been loaded")
        }
    }

    fn wait_for_message<F>(
        receiver: &mut Receiver<Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    #[test]
    fn test_full_workout_with_mixed_rests_completes_once() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 0, 5]);
        assert_eq!(harness.index_changes(), vec![0]);

        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
        assert!(harness.element.pauses() >= 1);

        for _ in 0..10 {
            harness.tick(Duration::from_secs(1));
        }
        assert_eq!(harness.rest_ticks(), (1..=10).rev().collect::<Vec<u32>>());
        assert_eq!(harness.index_changes(), vec![0, 1]);

        harness.play_element_segment();
        assert_eq!(harness.index_changes(), vec![0, 1, 2]);
        assert_eq!(
            harness
                .phases()
                .iter()
                .filter(|phase| **phase == SessionPhase::Resting)
                .count(),
            1
        );

        harness.play_element_segment();
        for _ in 0..10 {
            harness.tick(Duration::from_secs(1));
        }
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
        assert_eq!(harness.index_changes(), vec![0, 1, 2]);
        assert_eq!(
            harness.count(|message| matches!(message, SessionMessage::Complete)),
            1
        );
    }

    #[test]
    fn test_start_reports_recently_played_with_user_token() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0]);
        let recorded = harness.notifications.iter().find_map(|message| match message {
            SessionMessage::RecentlyPlayed {
                user_token,
                workout_id,
                ..
            } => Some((user_token.clone(), workout_id.clone())),
            _ => None,
        });
        assert_eq!(
            recorded,
            Some((Some("user-1".to_string()), "workout-1".to_string()))
        );
    }

    #[test]
    fn test_duplicate_native_end_on_last_segment_completes_once() {
        let mut harness = ControllerHarness::new();
        harness.element.set_duplicate_ended(true);
        harness.start(&[0]);
        harness.play_element_segment();

        assert_eq!(
            harness.count(|message| matches!(message, SessionMessage::Complete)),
            1
        );
        assert_eq!(harness.controller.duplicates_ignored(), 1);
    }

    #[test]
    fn test_zero_rest_never_enters_resting() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0, 0, 0]);
        for _ in 0..3 {
            harness.play_element_segment();
        }
        assert_eq!(harness.index_changes(), vec![0, 1, 2]);
        assert!(!harness.phases().contains(&SessionPhase::Resting));
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
    }

    #[test]
    fn test_last_segment_completes_even_with_trailing_rest() {
        let mut harness = ControllerHarness::new();
        harness.start(&[30]);
        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
        assert!(harness.rest_ticks().is_empty());
    }

    #[test]
    fn test_double_next_advances_once() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0, 0, 0]);
        harness.advance_element(0.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));

        harness
            .bus_sender
            .send(Message::Session(SessionMessage::Next))
            .unwrap();
        harness
            .bus_sender
            .send(Message::Session(SessionMessage::Next))
            .unwrap();
        harness.settle();
        assert_eq!(harness.index_changes(), vec![0, 1]);

        harness.advance_element(0.0);
        harness.command(SessionMessage::Next);
        assert_eq!(harness.index_changes(), vec![0, 1, 2]);
    }

    #[test]
    fn test_next_at_last_and_previous_at_first_are_noops() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0, 0]);
        harness.advance_element(0.0);
        harness.command(SessionMessage::Previous);
        assert_eq!(harness.index_changes(), vec![0]);

        harness.command(SessionMessage::Next);
        harness.advance_element(0.0);
        harness.command(SessionMessage::Next);
        assert_eq!(harness.index_changes(), vec![0, 1]);
    }

    #[test]
    fn test_skip_rest_is_noop_outside_resting() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 0]);
        harness.advance_element(0.0);
        harness.command(SessionMessage::SkipRest);
        assert_eq!(harness.index_changes(), vec![0]);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
    }

    #[test]
    fn test_skip_rest_advances_immediately() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 0]);
        harness.play_element_segment();
        harness.tick(Duration::from_secs(2));
        harness.command(SessionMessage::SkipRest);
        assert_eq!(harness.index_changes(), vec![0, 1]);

        for _ in 0..10 {
            harness.tick(Duration::from_secs(1));
        }
        assert_eq!(harness.index_changes(), vec![0, 1]);
    }

    #[test]
    fn test_navigation_round_trip_starts_fresh_detection() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 10, 0]);
        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
        assert!(harness.controller.snapshot().unwrap().end_handled);

        harness.command(SessionMessage::Next);
        let snapshot = harness.controller.snapshot().unwrap();
        assert_eq!(snapshot.index, 1);
        assert!(!snapshot.end_handled);

        // The cancelled rest must not advance again.
        harness.tick(Duration::from_secs(15));
        assert_eq!(harness.index_changes(), vec![0, 1]);

        harness.advance_element(0.0);
        harness.command(SessionMessage::Previous);
        assert_eq!(harness.index_changes(), vec![0, 1, 0]);

        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
        assert_eq!(
            harness
                .phases()
                .iter()
                .filter(|phase| **phase == SessionPhase::Resting)
                .count(),
            2
        );
    }

    #[test]
    fn test_previous_then_next_from_interior_index_starts_fresh_detection() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0, 10, 0]);
        harness.advance_element(0.0);
        harness.command(SessionMessage::Next);
        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
        assert!(harness.controller.snapshot().unwrap().end_handled);

        harness.command(SessionMessage::Previous);
        harness.advance_element(0.0);
        harness.command(SessionMessage::Next);
        let snapshot = harness.controller.snapshot().unwrap();
        assert_eq!(snapshot.index, 1);
        assert_eq!(snapshot.phase, SessionPhase::Loading);
        assert!(!snapshot.end_handled);

        harness.tick(Duration::from_secs(12));
        assert_eq!(harness.index_changes(), vec![0, 1, 0, 1]);

        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
    }

    #[test]
    fn test_end_before_ready_still_allows_navigation_during_rest() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 0, 0]);
        let (_, handle, _) = harness.last_loading();
        assert_eq!(harness.phase(), Some(SessionPhase::Loading));

        harness.send(Message::Backend(BackendMessage::NativeEnded(handle)));
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));

        harness.command(SessionMessage::Next);
        assert_eq!(harness.index_changes(), vec![0, 1]);
        assert_eq!(harness.phase(), Some(SessionPhase::Loading));
        assert_eq!(harness.element.current_locator(), Some(locator(1)));

        harness.tick(Duration::from_secs(12));
        assert_eq!(harness.index_changes(), vec![0, 1]);
    }

    #[test]
    fn test_stale_handle_events_are_ignored() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0, 0, 0]);
        let (_, first_handle, _) = harness.last_loading();
        harness.advance_element(0.0);
        harness.command(SessionMessage::Next);
        harness.advance_element(0.0);

        harness.send(Message::Backend(BackendMessage::NativeEnded(first_handle)));
        harness.send(Message::Backend(BackendMessage::LoadFailed {
            handle: first_handle,
            message: "late failure".to_string(),
        }));

        assert_eq!(harness.index_changes(), vec![0, 1]);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn test_last_segment_load_failure_offers_retry_only() {
        let mut harness = ControllerHarness::new();
        harness.element.fail_locator(&locator(1));
        harness.start(&[0, 0]);
        harness.play_element_segment();

        let retry_only = Some(Recovery {
            can_retry: true,
            can_skip: false,
        });
        assert_eq!(harness.errors(), vec![(ErrorKind::Load, retry_only)]);
        assert_eq!(harness.phase(), Some(SessionPhase::Loading));

        harness.command(SessionMessage::SkipFailedSegment);
        assert_eq!(harness.errors().len(), 2);
        assert_eq!(harness.errors()[1], (ErrorKind::Load, retry_only));
        assert_eq!(harness.index_changes(), vec![0, 1]);

        harness.element.heal_locator(&locator(1));
        harness.command(SessionMessage::RetrySegment);
        assert_eq!(harness.last_loading().0, 1);
        harness.play_element_segment();
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
    }

    #[test]
    fn test_skip_failed_segment_advances_when_not_last() {
        let mut harness = ControllerHarness::new();
        harness.element.fail_locator(&locator(1));
        harness.start(&[0, 0, 0]);
        harness.play_element_segment();
        assert_eq!(
            harness.errors(),
            vec![(
                ErrorKind::Load,
                Some(Recovery {
                    can_retry: true,
                    can_skip: true
                })
            )]
        );

        harness.command(SessionMessage::SkipFailedSegment);
        assert_eq!(harness.index_changes(), vec![0, 1, 2]);
        assert_eq!(harness.phase(), Some(SessionPhase::Loading));
    }

    #[test]
    fn test_autoplay_block_waits_for_manual_play() {
        let mut harness = ControllerHarness::new();
        harness.element.set_block_autoplay(true);
        harness.start(&[0]);
        harness.advance_element(0.0);
        assert_eq!(
            harness.phase(),
            Some(SessionPhase::AwaitingUserInteraction)
        );

        harness.command(SessionMessage::Next);
        assert_eq!(harness.index_changes(), vec![0]);

        harness.command(SessionMessage::RequestManualPlay);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
        harness.advance_element(30.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
    }

    #[test]
    fn test_mirroring_switch_falls_back_to_polled_detection() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0]);
        harness.advance_element(0.0);
        harness.send(Message::Backend(BackendMessage::MirroringChanged(true)));
        harness.element.set_suppress_ended(true);
        assert_eq!(
            harness.controller.snapshot().unwrap().backend,
            BackendKind::Mirrored
        );

        harness.advance_element(10.0);
        harness.advance_element(10.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
        harness.advance_element(9.5);
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
    }

    #[test]
    fn test_seek_moves_element_position() {
        let mut harness = ControllerHarness::new();
        harness.start(&[0]);
        harness.advance_element(0.0);
        harness.command(SessionMessage::SeekTo(12.0));
        assert!((harness.element.position() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_abandon_tears_session_down() {
        let mut harness = ControllerHarness::new();
        harness.start(&[10, 0]);
        harness.play_element_segment();
        harness.command(SessionMessage::Abandon);

        assert!(harness.controller.snapshot().is_none());
        assert_eq!(
            harness.count(|message| matches!(message, SessionMessage::Abandoned)),
            1
        );
        harness.tick(Duration::from_secs(20));
        assert_eq!(harness.index_changes(), vec![0]);
    }

    #[test]
    fn test_config_change_retunes_rest_tick() {
        let mut harness = ControllerHarness::new();
        let mut config = Config::default();
        config.playback.rest_tick_ms = 500;
        harness.send(Message::Config(ConfigMessage::ConfigChanged(config)));

        harness.start(&[2, 0]);
        harness.play_element_segment();
        harness.tick(Duration::from_millis(500));
        harness.tick(Duration::from_millis(500));
        assert_eq!(harness.index_changes(), vec![0, 1]);
    }

    #[test]
    fn test_remote_connect_without_receiver_reports_unavailable() {
        let mut harness = ControllerHarness::with_remote();
        harness.send(Message::Remote(RemoteMessage::Connect));
        assert_eq!(
            harness.errors(),
            vec![(ErrorKind::ReceiverUnavailable, None)]
        );
    }

    #[test]
    fn test_remote_duplicate_end_signals_advance_once() {
        let mut config = Config::default();
        config.playback.pause_during_rest = false;
        let mut harness = ControllerHarness::with_config(config, true);
        harness.receiver().set_duration(&locator(0), 10.0);
        harness.receiver().set_duplicate_finished(true);
        harness.connect_remote();

        harness.start(&[5, 0]);
        assert_eq!(harness.last_loading().2, BackendKind::RemoteReceiver);
        harness.advance_receiver(0.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));

        // Polled position reaches the end window first.
        harness.advance_receiver(9.5);
        assert_eq!(harness.phase(), Some(SessionPhase::Resting));
        // Then the receiver reports IDLE/FINISHED twice.
        harness.advance_receiver(1.0);
        assert_eq!(harness.controller.duplicates_ignored(), 2);
        assert_eq!(harness.index_changes(), vec![0]);

        for _ in 0..5 {
            harness.tick(Duration::from_secs(1));
        }
        assert_eq!(harness.index_changes(), vec![0, 1]);
    }

    #[test]
    fn test_remote_watchdog_completes_stalled_stream() {
        let mut harness = ControllerHarness::with_remote();
        harness.receiver().set_duration(&locator(0), 60.0);
        harness.receiver().stall_at(Some(55.0));
        harness.connect_remote();
        harness.start(&[0]);

        harness.advance_receiver(0.0);
        harness.advance_receiver(55.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));

        for _ in 0..3 {
            harness.tick(Duration::from_secs(2));
        }
        assert!(harness.receiver().status_requests() >= 3);
        assert_eq!(harness.phase(), Some(SessionPhase::Complete));
    }

    #[test]
    fn test_remote_estimate_finishes_segment_when_status_goes_quiet() {
        let mut harness = ControllerHarness::with_remote();
        harness.connect_remote();
        harness.start(&[0, 0]);
        harness.advance_receiver(0.0);
        harness.advance_receiver(26.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));

        harness.receiver().set_silent(true);
        harness.tick(Duration::from_secs(2));
        assert_eq!(harness.index_changes(), vec![0]);

        harness.tick(Duration::from_secs(2));
        assert_eq!(harness.index_changes(), vec![0, 1]);
        assert_eq!(harness.last_loading().2, BackendKind::RemoteReceiver);
    }

    #[test]
    fn test_remote_handshake_failure_keeps_playing_locally() {
        let mut harness = ControllerHarness::with_remote();
        harness.start(&[0, 0]);
        harness.advance_element(0.0);

        harness
            .receiver()
            .set_fail_handshake(Some("receiver rejected the session"));
        harness.send(Message::Remote(RemoteMessage::AvailabilityChanged(vec![
            simulated_device(),
        ])));
        harness.send(Message::Remote(RemoteMessage::Connect));
        harness.receiver().complete_handshake();
        harness.settle();
        harness.tick(Duration::from_millis(500));

        assert_eq!(harness.errors(), vec![(ErrorKind::Connect, None)]);
        assert!(!harness.receiver().is_connected());
        assert!(harness.receiver().loads().is_empty());
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
        assert_eq!(harness.last_loading().2, BackendKind::Local);
    }

    #[test]
    fn test_remote_liveness_recovered_within_grace_keeps_session() {
        let mut harness = ControllerHarness::with_remote();
        harness.connect_remote();
        harness.start(&[0, 0]);
        harness.advance_receiver(0.0);

        harness.receiver().set_liveness(false);
        harness.settle();
        harness.tick(Duration::from_secs(3));
        harness.receiver().set_liveness(true);
        harness.settle();
        harness.tick(Duration::from_secs(10));

        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
        assert_eq!(
            harness.count(|message| matches!(message, SessionMessage::Disconnected)),
            0
        );
    }

    #[test]
    fn test_remote_grace_expiry_disconnects_session() {
        let mut harness = ControllerHarness::with_remote();
        harness.connect_remote();
        harness.start(&[10, 0]);
        harness.advance_receiver(0.0);

        harness.receiver().set_liveness(false);
        harness.settle();
        harness.tick(Duration::from_secs(5));

        assert_eq!(harness.phase(), Some(SessionPhase::Disconnected));
        assert_eq!(
            harness.count(|message| matches!(message, SessionMessage::Disconnected)),
            1
        );
        harness.tick(Duration::from_secs(20));
        assert_eq!(harness.index_changes(), vec![0]);
    }

    #[test]
    fn test_remote_connect_hands_off_current_segment() {
        let mut harness = ControllerHarness::with_remote();
        harness.start(&[0, 0]);
        harness.advance_element(0.0);
        harness.advance_element(12.0);
        assert_eq!(harness.last_loading().2, BackendKind::Local);

        harness.connect_remote();

        let (index, _, backend) = harness.last_loading();
        assert_eq!(index, 0);
        assert_eq!(backend, BackendKind::RemoteReceiver);
        assert_eq!(harness.index_changes(), vec![0]);
        assert_eq!(harness.receiver().loads(), vec![(locator(0), 12.0)]);
        assert!(!harness.element.is_playing());

        harness.advance_receiver(0.0);
        assert_eq!(harness.phase(), Some(SessionPhase::Playing));
    }

    #[test]
    fn test_run_loop_plays_single_segment_to_completion() {
        let (bus_sender, _) = broadcast::channel(1024);
        let mut receiver = bus_sender.subscribe();
        let (element, driver) = simulated_element();
        let controller_receiver = bus_sender.subscribe();
        let controller_sender = bus_sender.clone();
        thread::spawn(move || {
            let mut controller = SessionController::new(
                Config::default(),
                ElementBackend::local(Box::new(element)),
                None,
                controller_receiver,
                controller_sender,
            );
            controller.run();
        });

        bus_sender
            .send(Message::Session(SessionMessage::Start {
                workout: workout(&[0]),
                user_token: None,
            }))
            .expect("failed to send message to bus");
        wait_for_message(&mut receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Session(SessionMessage::SegmentLoading { index: 0, .. })
            )
        });

        driver.advance(0.0);
        wait_for_message(&mut receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Session(SessionMessage::PhaseChanged(SessionPhase::Playing))
            )
        });
        driver.advance(30.0);
        wait_for_message(&mut receiver, Duration::from_secs(2), |message| {
            matches!(message, Message::Session(SessionMessage::Complete))
        });
    }
}
