//! Runtime session state owned by the controller.

use uuid::Uuid;

use crate::backend::{BackendKind, MediaHandle};
use crate::error::PlaybackError;
use crate::workout::Workout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Playing,
    AwaitingUserInteraction,
    Resting,
    Complete,
    Disconnected,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Complete | SessionPhase::Disconnected)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub workout: Workout,
    pub user_token: Option<String>,
    pub index: usize,
    pub phase: SessionPhase,
    pub rest_remaining_s: Option<u32>,
    pub backend: BackendKind,
    pub handle: Option<MediaHandle>,
    pub pending_load_error: Option<PlaybackError>,
    /// Set while a load is being dispatched to the backend.
    pub transition_in_flight: bool,
}

impl Session {
    pub fn new(workout: Workout, user_token: Option<String>, backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            workout,
            user_token,
            index: 0,
            phase: SessionPhase::Loading,
            rest_remaining_s: None,
            backend,
            handle: None,
            pending_load_error: None,
            transition_in_flight: false,
        }
    }

    pub fn is_last(&self) -> bool {
        self.workout.is_last(self.index)
    }

    pub fn snapshot(&self, end_handled: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.to_string(),
            workout_id: self.workout.id().to_string(),
            workout_name: self.workout.name().to_string(),
            index: self.index,
            segment_count: self.workout.len(),
            movement_name: self
                .workout
                .segment(self.index)
                .map(|segment| segment.media.name.clone()),
            phase: self.phase,
            rest_remaining_s: self.rest_remaining_s,
            backend: self.backend,
            end_handled,
            pending_error: self
                .pending_load_error
                .as_ref()
                .map(|err| err.to_string()),
        }
    }
}

/// Read-only view of a session for host UIs.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub workout_id: String,
    pub workout_name: String,
    pub index: usize,
    pub segment_count: usize,
    pub movement_name: Option<String>,
    pub phase: SessionPhase,
    pub rest_remaining_s: Option<u32>,
    pub backend: BackendKind,
    pub end_handled: bool,
    pub pending_error: Option<String>,
}
