//! Workout and segment model loaded into a playback session.
//!
//! A workout is resolved by the data-fetching collaborator and handed over
//! fully formed; once a session starts it is treated as read-only.

use crate::error::PlaybackError;

/// Playable media attached to a segment.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaRef {
    /// Opaque locator understood by the playback backends (usually a URL).
    pub locator: String,
    /// Human-readable movement name.
    pub name: String,
    #[serde(default)]
    /// Optional thumbnail locator shown on remote receivers.
    pub thumbnail: Option<String>,
}

/// One movement occurrence within a workout.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Segment {
    /// 0-based sequence position, dense within the workout.
    pub position: usize,
    /// Nominal active duration. Informational only; video segments end on signal.
    #[serde(default)]
    pub active_seconds: u32,
    /// Rest to observe after this segment.
    #[serde(default)]
    pub rest_seconds: u32,
    pub media: MediaRef,
}

#[derive(Debug, serde::Deserialize)]
struct WorkoutDocument {
    id: String,
    #[serde(default)]
    name: String,
    segments: Vec<Segment>,
}

/// Ordered, validated sequence of segments.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Workout {
    id: String,
    name: String,
    segments: Vec<Segment>,
}

impl Workout {
    /// Builds a workout, ordering segments by position.
    ///
    /// Fails when the workout is empty or positions are not exactly `0..N-1`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut segments: Vec<Segment>,
    ) -> Result<Self, PlaybackError> {
        if segments.is_empty() {
            return Err(PlaybackError::InvalidWorkout(
                "workout has no segments".to_string(),
            ));
        }
        segments.sort_by_key(|segment| segment.position);
        for (expected, segment) in segments.iter().enumerate() {
            if segment.position != expected {
                return Err(PlaybackError::InvalidWorkout(format!(
                    "segment positions must be dense from 0; expected {} but found {}",
                    expected, segment.position
                )));
            }
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            segments,
        })
    }

    /// Parses and validates a workout document.
    pub fn from_json(text: &str) -> Result<Self, PlaybackError> {
        let document: WorkoutDocument = serde_json::from_str(text)
            .map_err(|err| PlaybackError::InvalidWorkout(format!("malformed document: {err}")))?;
        Self::new(document.id, document.name, document.segments)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index == self.last_index()
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Rest observed after the segment at `index`, or 0 when out of range.
    pub fn rest_after(&self, index: usize) -> u32 {
        self.segments
            .get(index)
            .map(|segment| segment.rest_seconds)
            .unwrap_or(0)
    }
}
