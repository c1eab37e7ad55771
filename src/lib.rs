//! Guided-workout playback orchestration.
//!
//! Drives a sequence of video segments separated by rest periods across a
//! local element, a wirelessly mirrored element, or a remote receiver. All
//! components talk over a `tokio::sync::broadcast` bus of [`protocol::Message`].

pub mod backend;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod remote_session;
pub mod rest_scheduler;
pub mod session;
pub mod session_controller;
pub mod sim;
pub mod workout;

pub use backend::{BackendKind, ElementBackend, MediaElement, MediaHandle, PlaybackBackend};
pub use error::{ConfigError, ErrorKind, PlaybackError};
pub use protocol::Message;
pub use remote_session::{ReceiverChannel, RemoteSessionManager};
pub use session::{SessionPhase, SessionSnapshot};
pub use session_controller::SessionController;
pub use workout::{MediaRef, Segment, Workout};
