//! Playback backend over the host's local media element.
//!
//! The same element serves local and mirrored playback. While mirrored, the
//! element's transport controls and native ended event cannot be trusted, so
//! play/pause become advisory and detection falls back to polling.

use log::{debug, warn};

use crate::backend::{validate_locator, BackendKind, MediaHandle, MediaListener, PlaybackBackend};
use crate::error::PlaybackError;
use crate::workout::{MediaRef, Segment};

/// Host-provided media element surface.
pub trait MediaElement: Send {
    /// Replaces the current source and starts loading with autoplay.
    fn set_source(&mut self, media: &MediaRef) -> Result<(), String>;
    fn play(&mut self) -> Result<(), String>;
    fn pause(&mut self) -> Result<(), String>;
    fn seek(&mut self, position_s: f64) -> Result<(), String>;
    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    /// Attaches (or with `None` detaches) the event listener.
    fn set_listener(&mut self, listener: Option<MediaListener>);
}

pub struct ElementBackend {
    element: Box<dyn MediaElement>,
    mirrored: bool,
    handle: Option<MediaHandle>,
}

impl ElementBackend {
    pub fn local(element: Box<dyn MediaElement>) -> Self {
        Self {
            element,
            mirrored: false,
            handle: None,
        }
    }

    pub fn mirrored(element: Box<dyn MediaElement>) -> Self {
        Self {
            element,
            mirrored: true,
            handle: None,
        }
    }

    /// Switches between local and mirrored output without touching the loaded media.
    pub fn set_mirroring(&mut self, mirrored: bool) {
        if self.mirrored != mirrored {
            debug!("ElementBackend: mirroring changed to {}", mirrored);
        }
        self.mirrored = mirrored;
    }

    pub fn handle(&self) -> Option<MediaHandle> {
        self.handle
    }

    fn advisory(&self, action: &str, result: Result<(), String>) -> Result<(), PlaybackError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if self.mirrored => {
                warn!(
                    "ElementBackend: mirrored {} was not honoured by the display: {}",
                    action, err
                );
                Ok(())
            }
            Err(err) => Err(PlaybackError::Load(format!("{} failed: {}", action, err))),
        }
    }
}

impl PlaybackBackend for ElementBackend {
    fn kind(&self) -> BackendKind {
        if self.mirrored {
            BackendKind::Mirrored
        } else {
            BackendKind::Local
        }
    }

    fn load(&mut self, segment: &Segment) -> Result<MediaHandle, PlaybackError> {
        validate_locator(segment)?;
        self.element.set_listener(None);
        self.handle = None;
        self.element
            .set_source(&segment.media)
            .map_err(PlaybackError::Load)?;
        let handle = MediaHandle::next(segment.position);
        self.handle = Some(handle);
        debug!(
            "ElementBackend: loading segment {} ({}) as {:?}",
            segment.position,
            segment.media.name,
            self.kind()
        );
        Ok(handle)
    }

    fn set_listener(&mut self, listener: MediaListener) {
        if self.handle != Some(listener.handle()) {
            debug!("ElementBackend: attaching listener for a handle that is not loaded");
        }
        self.element.set_listener(Some(listener));
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let result = self.element.play();
        self.advisory("play", result)
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        let result = self.element.pause();
        self.advisory("pause", result)
    }

    fn seek(&mut self, position_s: f64) -> Result<(), PlaybackError> {
        let result = self.element.seek(position_s.max(0.0));
        self.advisory("seek", result)
    }

    fn elapsed_seconds(&self) -> f64 {
        if self.handle.is_none() {
            return 0.0;
        }
        self.element.current_time().max(0.0)
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.handle?;
        self.element.duration().filter(|duration| *duration > 0.0)
    }

    fn release(&mut self) {
        self.element.set_listener(None);
        if self.handle.take().is_some() {
            if let Err(err) = self.element.pause() {
                debug!("ElementBackend: pause on release failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ElementBackend, MediaElement};
    use crate::backend::{BackendKind, MediaHandle, MediaListener, PlaybackBackend};
    use crate::error::PlaybackError;
    use crate::workout::{MediaRef, Segment};
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Calls {
        sources: Vec<String>,
        listener_attached: bool,
        pauses: usize,
        fail_transport: bool,
    }

    struct RecordingElement {
        calls: Arc<Mutex<Calls>>,
    }

    impl MediaElement for RecordingElement {
        fn set_source(&mut self, media: &MediaRef) -> Result<(), String> {
            self.calls.lock().unwrap().sources.push(media.locator.clone());
            Ok(())
        }

        fn play(&mut self) -> Result<(), String> {
            if self.calls.lock().unwrap().fail_transport {
                return Err("not allowed".to_string());
            }
            Ok(())
        }

        fn pause(&mut self) -> Result<(), String> {
            let mut calls = self.calls.lock().unwrap();
            calls.pauses += 1;
            if calls.fail_transport {
                return Err("not allowed".to_string());
            }
            Ok(())
        }

        fn seek(&mut self, _position_s: f64) -> Result<(), String> {
            Ok(())
        }

        fn current_time(&self) -> f64 {
            7.5
        }

        fn duration(&self) -> Option<f64> {
            Some(30.0)
        }

        fn set_listener(&mut self, listener: Option<MediaListener>) {
            self.calls.lock().unwrap().listener_attached = listener.is_some();
        }
    }

    fn backend() -> (ElementBackend, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let element = RecordingElement {
            calls: calls.clone(),
        };
        (ElementBackend::local(Box::new(element)), calls)
    }

    fn segment(position: usize, locator: &str) -> Segment {
        Segment {
            position,
            active_seconds: 30,
            rest_seconds: 0,
            media: MediaRef {
                locator: locator.to_string(),
                name: "Burpee".to_string(),
                thumbnail: None,
            },
        }
    }

    #[test]
    fn test_load_detaches_previous_listener_and_issues_new_handle() {
        let (mut backend, calls) = backend();
        let (bus_sender, _receiver) = broadcast::channel(8);

        let first = backend.load(&segment(0, "https://m/0.mp4")).unwrap();
        backend.set_listener(MediaListener::new(first, bus_sender));
        assert!(calls.lock().unwrap().listener_attached);

        let second = backend.load(&segment(1, "https://m/1.mp4")).unwrap();
        assert_ne!(first, second);
        assert_eq!(second.position(), 1);
        assert!(!calls.lock().unwrap().listener_attached);
        assert_eq!(
            calls.lock().unwrap().sources,
            vec!["https://m/0.mp4".to_string(), "https://m/1.mp4".to_string()]
        );
    }

    #[test]
    fn test_load_rejects_missing_locator_without_touching_element() {
        let (mut backend, calls) = backend();
        let result = backend.load(&segment(0, ""));
        assert!(matches!(result, Err(PlaybackError::Load(_))));
        assert!(calls.lock().unwrap().sources.is_empty());
        assert_eq!(backend.handle(), None::<MediaHandle>);
    }

    #[test]
    fn test_elapsed_and_duration_are_zero_before_load() {
        let (mut backend, _) = backend();
        assert_eq!(backend.elapsed_seconds(), 0.0);
        assert_eq!(backend.duration_seconds(), None);

        backend.load(&segment(0, "https://m/0.mp4")).unwrap();
        assert!((backend.elapsed_seconds() - 7.5).abs() < f64::EPSILON);
        assert_eq!(backend.duration_seconds(), Some(30.0));
    }

    #[test]
    fn test_mirrored_transport_errors_are_advisory() {
        let (mut backend, calls) = backend();
        calls.lock().unwrap().fail_transport = true;

        assert!(matches!(backend.pause(), Err(PlaybackError::Load(_))));

        backend.set_mirroring(true);
        assert_eq!(backend.kind(), BackendKind::Mirrored);
        assert!(backend.pause().is_ok());
        assert!(backend.play().is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut backend, calls) = backend();
        backend.load(&segment(0, "https://m/0.mp4")).unwrap();

        backend.release();
        backend.release();
        assert_eq!(calls.lock().unwrap().pauses, 1);
        assert_eq!(backend.handle(), None);
    }
}
