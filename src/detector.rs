//! End-of-segment detection.
//!
//! Backends disagree on how reliably they report the end of media. Local
//! elements fire a trustworthy ended event; mirrored output needs time-update
//! polling; remote receivers need their idle status, polling, and a watchdog
//! for streams that stall just short of the end. The detector runs the
//! strategy list for the active backend and turns every combination of those
//! signals into at most one [`SegmentFinished`] per load.

use std::time::Instant;

use log::{debug, info};

use crate::backend::{BackendKind, MediaHandle};
use crate::config::DetectionConfig;
use crate::remote_session::IdleReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Backend's own end-of-media report.
    Native,
    /// Position sampled close enough to the duration.
    Polled,
    /// Position stopped moving near the end.
    Watchdog,
}

/// Strategies consulted for `kind`, in priority order.
pub fn strategies_for(kind: BackendKind) -> &'static [DetectionStrategy] {
    match kind {
        BackendKind::Local => &[DetectionStrategy::Native],
        BackendKind::Mirrored => &[DetectionStrategy::Polled],
        BackendKind::RemoteReceiver => &[
            DetectionStrategy::Native,
            DetectionStrategy::Polled,
            DetectionStrategy::Watchdog,
        ],
    }
}

/// Raw signal fed to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndSignal {
    NativeEnded,
    ReceiverIdle(IdleReason),
    Progress {
        current_s: f64,
        duration_s: Option<f64>,
    },
    /// Receiver position extrapolated from its last report; never stored as a sample.
    Estimated {
        current_s: f64,
        duration_s: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFinished {
    pub handle: MediaHandle,
    pub strategy: DetectionStrategy,
}

#[derive(Debug)]
struct SegmentWatch {
    handle: MediaHandle,
    kind: BackendKind,
    handled: bool,
    last_sample_s: Option<f64>,
    stuck_polls: u32,
    next_poll: Option<Instant>,
}

impl SegmentWatch {
    fn clear_progress(&mut self) {
        self.last_sample_s = None;
        self.stuck_polls = 0;
    }
}

pub struct EndOfSegmentDetector {
    config: DetectionConfig,
    watch: Option<SegmentWatch>,
    duplicates_ignored: u64,
}

impl EndOfSegmentDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            watch: None,
            duplicates_ignored: 0,
        }
    }

    pub fn set_config(&mut self, config: DetectionConfig) {
        self.config = config;
    }

    /// Starts watching a freshly loaded segment with the handled flag cleared.
    pub fn begin(&mut self, handle: MediaHandle, kind: BackendKind, now: Instant) {
        self.watch = Some(SegmentWatch {
            handle,
            kind,
            handled: false,
            last_sample_s: None,
            stuck_polls: 0,
            next_poll: self.first_poll(kind, now),
        });
    }

    /// Moves the current watch to another surface, keeping handle and flag.
    pub fn switch_backend(&mut self, kind: BackendKind, now: Instant) {
        let next_poll = self.first_poll(kind, now);
        if let Some(watch) = self.watch.as_mut() {
            if watch.kind != kind {
                debug!(
                    "EndOfSegmentDetector: strategy set {:?} -> {:?}",
                    watch.kind, kind
                );
                watch.kind = kind;
                watch.clear_progress();
                watch.next_poll = next_poll;
            }
        }
    }

    /// Forgets sampled positions after a seek. The handled flag is kept.
    pub fn reset_progress(&mut self) {
        if let Some(watch) = self.watch.as_mut() {
            watch.clear_progress();
        }
    }

    pub fn cancel(&mut self) {
        self.watch = None;
    }

    pub fn is_handled(&self) -> bool {
        self.watch.as_ref().is_some_and(|watch| watch.handled)
    }

    pub fn watching(&self) -> Option<MediaHandle> {
        self.watch.as_ref().map(|watch| watch.handle)
    }

    pub fn duplicates_ignored(&self) -> u64 {
        self.duplicates_ignored
    }

    /// True when a remote status poll is due; re-arms the poll deadline.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        let interval = self.config.remote_poll_interval();
        let Some(watch) = self.watch.as_mut() else {
            return false;
        };
        if watch.handled {
            return false;
        }
        match watch.next_poll {
            Some(deadline) if now >= deadline => {
                watch.next_poll = Some(now + interval);
                true
            }
            _ => false,
        }
    }

    /// Feeds one signal; returns the finish notification the first time any strategy fires.
    pub fn observe(&mut self, handle: MediaHandle, signal: EndSignal) -> Option<SegmentFinished> {
        let config = &self.config;
        let watch = self.watch.as_mut()?;
        if watch.handle != handle {
            debug!("EndOfSegmentDetector: signal for stale handle ignored");
            return None;
        }
        if watch.handled {
            if signals_end(config, watch.kind, &signal) {
                self.duplicates_ignored += 1;
                debug!(
                    "EndOfSegmentDetector: DuplicateSignalIgnored {:?} (total {})",
                    signal, self.duplicates_ignored
                );
            }
            return None;
        }

        let mut fired = None;
        for strategy in strategies_for(watch.kind) {
            if fired.is_none() && evaluate(config, watch, *strategy, &signal) {
                fired = Some(*strategy);
            }
        }
        if let EndSignal::Progress { current_s, .. } = signal {
            watch.last_sample_s = Some(current_s);
        }

        let strategy = fired?;
        watch.handled = true;
        info!(
            "EndOfSegmentDetector: segment {} finished via {:?}",
            handle.position(),
            strategy
        );
        Some(SegmentFinished { handle, strategy })
    }

    fn first_poll(&self, kind: BackendKind, now: Instant) -> Option<Instant> {
        (kind == BackendKind::RemoteReceiver).then(|| now + self.config.remote_poll_interval())
    }
}

fn remaining(current_s: f64, duration_s: Option<f64>) -> Option<(f64, f64)> {
    let duration = duration_s.filter(|duration| duration.is_finite() && *duration > 0.0)?;
    Some((duration, duration - current_s))
}

fn evaluate(
    config: &DetectionConfig,
    watch: &mut SegmentWatch,
    strategy: DetectionStrategy,
    signal: &EndSignal,
) -> bool {
    match (strategy, signal) {
        (DetectionStrategy::Native, EndSignal::NativeEnded) => watch.kind == BackendKind::Local,
        (DetectionStrategy::Native, EndSignal::ReceiverIdle(reason)) => {
            *reason == IdleReason::Finished
        }
        (
            DetectionStrategy::Polled,
            EndSignal::Progress {
                current_s,
                duration_s,
            },
        ) => {
            let Some((_, left)) = remaining(*current_s, *duration_s) else {
                return false;
            };
            if left > config.near_end_threshold_s {
                return false;
            }
            match watch.kind {
                // The first mirrored sample after a load or seek only seeds history.
                BackendKind::Mirrored => watch
                    .last_sample_s
                    .is_some_and(|previous| *current_s > previous),
                _ => true,
            }
        }
        (
            DetectionStrategy::Polled,
            EndSignal::Estimated {
                current_s,
                duration_s,
            },
        ) => {
            watch.kind == BackendKind::RemoteReceiver
                && remaining(*current_s, *duration_s)
                    .is_some_and(|(_, left)| left <= config.near_end_threshold_s)
        }
        (
            DetectionStrategy::Watchdog,
            EndSignal::Progress {
                current_s,
                duration_s,
            },
        ) => {
            match watch.last_sample_s {
                Some(previous) if (current_s - previous).abs() < config.stuck_epsilon_s => {
                    watch.stuck_polls += 1;
                }
                _ => watch.stuck_polls = 0,
            }
            let Some((duration, _)) = remaining(*current_s, *duration_s) else {
                return false;
            };
            watch.stuck_polls >= config.stuck_poll_limit
                && *current_s >= config.stuck_min_progress * duration
        }
        _ => false,
    }
}

fn signals_end(config: &DetectionConfig, kind: BackendKind, signal: &EndSignal) -> bool {
    match signal {
        EndSignal::NativeEnded => kind == BackendKind::Local,
        EndSignal::Estimated { .. } => false,
        EndSignal::ReceiverIdle(reason) => *reason == IdleReason::Finished,
        EndSignal::Progress {
            current_s,
            duration_s,
        } => kind != BackendKind::Local
            && remaining(*current_s, *duration_s)
                .is_some_and(|(_, left)| left <= config.near_end_threshold_s),
    }
}

#[cfg(test)]
mod tests {
    use super::{strategies_for, DetectionStrategy, EndOfSegmentDetector, EndSignal};
    use crate::backend::{BackendKind, MediaHandle};
    use crate::config::DetectionConfig;
    use crate::remote_session::IdleReason;
    use std::time::{Duration, Instant};

    fn progress(current_s: f64, duration_s: f64) -> EndSignal {
        EndSignal::Progress {
            current_s,
            duration_s: Some(duration_s),
        }
    }

    fn estimate(current_s: f64, duration_s: f64) -> EndSignal {
        EndSignal::Estimated {
            current_s,
            duration_s: Some(duration_s),
        }
    }

    fn detector_for(kind: BackendKind) -> (EndOfSegmentDetector, MediaHandle, Instant) {
        let mut detector = EndOfSegmentDetector::new(DetectionConfig::default());
        let handle = MediaHandle::next(0);
        let now = Instant::now();
        detector.begin(handle, kind, now);
        (detector, handle, now)
    }

    #[test]
    fn test_strategy_lists_per_backend() {
        assert_eq!(
            strategies_for(BackendKind::Local),
            &[DetectionStrategy::Native]
        );
        assert_eq!(
            strategies_for(BackendKind::Mirrored),
            &[DetectionStrategy::Polled]
        );
        assert_eq!(strategies_for(BackendKind::RemoteReceiver).len(), 3);
    }

    #[test]
    fn test_local_native_end_fires_once_and_counts_duplicates() {
        let (mut detector, handle, _) = detector_for(BackendKind::Local);

        let finished = detector.observe(handle, EndSignal::NativeEnded);
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Native)
        );
        assert!(detector.is_handled());
        assert!(detector.observe(handle, EndSignal::NativeEnded).is_none());
        assert!(detector.observe(handle, EndSignal::NativeEnded).is_none());
        assert_eq!(detector.duplicates_ignored(), 2);
    }

    #[test]
    fn test_local_ignores_time_updates() {
        let (mut detector, handle, _) = detector_for(BackendKind::Local);
        assert!(detector.observe(handle, progress(29.5, 30.0)).is_none());
        assert!(detector.observe(handle, progress(29.9, 30.0)).is_none());
        assert!(!detector.is_handled());
    }

    #[test]
    fn test_mirrored_requires_increasing_time_near_end() {
        let (mut detector, handle, _) = detector_for(BackendKind::Mirrored);

        assert!(detector.observe(handle, EndSignal::NativeEnded).is_none());
        // First sample only seeds history.
        assert!(detector.observe(handle, progress(29.2, 30.0)).is_none());
        // Not increasing.
        assert!(detector.observe(handle, progress(29.2, 30.0)).is_none());
        let finished = detector.observe(handle, progress(29.6, 30.0));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Polled)
        );
    }

    #[test]
    fn test_mirrored_far_from_end_does_not_fire() {
        let (mut detector, handle, _) = detector_for(BackendKind::Mirrored);
        for second in 0..28 {
            assert!(detector
                .observe(handle, progress(second as f64, 30.0))
                .is_none());
        }
        assert!(!detector.is_handled());
    }

    #[test]
    fn test_remote_idle_finished_and_poll_fire_once() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);

        assert!(detector
            .observe(handle, EndSignal::ReceiverIdle(IdleReason::Cancelled))
            .is_none());
        let finished = detector.observe(handle, EndSignal::ReceiverIdle(IdleReason::Finished));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Native)
        );
        assert!(detector.observe(handle, progress(29.5, 30.0)).is_none());
        assert_eq!(detector.duplicates_ignored(), 1);
    }

    #[test]
    fn test_remote_polled_threshold_is_inclusive() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);
        assert!(detector.observe(handle, progress(28.9, 30.0)).is_none());
        let finished = detector.observe(handle, progress(29.0, 30.0));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Polled)
        );
    }

    #[test]
    fn test_remote_watchdog_fires_after_three_stuck_polls_past_ninety_percent() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);

        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        assert!(detector.observe(handle, progress(55.05, 60.0)).is_none());
        assert!(detector.observe(handle, progress(55.08, 60.0)).is_none());
        let finished = detector.observe(handle, progress(55.1, 60.0));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Watchdog)
        );
    }

    #[test]
    fn test_remote_estimate_near_end_fires_polled() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);
        assert!(detector.observe(handle, estimate(58.5, 60.0)).is_none());
        let finished = detector.observe(handle, estimate(59.2, 60.0));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Polled)
        );
        // Estimates are never counted as duplicates.
        assert!(detector.observe(handle, estimate(60.0, 60.0)).is_none());
        assert_eq!(detector.duplicates_ignored(), 0);
    }

    #[test]
    fn test_estimates_do_not_disturb_stall_history() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);
        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        assert!(detector.observe(handle, estimate(57.0, 60.0)).is_none());
        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        let finished = detector.observe(handle, progress(55.0, 60.0));
        assert_eq!(
            finished.map(|finished| finished.strategy),
            Some(DetectionStrategy::Watchdog)
        );
    }

    #[test]
    fn test_element_backends_ignore_estimates() {
        for kind in [BackendKind::Local, BackendKind::Mirrored] {
            let (mut detector, handle, _) = detector_for(kind);
            assert!(detector.observe(handle, estimate(29.9, 30.0)).is_none());
            assert!(!detector.is_handled());
        }
    }

    #[test]
    fn test_remote_watchdog_ignores_stalls_before_ninety_percent() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);
        for _ in 0..6 {
            assert!(detector.observe(handle, progress(30.0, 60.0)).is_none());
        }
        assert!(!detector.is_handled());
    }

    #[test]
    fn test_seek_resets_history_but_not_flag() {
        let (mut detector, handle, _) = detector_for(BackendKind::RemoteReceiver);
        detector.observe(handle, progress(55.0, 60.0));
        detector.observe(handle, progress(55.0, 60.0));
        detector.observe(handle, progress(55.0, 60.0));
        detector.reset_progress();
        // History was cleared, so the stall count starts over.
        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        assert!(detector.observe(handle, progress(55.0, 60.0)).is_none());
        assert!(!detector.is_handled());

        detector.observe(handle, EndSignal::ReceiverIdle(IdleReason::Finished));
        detector.reset_progress();
        assert!(detector.is_handled());
    }

    #[test]
    fn test_switching_mirroring_keeps_handled_flag_and_handle() {
        let (mut detector, handle, now) = detector_for(BackendKind::Local);
        detector.observe(handle, EndSignal::NativeEnded);

        detector.switch_backend(BackendKind::Mirrored, now);
        assert_eq!(detector.watching(), Some(handle));
        assert!(detector.is_handled());
        assert!(detector.observe(handle, progress(29.5, 30.0)).is_none());
        assert!(detector.observe(handle, progress(29.8, 30.0)).is_none());
        assert!(detector.duplicates_ignored() >= 1);
    }

    #[test]
    fn test_stale_handle_and_new_load_reset_flag() {
        let (mut detector, handle, now) = detector_for(BackendKind::Local);
        detector.observe(handle, EndSignal::NativeEnded);

        let next = MediaHandle::next(1);
        detector.begin(next, BackendKind::Local, now);
        assert!(!detector.is_handled());
        assert!(detector.observe(handle, EndSignal::NativeEnded).is_none());
        assert!(!detector.is_handled());
        assert!(detector.observe(next, EndSignal::NativeEnded).is_some());
    }

    #[test]
    fn test_remote_poll_cadence() {
        let (mut detector, handle, now) = detector_for(BackendKind::RemoteReceiver);
        assert!(!detector.poll_due(now + Duration::from_millis(1_999)));
        assert!(detector.poll_due(now + Duration::from_secs(2)));
        assert!(!detector.poll_due(now + Duration::from_secs(3)));
        assert!(detector.poll_due(now + Duration::from_secs(4)));

        detector.observe(handle, EndSignal::ReceiverIdle(IdleReason::Finished));
        assert!(!detector.poll_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_local_never_polls() {
        let (mut detector, _, now) = detector_for(BackendKind::Local);
        assert!(!detector.poll_due(now + Duration::from_secs(60)));
    }
}
