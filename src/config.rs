//! Persistent playback configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::error::ConfigError;

const CONFIG_DIR_NAME: &str = "workout_player";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Session sequencing and loop timing.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// End-of-segment detection thresholds.
    pub detection: DetectionConfig,
    #[serde(default)]
    /// Remote receiver connection timing and discovery.
    pub remote: RemoteConfig,
}

/// Session sequencing preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_rest_tick_ms")]
    pub rest_tick_ms: u64,
    #[serde(default = "default_idle_loop_sleep_ms")]
    pub idle_loop_sleep_ms: u64,
    /// Pause the active backend while a rest period counts down.
    #[serde(default = "default_true")]
    pub pause_during_rest: bool,
    /// Resume the current segment on the receiver when a remote connects mid-session.
    #[serde(default = "default_true")]
    pub handoff_on_remote_connect: bool,
}

/// Thresholds used by the end-of-segment detector.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DetectionConfig {
    #[serde(default = "default_remote_poll_interval_ms")]
    pub remote_poll_interval_ms: u64,
    /// Remaining time at or below which a polled segment counts as finished.
    #[serde(default = "default_near_end_threshold_s")]
    pub near_end_threshold_s: f64,
    /// Position change below which a remote poll counts as stuck.
    #[serde(default = "default_stuck_epsilon_s")]
    pub stuck_epsilon_s: f64,
    #[serde(default = "default_stuck_poll_limit")]
    pub stuck_poll_limit: u32,
    /// Fraction of the duration that must have elapsed before the stuck watchdog may fire.
    #[serde(default = "default_stuck_min_progress")]
    pub stuck_min_progress: f64,
}

/// Remote receiver connection preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_connect_stabilization_ms")]
    pub connect_stabilization_ms: u64,
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    #[serde(default = "default_discovery_service_type")]
    pub discovery_service_type: String,
    /// Time spent collecting receivers before the first availability report.
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
    /// Receiver models offered for playback; empty accepts every video receiver.
    #[serde(default)]
    pub receiver_models: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            rest_tick_ms: default_rest_tick_ms(),
            idle_loop_sleep_ms: default_idle_loop_sleep_ms(),
            pause_during_rest: true,
            handoff_on_remote_connect: true,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            remote_poll_interval_ms: default_remote_poll_interval_ms(),
            near_end_threshold_s: default_near_end_threshold_s(),
            stuck_epsilon_s: default_stuck_epsilon_s(),
            stuck_poll_limit: default_stuck_poll_limit(),
            stuck_min_progress: default_stuck_min_progress(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_stabilization_ms: default_connect_stabilization_ms(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            discovery_service_type: default_discovery_service_type(),
            discovery_window_ms: default_discovery_window_ms(),
            receiver_models: Vec::new(),
        }
    }
}

impl PlaybackConfig {
    pub fn rest_tick(&self) -> Duration {
        Duration::from_millis(self.rest_tick_ms)
    }

    pub fn idle_loop_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_loop_sleep_ms)
    }
}

impl DetectionConfig {
    pub fn remote_poll_interval(&self) -> Duration {
        Duration::from_millis(self.remote_poll_interval_ms)
    }
}

impl RemoteConfig {
    pub fn connect_stabilization(&self) -> Duration {
        Duration::from_millis(self.connect_stabilization_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_rest_tick_ms() -> u64 {
    1_000
}

fn default_idle_loop_sleep_ms() -> u64 {
    25
}

fn default_remote_poll_interval_ms() -> u64 {
    2_000
}

fn default_near_end_threshold_s() -> f64 {
    1.0
}

fn default_stuck_epsilon_s() -> f64 {
    0.1
}

fn default_stuck_poll_limit() -> u32 {
    3
}

fn default_stuck_min_progress() -> f64 {
    0.9
}

fn default_connect_stabilization_ms() -> u64 {
    500
}

fn default_reconnect_grace_ms() -> u64 {
    5_000
}

fn default_discovery_service_type() -> String {
    "_googlecast._tcp.local.".to_string()
}

fn default_discovery_window_ms() -> u64 {
    1_800
}

/// Clamps user-edited values into ranges the state machine can work with.
pub fn sanitize_config(config: Config) -> Config {
    let stuck_min_progress = if config.detection.stuck_min_progress.is_finite() {
        config.detection.stuck_min_progress.clamp(0.5, 1.0)
    } else {
        default_stuck_min_progress()
    };
    let near_end_threshold_s = if config.detection.near_end_threshold_s.is_finite() {
        config.detection.near_end_threshold_s.clamp(0.0, 10.0)
    } else {
        default_near_end_threshold_s()
    };
    let stuck_epsilon_s = if config.detection.stuck_epsilon_s.is_finite() {
        config.detection.stuck_epsilon_s.clamp(0.0, 5.0)
    } else {
        default_stuck_epsilon_s()
    };

    Config {
        playback: PlaybackConfig {
            rest_tick_ms: config.playback.rest_tick_ms.clamp(10, 10_000),
            idle_loop_sleep_ms: config.playback.idle_loop_sleep_ms.clamp(1, 500),
            ..config.playback
        },
        detection: DetectionConfig {
            remote_poll_interval_ms: config.detection.remote_poll_interval_ms.clamp(100, 30_000),
            near_end_threshold_s,
            stuck_epsilon_s,
            stuck_poll_limit: config.detection.stuck_poll_limit.max(1),
            stuck_min_progress,
        },
        remote: RemoteConfig {
            connect_stabilization_ms: config.remote.connect_stabilization_ms.min(10_000),
            reconnect_grace_ms: config.remote.reconnect_grace_ms.min(120_000),
            discovery_window_ms: config.remote.discovery_window_ms.clamp(250, 30_000),
            receiver_models: config
                .remote
                .receiver_models
                .iter()
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .collect(),
            ..config.remote
        },
    }
}

/// Default location of `config.toml` under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Reads `path`, writing a default config first when the file does not exist.
pub fn load_or_create_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(&Config::default())?)?;
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<Config>(&content)?;
    Ok(sanitize_config(config))
}
