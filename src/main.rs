use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::TryRecvError};

use workout_player::config::{default_config_path, load_or_create_config, Config};
use workout_player::discovery::spawn_availability_watcher;
use workout_player::protocol::{Message, RemoteMessage, SessionMessage};
use workout_player::remote_session::RemoteState;
use workout_player::sim::{simulated_device, simulated_element, simulated_receiver};
use workout_player::{
    ElementBackend, MediaRef, RemoteSessionManager, Segment, SessionController, SessionPhase,
    Workout,
};

const SIM_STEP: Duration = Duration::from_millis(100);
const IDLE_LOOP_SLEEP: Duration = Duration::from_millis(25);

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn parse_speed(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|speed| speed.is_finite() && *speed > 0.0)
        .ok_or_else(|| format!("'{}' is not a positive number", value))
}

#[derive(Parser, Debug)]
#[command(name = "workout_player")]
#[command(about = "Plays a guided workout against simulated playback surfaces")]
#[command(version)]
struct Options {
    /// Workout JSON document; a built-in demo circuit when omitted
    workout_path: Option<PathBuf>,

    /// Cast to a remote receiver once one is available
    #[arg(long)]
    remote: bool,

    /// Find receivers with mDNS instead of using the simulated one
    #[arg(long, requires = "remote")]
    discover: bool,

    /// Start with the element mirrored to a wireless display
    #[arg(long)]
    mirrored: bool,

    /// Simulated playback speed multiplier
    #[arg(long, default_value = "10", value_parser = parse_speed)]
    speed: f64,
}

fn demo_workout() -> Result<Workout, workout_player::PlaybackError> {
    let movements = [("Squats", 10), ("Push-ups", 0), ("Plank", 5)];
    let segments = movements
        .iter()
        .enumerate()
        .map(|(position, (name, rest_seconds))| Segment {
            position,
            active_seconds: 30,
            rest_seconds: *rest_seconds,
            media: MediaRef {
                locator: format!("sim://movements/{}.mp4", position),
                name: name.to_string(),
                thumbnail: None,
            },
        })
        .collect();
    Workout::new("demo", "Demo Circuit", segments)
}

fn load_config() -> Config {
    let Some(path) = default_config_path() else {
        warn!("No config directory available. Using defaults");
        return Config::default();
    };
    match load_or_create_config(&path) {
        Ok(config) => config,
        Err(err) => {
            warn!("Failed to load config {}: {}. Using defaults", path.display(), err);
            Config::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let options = Options::parse();
    let mut config = load_config();
    // Simulated media runs faster than real time; rests follow suit.
    config.playback.rest_tick_ms = ((config.playback.rest_tick_ms as f64) / options.speed) as u64;

    let workout = match options.workout_path.as_ref() {
        Some(path) => Workout::from_json(&std::fs::read_to_string(path)?)?,
        None => demo_workout()?,
    };
    info!(
        "Playing '{}' ({} segments)",
        workout.name(),
        workout.len()
    );

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    let (element, element_driver) = simulated_element();
    element_driver.set_suppress_ended(options.mirrored);
    let element_backend = if options.mirrored {
        ElementBackend::mirrored(Box::new(element))
    } else {
        ElementBackend::local(Box::new(element))
    };

    let (remote, receiver_driver) = if options.remote {
        let (channel, driver) = simulated_receiver();
        let manager =
            RemoteSessionManager::new(Box::new(channel), bus_sender.clone(), config.remote.clone());
        (Some(manager), Some(driver))
    } else {
        (None, None)
    };

    // Setup session controller
    let controller_bus_receiver = bus_sender.subscribe();
    let controller_bus_sender = bus_sender.clone();
    let controller_config = config.clone();
    thread::Builder::new()
        .name("session-controller".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut controller = SessionController::new(
                    controller_config,
                    element_backend,
                    remote,
                    controller_bus_receiver,
                    controller_bus_sender,
                );
                controller.run();
            }));
            if let Err(payload) = run_result {
                error!(
                    "SessionController thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    // Setup simulated media clock
    let step_s = SIM_STEP.as_secs_f64() * options.speed;
    let clock_receiver_driver = receiver_driver;
    thread::Builder::new()
        .name("sim-clock".to_string())
        .spawn(move || loop {
            element_driver.advance(step_s);
            if let Some(driver) = clock_receiver_driver.as_ref() {
                driver.complete_handshake();
                driver.advance(step_s);
            }
            thread::sleep(SIM_STEP);
        })?;

    let mut receiver = bus_sender.subscribe();
    if options.remote {
        if options.discover {
            spawn_availability_watcher(bus_sender.clone(), config.remote.clone())?;
        } else {
            let _ = bus_sender.send(Message::Remote(RemoteMessage::AvailabilityChanged(vec![
                simulated_device(),
            ])));
        }
    }
    let _ = bus_sender.send(Message::Session(SessionMessage::Start {
        workout,
        user_token: None,
    }));

    loop {
        let message = match receiver.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => {
                thread::sleep(IDLE_LOOP_SLEEP);
                continue;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!("Bus lagged by {} messages", skipped);
                continue;
            }
            Err(TryRecvError::Closed) => break,
        };
        match message {
            Message::Session(SessionMessage::IndexChanged(index)) => {
                info!("Now on segment {}", index);
            }
            Message::Session(SessionMessage::PhaseChanged(phase)) => {
                info!("Phase: {:?}", phase);
                if phase == SessionPhase::AwaitingUserInteraction {
                    let _ = bus_sender.send(Message::Session(SessionMessage::RequestManualPlay));
                }
            }
            Message::Session(SessionMessage::RestTick(remaining)) => {
                debug!("Rest: {}s left", remaining);
            }
            Message::Session(SessionMessage::Error {
                kind,
                message,
                recovery,
            }) => {
                warn!("Playback error ({:?}): {}", kind, message);
                match recovery {
                    Some(recovery) if recovery.can_skip => {
                        let _ =
                            bus_sender.send(Message::Session(SessionMessage::SkipFailedSegment));
                    }
                    Some(_) => {
                        let _ = bus_sender.send(Message::Session(SessionMessage::Abandon));
                    }
                    None => {}
                }
            }
            Message::Remote(RemoteMessage::StateChanged { state, device_name }) => {
                info!("Receiver {:?}: {:?}", device_name, state);
                if state == RemoteState::Available {
                    let _ = bus_sender.send(Message::Remote(RemoteMessage::Connect));
                }
            }
            Message::Session(SessionMessage::Complete) => {
                info!("Workout complete");
                break;
            }
            Message::Session(SessionMessage::Disconnected) => {
                warn!("Receiver lost; session ended");
                break;
            }
            Message::Session(SessionMessage::Abandoned) => {
                info!("Session abandoned");
                break;
            }
            _ => {}
        }
    }

    info!("Application exiting");
    Ok(())
}
