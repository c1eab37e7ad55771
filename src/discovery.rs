//! mDNS discovery of remote receivers.
//!
//! Discovery only feeds availability into the remote session manager; it
//! never opens a session by itself. Receivers that cannot render video, or
//! whose model is not in `RemoteConfig::receiver_models`, are never offered.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};
use tokio::sync::broadcast::Sender;

use crate::config::RemoteConfig;
use crate::protocol::{Message, RemoteMessage};

const BROWSE_POLL: Duration = Duration::from_millis(250);
/// `ca` capability bit advertising video output.
const CAPABILITY_VIDEO_OUT: u32 = 0x01;

/// A receiver advertised on the local network.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReceiverDevice {
    pub id: String,
    pub name: String,
    pub model: String,
    pub host: String,
    pub address: String,
    pub port: u16,
    pub video_out: bool,
}

fn instance_name_from_fullname(fullname: &str, service_type: &str) -> String {
    let suffix = format!(".{}", service_type.trim_start_matches('.'));
    let trimmed = fullname.trim();
    let instance = trimmed
        .strip_suffix(suffix.as_str())
        .map(str::trim)
        .unwrap_or(trimmed);
    match instance.trim_matches('.') {
        "" => trimmed.trim_matches('.').to_string(),
        name => name.to_string(),
    }
}

/// Missing or unreadable capabilities are treated as video capable.
fn video_out_from_capabilities(capabilities: Option<&str>) -> bool {
    match capabilities.map(|value| value.trim().parse::<u32>()) {
        Some(Ok(bits)) => bits & CAPABILITY_VIDEO_OUT != 0,
        Some(Err(_)) | None => true,
    }
}

fn device_from_resolved_service(
    service: &ResolvedService,
    service_type: &str,
) -> Option<ReceiverDevice> {
    let txt = |key: &str| {
        service
            .get_property_val_str(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let address = service.get_addresses_v4().iter().min()?.to_string();
    let host = service.get_hostname().trim_end_matches('.').to_string();
    let port = service.get_port();
    Some(ReceiverDevice {
        id: txt("id")
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{}:{}", address, port)),
        name: txt("fn")
            .map(ToString::to_string)
            .unwrap_or_else(|| instance_name_from_fullname(service.get_fullname(), service_type)),
        model: txt("md").map(ToString::to_string).unwrap_or_default(),
        video_out: video_out_from_capabilities(txt("ca")),
        host,
        address,
        port,
    })
}

/// Receivers currently advertised, keyed by mDNS fullname.
#[derive(Debug, Default)]
struct ReceiverRegistry {
    by_fullname: HashMap<String, ReceiverDevice>,
    models: Vec<String>,
}

impl ReceiverRegistry {
    fn new(models: &[String]) -> Self {
        Self {
            by_fullname: HashMap::new(),
            models: models.iter().map(|model| model.to_lowercase()).collect(),
        }
    }

    fn upsert(&mut self, fullname: &str, device: ReceiverDevice) {
        if !device.video_out {
            debug!(
                "Discovery: ignoring audio-only receiver '{}' ({})",
                device.name, device.model
            );
        }
        self.by_fullname.insert(fullname.to_string(), device);
    }

    fn remove(&mut self, fullname: &str) {
        if let Some(device) = self.by_fullname.remove(fullname) {
            debug!("Discovery: receiver '{}' went away", device.name);
        }
    }

    fn accepts(&self, device: &ReceiverDevice) -> bool {
        device.video_out
            && (self.models.is_empty() || self.models.contains(&device.model.to_lowercase()))
    }

    /// Playable receivers, ordered by display name, one entry per device id.
    fn playable(&self) -> Vec<ReceiverDevice> {
        let mut devices: Vec<ReceiverDevice> = self
            .by_fullname
            .values()
            .filter(|device| self.accepts(device))
            .cloned()
            .collect();
        devices.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        devices.dedup_by(|a, b| a.id == b.id);
        devices
    }
}

/// Browses continuously and posts `AvailabilityChanged` whenever the set of
/// playable receivers changes. The first report waits out the discovery window.
pub fn spawn_availability_watcher(
    bus_producer: Sender<Message>,
    config: RemoteConfig,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("receiver-discovery".to_string())
        .spawn(move || {
            let service_type = config.discovery_service_type.as_str();
            let mdns = match ServiceDaemon::new() {
                Ok(mdns) => mdns,
                Err(err) => {
                    warn!("Discovery: failed to start mDNS daemon: {}", err);
                    return;
                }
            };
            let browse_receiver = match mdns.browse(service_type) {
                Ok(receiver) => receiver,
                Err(err) => {
                    warn!("Discovery: failed to browse '{}': {}", service_type, err);
                    let _ = mdns.shutdown();
                    return;
                }
            };
            info!("Discovery: watching for '{}' receivers", service_type);

            let first_report_at = Instant::now() + Duration::from_millis(config.discovery_window_ms);
            let mut registry = ReceiverRegistry::new(&config.receiver_models);
            let mut published: Option<Vec<ReceiverDevice>> = None;
            loop {
                match browse_receiver.recv_timeout(BROWSE_POLL) {
                    Ok(ServiceEvent::ServiceResolved(service)) => {
                        if let Some(device) = device_from_resolved_service(&service, service_type) {
                            registry.upsert(service.get_fullname(), device);
                        }
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => registry.remove(&fullname),
                    Ok(_) | Err(_) => {}
                }
                if Instant::now() < first_report_at {
                    continue;
                }
                let devices = registry.playable();
                if published.as_ref() == Some(&devices) {
                    continue;
                }
                debug!("Discovery: {} playable receiver(s)", devices.len());
                if bus_producer
                    .send(Message::Remote(RemoteMessage::AvailabilityChanged(
                        devices.clone(),
                    )))
                    .is_err()
                {
                    break;
                }
                published = Some(devices);
            }

            if let Err(err) = mdns.stop_browse(service_type) {
                debug!("Discovery: failed to stop mDNS browse cleanly: {}", err);
            }
            let _ = mdns.shutdown();
        })
}
