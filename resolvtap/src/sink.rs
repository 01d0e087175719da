//! Consumers of resolved `(ip, hostname)` pairs.

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;

use crate::events::Resolution;

/// Receives every resolution the probes observe, in arrival order.
///
/// Called from the pump task for each record, possibly with the same pair many
/// times, so implementations must be cheap and must not block.
pub trait Tracker: Send + Sync + 'static {
    fn track(&self, ip: &str, hostname: &str);

    /// Entry point used by the pump. Renders the address and calls `track`.
    fn track_resolution(&self, resolution: &Resolution) {
        self.track(&resolution.address.to_string(), &resolution.hostname);
    }
}

impl<F> Tracker for F
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    fn track(&self, ip: &str, hostname: &str) {
        self(ip, hostname)
    }
}

/// Writes each resolution to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn track(&self, ip: &str, hostname: &str) {
        info!("RESOLVED {} -> {}", hostname, ip);
    }
}

/// Forwards resolutions to an in-process consumer.
///
/// Resolutions from the pump are forwarded as they are. Sends never block;
/// once the receiver is gone, resolutions are dropped.
#[derive(Debug, Clone)]
pub struct ChannelTracker {
    tx: UnboundedSender<Resolution>,
}

impl ChannelTracker {
    pub fn new(tx: UnboundedSender<Resolution>) -> Self {
        Self { tx }
    }
}

impl Tracker for ChannelTracker {
    fn track(&self, ip: &str, hostname: &str) {
        match ip.parse() {
            Ok(address) => self.track_resolution(&Resolution {
                address,
                hostname: hostname.to_string(),
            }),
            Err(e) => debug!("Dropping resolution of {} to '{}': {}", hostname, ip, e),
        }
    }

    fn track_resolution(&self, resolution: &Resolution) {
        if self.tx.send(resolution.clone()).is_err() {
            debug!("Resolution receiver is gone, dropping {}", resolution.hostname);
        }
    }
}
