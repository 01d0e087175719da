//! Decoding of lookup records and the output channel pump.
//!
//! ## Wire format (little-endian, 272 bytes)
//!
//! ```text
//! 0        4                    20                                  272
//! +--------+--------------------+-----------------------------------+
//! | family | address (16 bytes) | hostname (252 bytes, NUL padded)  |
//! +--------+--------------------+-----------------------------------+
//! ```
//!
//! Only the first 4 address bytes are meaningful when `family == AF_INET`.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use log::{debug, warn};
use resolvtap_common::{ADDRESS_LEN, AF_INET, HOSTNAME_LEN, LOOKUP_EVENT_SIZE, LookupEvent};
use tokio::{sync::watch, task::JoinSet};

use crate::{
    error::{DecodeError, Error, Result},
    sink::Tracker,
    telemetry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub address: IpAddr,
    pub hostname: String,
}

impl Resolution {
    pub fn from_event(event: &LookupEvent) -> Self {
        Self {
            address: event_address(event),
            hostname: event_hostname(event),
        }
    }
}

/// Decodes one record, checking the length before every field.
///
/// Bytes past the record are ignored.
pub fn decode(buf: &[u8]) -> Result<LookupEvent, DecodeError> {
    let truncated = || DecodeError::Truncated {
        expected: LOOKUP_EVENT_SIZE,
        actual: buf.len(),
    };

    let (family, rest) = buf.split_first_chunk::<4>().ok_or_else(truncated)?;
    let (address, rest) = rest
        .split_first_chunk::<ADDRESS_LEN>()
        .ok_or_else(truncated)?;
    let (hostname, _) = rest
        .split_first_chunk::<HOSTNAME_LEN>()
        .ok_or_else(truncated)?;

    Ok(LookupEvent {
        address_family: u32::from_le_bytes(*family),
        address: *address,
        hostname: *hostname,
    })
}

/// Hostname up to the first NUL; the whole buffer when there is none.
pub fn event_hostname(event: &LookupEvent) -> String {
    let end = event
        .hostname
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(HOSTNAME_LEN);
    String::from_utf8_lossy(&event.hostname[..end]).into_owned()
}

/// The width is chosen from the family tag, never from the buffer contents.
pub fn event_address(event: &LookupEvent) -> IpAddr {
    if event.address_family == AF_INET {
        let [a, b, c, d, ..] = event.address;
        return IpAddr::V4(Ipv4Addr::new(a, b, c, d));
    }

    let v6 = Ipv6Addr::from(event.address);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// Where the pump reads raw records from.
///
/// A channel that is split per CPU yields one source per CPU, each consumed
/// by its own task, so ordering holds within a source only.
pub trait EventSource: Send + 'static {
    /// Waits until records are available and hands each of them to `pump`.
    ///
    /// An error ends the consumer; the controller treats it as fatal.
    fn read_ready<T: Tracker>(
        &mut self,
        pump: &EventPump<T>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Hands records that are already buffered to `pump` without waiting.
    fn drain<T: Tracker>(&mut self, _pump: &EventPump<T>) {}
}

/// Decodes raw buffers and hands the resulting pairs to a tracker.
pub struct EventPump<T> {
    tracker: Arc<T>,
}

impl<T> Clone for EventPump<T> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
        }
    }
}

impl<T: Tracker> EventPump<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            tracker: Arc::new(tracker),
        }
    }

    pub fn from_shared(tracker: Arc<T>) -> Self {
        Self { tracker }
    }

    /// Handles one raw buffer. Corrupt records are logged and dropped.
    pub fn handle(&self, buf: &[u8]) -> Option<Resolution> {
        let event = match decode(buf) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to decode lookup event: {}", e);
                telemetry::record_decode_failure();
                return None;
            }
        };

        let resolution = Resolution::from_event(&event);
        debug!(
            "LOOKUP family={} {} -> {}",
            event.address_family, resolution.hostname, resolution.address
        );

        telemetry::record_lookup_event(event.address_family);
        self.tracker.track_resolution(&resolution);
        Some(resolution)
    }

    /// Starts one consumer task per source of the channel `name`.
    ///
    /// Each task sleeps until its source has records.
    pub fn spawn<S: EventSource>(self, name: &str, sources: Vec<S>) -> PumpHandle {
        let (stop, _) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for source in sources {
            tasks.spawn(consume(source, self.clone(), stop.subscribe()));
        }
        debug!("Event pump started with {} consumer(s)", tasks.len());

        PumpHandle {
            channel: name.to_string(),
            stop,
            tasks,
        }
    }
}

async fn consume<S, T>(
    mut source: S,
    pump: EventPump<T>,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    S: EventSource,
    T: Tracker,
{
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            ready = source.read_ready(&pump) => ready?,
        }
    }

    // Records already in the buffer at stop time are still delivered.
    source.drain(&pump);
    Ok(())
}

/// Running pump consumers.
pub struct PumpHandle {
    channel: String,
    stop: watch::Sender<bool>,
    tasks: JoinSet<Result<()>>,
}

impl PumpHandle {
    /// Resolves when a consumer ends before being asked to stop.
    ///
    /// Never resolves while every consumer is healthy. Cancel safe.
    pub async fn failed(&mut self) -> Error {
        match self.tasks.join_next().await {
            Some(Ok(Err(e))) => e,
            Some(Ok(Ok(()))) => Error::Channel {
                name: self.channel.clone(),
                reason: "consumer exited".to_string(),
            },
            Some(Err(e)) => Error::Channel {
                name: self.channel.clone(),
                reason: format!("consumer task ended abnormally: {}", e),
            },
            None => std::future::pending().await,
        }
    }

    /// Asks every consumer to stop and waits until all of them have.
    pub async fn stop(mut self) {
        self.stop.send_replace(true);
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Event consumer failed: {}", e),
                Err(e) => warn!("Event consumer task ended abnormally: {}", e),
            }
        }
        debug!("Event pump stopped");
    }
}
