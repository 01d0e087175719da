//! Output channels the artifact can write lookup records to.
//!
//! Both `BPF_MAP_TYPE_RINGBUF` and `BPF_MAP_TYPE_PERF_EVENT_ARRAY` maps are
//! accepted. A perf event array is read per online CPU.

use aya::{
    Ebpf,
    maps::{
        Map, MapData, RingBuf,
        perf::{AsyncPerfEventArray, AsyncPerfEventArrayBuffer},
    },
    util::online_cpus,
};
use bytes::BytesMut;
use log::{debug, warn};
use resolvtap_common::LOOKUP_EVENT_SIZE;
use tokio::io::unix::AsyncFd;

use crate::{
    error::{Error, Result},
    events::{EventPump, EventSource},
    sink::Tracker,
};

/// Records fetched per perf buffer read.
const PERF_BATCH: usize = 64;

/// Takes the map `name` out of the artifact and opens it for reading.
pub fn open_channel(bpf: &mut Ebpf, name: &str) -> Result<Vec<OutputChannel>> {
    let channel_error = |reason: String| Error::Channel {
        name: name.to_string(),
        reason,
    };

    let map = bpf
        .take_map(name)
        .ok_or_else(|| channel_error("map not declared by the artifact".to_string()))?;

    match map {
        Map::RingBuf(_) => {
            let ring_buf = RingBuf::try_from(map).map_err(|e| channel_error(e.to_string()))?;
            let fd = AsyncFd::new(ring_buf).map_err(|e| channel_error(e.to_string()))?;
            debug!("Output channel {} is a ring buffer", name);
            Ok(vec![OutputChannel::Ring(RingBufSource {
                name: name.to_string(),
                fd,
            })])
        }
        Map::PerfEventArray(_) => {
            let mut array =
                AsyncPerfEventArray::try_from(map).map_err(|e| channel_error(e.to_string()))?;
            let cpus = online_cpus().map_err(|(_, e)| channel_error(e.to_string()))?;

            let mut sources = Vec::with_capacity(cpus.len());
            for cpu in cpus {
                let buf = array
                    .open(cpu, None)
                    .map_err(|e| channel_error(format!("cpu {}: {}", cpu, e)))?;
                sources.push(OutputChannel::Perf(PerfSource {
                    name: name.to_string(),
                    cpu,
                    buf,
                    buffers: vec![BytesMut::with_capacity(LOOKUP_EVENT_SIZE); PERF_BATCH],
                }));
            }
            if sources.is_empty() {
                return Err(channel_error("no online CPUs".to_string()));
            }
            debug!(
                "Output channel {} is a perf event array on {} CPU(s)",
                name,
                sources.len()
            );
            Ok(sources)
        }
        _ => Err(channel_error(
            "not a ring buffer or perf event array".to_string(),
        )),
    }
}

/// One readable piece of an output channel.
pub enum OutputChannel {
    Ring(RingBufSource),
    Perf(PerfSource),
}

impl EventSource for OutputChannel {
    async fn read_ready<T: Tracker>(&mut self, pump: &EventPump<T>) -> Result<()> {
        match self {
            OutputChannel::Ring(source) => source.read_ready(pump).await,
            OutputChannel::Perf(source) => source.read_ready(pump).await,
        }
    }

    fn drain<T: Tracker>(&mut self, pump: &EventPump<T>) {
        match self {
            OutputChannel::Ring(source) => source.drain(pump),
            OutputChannel::Perf(source) => source.drain(pump),
        }
    }
}

/// A ring buffer, woken through epoll on its fd.
pub struct RingBufSource {
    name: String,
    fd: AsyncFd<RingBuf<MapData>>,
}

impl EventSource for RingBufSource {
    async fn read_ready<T: Tracker>(&mut self, pump: &EventPump<T>) -> Result<()> {
        let mut guard = self.fd.readable_mut().await.map_err(|e| Error::Channel {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let ring_buf = guard.get_inner_mut();
        while let Some(item) = ring_buf.next() {
            pump.handle(&item);
        }
        guard.clear_ready();
        Ok(())
    }

    fn drain<T: Tracker>(&mut self, pump: &EventPump<T>) {
        let ring_buf = self.fd.get_mut();
        while let Some(item) = ring_buf.next() {
            pump.handle(&item);
        }
    }
}

/// The perf buffer of a single CPU.
pub struct PerfSource {
    name: String,
    cpu: u32,
    buf: AsyncPerfEventArrayBuffer<MapData>,
    buffers: Vec<BytesMut>,
}

impl EventSource for PerfSource {
    async fn read_ready<T: Tracker>(&mut self, pump: &EventPump<T>) -> Result<()> {
        let events = self
            .buf
            .read_events(&mut self.buffers)
            .await
            .map_err(|e| Error::Channel {
                name: self.name.clone(),
                reason: format!("cpu {}: {}", self.cpu, e),
            })?;

        if events.lost > 0 {
            warn!(
                "Lost {} lookup event(s) on cpu {}",
                events.lost, self.cpu
            );
        }
        for buf in &self.buffers[..events.read] {
            pump.handle(buf);
        }
        Ok(())
    }
}
