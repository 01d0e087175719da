use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use resolvtap::events::{EventPump, Resolution};
use resolvtap::sink::ChannelTracker;
use resolvtap_common::LOOKUP_EVENT_SIZE;

fn lookup_record(family: u32, address: &[u8], hostname: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOOKUP_EVENT_SIZE);
    buf.extend_from_slice(&family.to_le_bytes());
    let mut addr = [0u8; 16];
    addr[..address.len()].copy_from_slice(address);
    buf.extend_from_slice(&addr);
    let mut host = [0u8; 252];
    host[..hostname.len()].copy_from_slice(hostname.as_bytes());
    buf.extend_from_slice(&host);
    buf
}

#[test]
fn test_ipv4_lookup_is_tracked_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let pump = EventPump::new({
        let calls = calls.clone();
        move |ip: &str, host: &str| calls.lock().unwrap().push((ip.to_string(), host.to_string()))
    });

    pump.handle(&lookup_record(2, &[192, 168, 1, 1], "example.com"));

    assert_eq!(
        *calls.lock().unwrap(),
        vec![("192.168.1.1".to_string(), "example.com".to_string())]
    );
}

#[test]
fn test_lookups_reach_channel_in_order() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pump = EventPump::new(ChannelTracker::new(tx));

    let v6 = [
        0x26, 0x06, 0x47, 0x00, 0x47, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0x11, 0x11,
    ];
    pump.handle(&lookup_record(2, &[93, 184, 216, 34], "example.org"));
    pump.handle(&[0u8; 8]);
    pump.handle(&lookup_record(10, &v6, "one.one.one.one"));
    pump.handle(&lookup_record(2, &[93, 184, 216, 34], "example.org"));

    let received: Vec<Resolution> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let rendered: Vec<String> = received
        .iter()
        .map(|r| format!("{} {}", r.address, r.hostname))
        .collect();

    assert_eq!(
        rendered,
        vec![
            "93.184.216.34 example.org",
            "2606:4700:4700::1111 one.one.one.one",
            "93.184.216.34 example.org",
        ]
    );
}

#[test]
fn test_channel_receives_decoded_address() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pump = EventPump::new(ChannelTracker::new(tx));

    let mapped = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 10, 1, 2, 3];
    let decoded = pump
        .handle(&lookup_record(10, &mapped, "mapped.example"))
        .unwrap();

    let received = rx.try_recv().unwrap();
    assert_eq!(received, decoded);
    assert_eq!(received.address, IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
}
