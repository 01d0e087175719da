#![no_std]

/// `AF_INET` as written by the probes into `LookupEvent::address_family`.
pub const AF_INET: u32 = 2;

pub const ADDRESS_LEN: usize = 16;
pub const HOSTNAME_LEN: usize = 252;

/// Size of one record on the wire: family tag, address buffer, hostname buffer.
pub const LOOKUP_EVENT_SIZE: usize = 4 + ADDRESS_LEN + HOSTNAME_LEN;

/// One name lookup as emitted by the resolver probes.
///
/// All integers are little-endian. `hostname` is NUL-terminated and zero
/// padded. `address` holds 4 significant bytes for `AF_INET` and 16 otherwise.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LookupEvent {
    pub address_family: u32,
    pub address: [u8; ADDRESS_LEN],
    pub hostname: [u8; HOSTNAME_LEN],
}

const _: () = assert!(core::mem::size_of::<LookupEvent>() == LOOKUP_EVENT_SIZE);

#[cfg(feature = "user")]
unsafe impl aya::Pod for LookupEvent {}
