//! Uprobe discovery and attachment.
//!
//! The artifact declares its probes by ELF section name (`uprobe/<function>`,
//! `uretprobe/<function>`). Offsets come from the runtime library's symbol
//! table, never from the kernel's own symbol lookup.

use std::path::Path;

use crate::error::Result;

pub mod attach;
pub mod catalog;

pub use attach::{AttachmentOutcome, attach_all};
pub use catalog::{ProbeDescriptor, ProbeKind, declared_probes, program_sections};

/// The part of a loaded artifact the attacher needs.
pub trait ProbeHost {
    fn declared_probes(&self) -> Vec<ProbeDescriptor>;

    /// Loads the probe's program and attaches it at `library`+`offset`.
    fn attach(&mut self, probe: &ProbeDescriptor, library: &Path, offset: u64) -> Result<()>;
}
