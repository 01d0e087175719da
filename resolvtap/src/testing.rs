//! Test fixtures shared by the unit tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

use object::write;
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{Error, Result};
use crate::events::{EventPump, EventSource};
use crate::sink::Tracker;

/// Ordered record of teardown steps, shared between fakes.
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

/// A relocatable x86-64 ELF with the given `(name, address)` text symbols.
pub fn build_elf(symbols: &[(&str, u64)]) -> Vec<u8> {
    let mut obj = write::Object::new(
        BinaryFormat::Elf,
        Architecture::X86_64,
        Endianness::Little,
    );
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.append_section_data(text, &[0xc3; 0x6000], 16);
    for (name, value) in symbols {
        obj.add_symbol(write::Symbol {
            name: name.as_bytes().to_vec(),
            value: *value,
            size: 16,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: write::SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }
    obj.write().expect("failed to write test ELF")
}

pub fn write_elf(symbols: &[(&str, u64)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&build_elf(symbols)).unwrap();
    file
}

/// An event source fed from an in-process queue.
///
/// Reading fails once every sender is gone, like a channel whose fd broke.
pub struct QueueSource {
    rx: UnboundedReceiver<Vec<u8>>,
    journal: Option<Journal>,
}

impl QueueSource {
    pub fn new() -> (UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = unbounded_channel();
        (tx, Self { rx, journal: None })
    }

    /// Notes "source released" in `journal` when dropped.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl EventSource for QueueSource {
    async fn read_ready<T: Tracker>(&mut self, pump: &EventPump<T>) -> Result<()> {
        match self.rx.recv().await {
            Some(buf) => {
                pump.handle(&buf);
                Ok(())
            }
            None => Err(Error::Channel {
                name: "queue".to_string(),
                reason: "all senders dropped".to_string(),
            }),
        }
    }

    fn drain<T: Tracker>(&mut self, pump: &EventPump<T>) {
        while let Ok(buf) = self.rx.try_recv() {
            pump.handle(&buf);
        }
    }
}

impl Drop for QueueSource {
    fn drop(&mut self) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push("source released");
        }
    }
}
