//! The loaded instrumentation artifact.

use std::{collections::HashMap, fs, path::Path};

use aya::{Ebpf, EbpfError, programs::UProbe};
use aya_log::EbpfLogger;
use log::{debug, info, warn};

use crate::{
    channel::{self, OutputChannel},
    error::{Error, Result},
    events::EventSource,
    probes::{self, ProbeDescriptor, ProbeHost},
};

/// What the lifecycle controller needs from a loaded artifact.
///
/// Dropping it detaches every attached program and releases its maps.
pub trait Instrumentation: ProbeHost {
    type Source: EventSource;

    /// Opens the output channel `name`, one source per independently readable
    /// part.
    fn open_channel(&mut self, name: &str) -> Result<Vec<Self::Source>>;
}

/// An eBPF object loaded with aya, plus the section of every program in it.
pub struct Artifact {
    bpf: Ebpf,
    sections: HashMap<String, String>,
}

impl Artifact {
    pub fn load(path: &Path) -> Result<Self> {
        bump_memlock_rlimit();

        info!("Loading instrumentation artifact {}", path.display());
        let load_error = |source| Error::ArtifactLoad {
            path: path.to_path_buf(),
            source,
        };

        let data = fs::read(path).map_err(|error| {
            load_error(EbpfError::FileError {
                path: path.to_path_buf(),
                error,
            })
        })?;
        let mut bpf = Ebpf::load(&data).map_err(load_error)?;
        let sections = probes::program_sections(&data).map_err(|e| Error::BadBinary {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Artifact declares {} function(s)", sections.len());

        if let Err(e) = EbpfLogger::init(&mut bpf) {
            // Artifacts without log statements have no log map.
            warn!("Failed to initialize eBPF logger: {}", e);
        }
        Ok(Self { bpf, sections })
    }
}

impl ProbeHost for Artifact {
    fn declared_probes(&self) -> Vec<ProbeDescriptor> {
        probes::declared_probes(&self.bpf, &self.sections)
    }

    fn attach(&mut self, probe: &ProbeDescriptor, library: &Path, offset: u64) -> Result<()> {
        let rejected = |source| Error::AttachRejected {
            probe: probe.raw_name.clone(),
            library: library.to_path_buf(),
            offset,
            source,
        };

        let program: &mut UProbe = self
            .bpf
            .program_mut(&probe.program)
            .ok_or_else(|| Error::ProgramNotFound(probe.program.clone()))?
            .try_into()
            .map_err(|_| Error::ProgramNotFound(probe.program.clone()))?;

        program.load().map_err(rejected)?;
        program
            .attach(None, offset, library, None)
            .map_err(rejected)?;

        debug!(
            "Attached {} ({}) at {}+{:#x}",
            probe.raw_name,
            probe.program,
            library.display(),
            offset
        );
        Ok(())
    }
}

impl Instrumentation for Artifact {
    type Source = OutputChannel;

    fn open_channel(&mut self, name: &str) -> Result<Vec<OutputChannel>> {
        channel::open_channel(&mut self.bpf, name)
    }
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
}
