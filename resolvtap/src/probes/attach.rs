use std::path::Path;

use log::{info, warn};

use crate::{
    error::{Error, Result},
    probes::ProbeHost,
    symbols::SymbolResolver,
    telemetry,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentOutcome {
    pub declared: usize,
    pub attached: usize,
    /// Raw names of probes whose target symbol is missing from the library.
    pub skipped: Vec<String>,
}

/// Attaches every declared probe to `library`.
///
/// A missing symbol only skips that probe; artifacts may declare probes for
/// functions that some libc builds do not export. Anything else, including a
/// kernel rejecting the attach, aborts the pass. Attaching nothing at all is
/// an error as well.
pub fn attach_all<H, R>(host: &mut H, resolver: &mut R, library: &Path) -> Result<AttachmentOutcome>
where
    H: ProbeHost + ?Sized,
    R: SymbolResolver + ?Sized,
{
    let probes = host.declared_probes();
    let mut outcome = AttachmentOutcome {
        declared: probes.len(),
        ..Default::default()
    };

    for probe in &probes {
        let offset = match resolver.resolve(library, &probe.target_function) {
            Ok(offset) => offset,
            Err(e @ Error::SymbolNotFound { .. }) => {
                warn!("Skipping {}: {}", probe.raw_name, e);
                telemetry::record_missing_symbol(&probe.target_function);
                outcome.skipped.push(probe.raw_name.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        host.attach(probe, library, offset)?;
        outcome.attached += 1;
    }

    if outcome.attached == 0 {
        return Err(Error::NoProbesAttached {
            declared: outcome.declared,
        });
    }

    info!(
        "Attached {}/{} probes to {}",
        outcome.attached,
        outcome.declared,
        library.display()
    );
    telemetry::record_attached_probes(outcome.attached as u64);
    Ok(outcome)
}
