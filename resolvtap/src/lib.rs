pub mod artifact;
pub mod channel;
pub mod error;
pub mod events;
pub mod library;
pub mod probes;
pub mod settings;
pub mod sink;
pub mod symbols;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

use std::{fmt, future::Future, sync::Arc};

use log::{info, warn};

use crate::artifact::{Artifact, Instrumentation};
use crate::error::Result;
use crate::events::EventPump;
use crate::library::RuntimeLibraryLocator;
use crate::probes::attach_all;
use crate::settings::Settings;
use crate::sink::Tracker;
use crate::symbols::ElfSymbolResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Attaching,
    Polling,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Attaching => "attaching",
            LifecycleState::Polling => "polling",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Owns the instrumentation artifact for the length of one run.
pub struct ResolvTap<T> {
    pub settings: Settings,
    tracker: Arc<T>,
}

impl<T: Tracker> ResolvTap<T> {
    pub fn new(settings: Settings, tracker: T) -> Self {
        Self {
            settings,
            tracker: Arc::new(tracker),
        }
    }

    /// Loads and attaches the probes, pumps events until `shutdown` resolves,
    /// then tears everything down.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let artifact = Artifact::load(&self.settings.artifact_path)?;
        let locator = self.settings.locator();
        self.run_with(artifact, locator.as_ref(), shutdown).await
    }

    /// Runs the lifecycle over an already loaded artifact.
    ///
    /// Every early return drops the artifact, which detaches any probes that
    /// were already attached. Once polling, the pump is stopped and joined
    /// before the artifact is dropped, whether `shutdown` resolved or the
    /// pump failed on its own.
    pub async fn run_with<A, L, F>(&self, mut artifact: A, locator: &L, shutdown: F) -> Result<()>
    where
        A: Instrumentation,
        L: RuntimeLibraryLocator + ?Sized,
        F: Future<Output = ()>,
    {
        enter(LifecycleState::Loaded);

        enter(LifecycleState::Attaching);
        let library = locator.locate()?;
        info!("Runtime library: {}", library.display());
        let mut resolver = ElfSymbolResolver::new();
        let outcome = attach_all(&mut artifact, &mut resolver, &library)?;
        if !outcome.skipped.is_empty() {
            warn!(
                "{} probe(s) skipped: {}",
                outcome.skipped.len(),
                outcome.skipped.join(", ")
            );
        }

        let channel = &self.settings.events_channel;
        let sources = artifact.open_channel(channel)?;
        let mut pump = EventPump::from_shared(self.tracker.clone()).spawn(channel, sources);
        enter(LifecycleState::Polling);
        info!("Monitoring active. Press Ctrl-C to exit.");

        let failure = tokio::select! {
            _ = shutdown => None,
            e = pump.failed() => Some(e),
        };

        enter(LifecycleState::Stopping);
        pump.stop().await;
        drop(artifact);
        enter(LifecycleState::Unloaded);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn enter(state: LifecycleState) {
    info!("Lifecycle: {}", state);
}
