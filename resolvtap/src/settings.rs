use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::library::{
    DEFAULT_LIBRARY_MARKER, FixedLocator, LinkMapLocator, ProcMapsLocator, RuntimeLibraryLocator,
};

pub const DEFAULT_ARTIFACT_PATH: &str = "/etc/resolvtap/resolvtap-dns.o";
pub const DEFAULT_EVENTS_CHANNEL: &str = "events";

const ENV_PREFIX: &str = "RESOLVTAP";

/// How the runtime library is discovered.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    #[default]
    LinkMap,
    ProcMaps,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub artifact_path: PathBuf,
    pub events_channel: String,
    pub library_marker: String,
    /// Skips discovery and probes this library.
    pub library_path: Option<PathBuf>,
    pub locator: LocatorKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_PATH),
            events_channel: DEFAULT_EVENTS_CHANNEL.to_string(),
            library_marker: DEFAULT_LIBRARY_MARKER.to_string(),
            library_path: None,
            locator: LocatorKind::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional config file, then `RESOLVTAP__*` variables.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn locator(&self) -> Box<dyn RuntimeLibraryLocator + Send + Sync> {
        if let Some(path) = &self.library_path {
            return Box::new(FixedLocator::new(path));
        }

        match self.locator {
            LocatorKind::LinkMap => Box::new(LinkMapLocator::new(&self.library_marker)),
            LocatorKind::ProcMaps => Box::new(ProcMapsLocator::new(&self.library_marker)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        let settings = Settings::new(None).expect("Failed to load settings");

        assert_eq!(settings.artifact_path, PathBuf::from(DEFAULT_ARTIFACT_PATH));
        assert_eq!(settings.events_channel, "events");
        assert_eq!(settings.library_marker, "libc.so");
        assert_eq!(settings.library_path, None);
        assert_eq!(settings.locator, LocatorKind::LinkMap);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("RESOLVTAP__ARTIFACT_PATH", "/opt/dns.o");
            std::env::set_var("RESOLVTAP__LOCATOR", "proc_maps");
        }

        let settings = Settings::new(None).expect("Failed to load settings");

        assert_eq!(settings.artifact_path, PathBuf::from("/opt/dns.o"));
        assert_eq!(settings.locator, LocatorKind::ProcMaps);

        unsafe {
            std::env::remove_var("RESOLVTAP__ARTIFACT_PATH");
            std::env::remove_var("RESOLVTAP__LOCATOR");
        }
    }

    #[test]
    #[serial]
    fn test_config_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "events_channel: lookups").unwrap();
        writeln!(file, "library_path: /lib/libc.so.6").unwrap();

        let settings = Settings::new(Some(file.path())).expect("Failed to load settings");

        assert_eq!(settings.events_channel, "lookups");
        assert_eq!(settings.library_path, Some(PathBuf::from("/lib/libc.so.6")));
        assert_eq!(settings.library_marker, "libc.so");
    }

    #[test]
    #[serial]
    fn test_missing_config_file() {
        assert!(Settings::new(Some(Path::new("/nonexistent/resolvtap.yaml"))).is_err());
    }
}
