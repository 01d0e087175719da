//! Discovery of the C runtime library loaded into this process.
//!
//! The uprobes are attached to the same libc image our own process maps, so
//! discovery only ever looks at the current process.

use std::{
    ffi::{CStr, OsStr, c_void},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::{Error, Result};

pub const DEFAULT_LIBRARY_MARKER: &str = "libc.so";

pub trait RuntimeLibraryLocator {
    fn locate(&self) -> Result<PathBuf>;
}

/// Walks the dynamic linker's list of loaded objects.
pub struct LinkMapLocator {
    marker: String,
}

impl LinkMapLocator {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for LinkMapLocator {
    fn default() -> Self {
        Self::new(DEFAULT_LIBRARY_MARKER)
    }
}

struct LinkMapSearch<'a> {
    marker: &'a [u8],
    found: Option<PathBuf>,
}

unsafe extern "C" fn visit_loaded_object(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> libc::c_int {
    // SAFETY: `data` is the `LinkMapSearch` handed to `dl_iterate_phdr` below and
    // `info` is valid for the duration of the callback.
    let (search, info) = unsafe { (&mut *(data as *mut LinkMapSearch), &*info) };
    if info.dlpi_name.is_null() {
        return 0;
    }

    let name = unsafe { CStr::from_ptr(info.dlpi_name) }.to_bytes();
    if contains(name, search.marker) {
        search.found = Some(PathBuf::from(OsStr::from_bytes(name)));
        return 1;
    }
    0
}

impl RuntimeLibraryLocator for LinkMapLocator {
    fn locate(&self) -> Result<PathBuf> {
        let mut search = LinkMapSearch {
            marker: self.marker.as_bytes(),
            found: None,
        };

        unsafe {
            libc::dl_iterate_phdr(
                Some(visit_loaded_object),
                &mut search as *mut LinkMapSearch as *mut c_void,
            );
        }

        match search.found {
            Some(path) => {
                debug!("Found runtime library in link map: {}", path.display());
                Ok(path)
            }
            None => Err(Error::LibraryNotFound(self.marker.clone())),
        }
    }
}

/// Reads `/proc/self/maps` for a mapped file matching the marker.
///
/// The marker is matched against the full mapped path, the same way the
/// link-map walk matches it.
pub struct ProcMapsLocator {
    marker: String,
}

impl ProcMapsLocator {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl RuntimeLibraryLocator for ProcMapsLocator {
    fn locate(&self) -> Result<PathBuf> {
        let not_found = || Error::LibraryNotFound(self.marker.clone());
        let maps = procfs::process::Process::myself()
            .and_then(|process| process.maps())
            .map_err(|e| {
                debug!("Failed to read /proc/self/maps: {}", e);
                not_found()
            })?;

        let mapped = maps.into_iter().filter_map(|map| match map.pathname {
            procfs::process::MMapPath::Path(path) => Some(path),
            _ => None,
        });
        let path = first_match(mapped, &self.marker).ok_or_else(not_found)?;
        debug!("Found runtime library in memory maps: {}", path.display());
        Ok(path)
    }
}

fn first_match(paths: impl IntoIterator<Item = PathBuf>, marker: &str) -> Option<PathBuf> {
    paths
        .into_iter()
        .find(|path| contains(path.as_os_str().as_bytes(), marker.as_bytes()))
}

/// Always answers with the same path.
pub struct FixedLocator {
    path: PathBuf,
}

impl FixedLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuntimeLibraryLocator for FixedLocator {
    fn locate(&self) -> Result<PathBuf> {
        if !Path::new(&self.path).exists() {
            return Err(Error::LibraryNotFound(self.path.display().to_string()));
        }
        Ok(self.path.clone())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
