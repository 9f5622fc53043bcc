//! On-disk layout of the controller's state

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the controller
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for attempt records and locks
    pub state_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Directory holding one subdirectory of attempt records per stack
    pub fn attempts_dir(&self) -> Dir {
        Dir::new(self.state_dir.join("attempts"))
    }

    /// Directory holding one lock file per stack with an attempt in flight
    pub fn locks_dir(&self) -> Dir {
        Dir::new(self.state_dir.join("locks"))
    }

    /// Default settings file
    pub fn default_settings_file() -> File {
        #[cfg(target_os = "linux")]
        let path = PathBuf::from("/etc/stackroll/settings.json");

        #[cfg(not(target_os = "linux"))]
        let path = home_dir().join(".stackroll").join("settings.json");

        File::new(path)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        // /var/lib on Linux, the home directory elsewhere
        #[cfg(target_os = "linux")]
        let state_dir = PathBuf::from("/var/lib/stackroll");

        #[cfg(not(target_os = "linux"))]
        let state_dir = home_dir().join(".stackroll").join("state");

        Self::new(state_dir)
    }
}

#[cfg(not(target_os = "linux"))]
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
