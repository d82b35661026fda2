use std::fmt;

use serde::Serialize;

/// Lifecycle of one manager, i.e. one deployed cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, nothing fetched yet.
    Parsed,
    /// Fetching the manifest.
    Installing,
    /// Manifest committed; eligible for activation immediately.
    Installed,
    /// Evicting other versions' buckets.
    Activating,
    /// Serving fetches.
    Activated,
    /// Install failed, or a newer version took over.
    Redundant,
}

impl WorkerState {
    pub fn can_install(self) -> bool {
        matches!(self, Self::Parsed | Self::Redundant)
    }

    pub fn can_activate(self) -> bool {
        self == Self::Installed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
