use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{KmzError, Result};

/// Reports free bytes on the volume holding `path`, or `None` when the
/// platform cannot tell.
pub trait SpaceProbe {
    fn free_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by `statvfs`/`GetDiskFreeSpaceEx` through `fs2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fs2Probe;

impl SpaceProbe for Fs2Probe {
    fn free_bytes(&self, path: &Path) -> Option<u64> {
        match fs2::available_space(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Could not query free space for {:?}: {}", path, e);
                None
            }
        }
    }
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Option<u64>);

impl SpaceProbe for FixedProbe {
    fn free_bytes(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceVerdict {
    Sufficient { margin: u64 },
    Insufficient { deficit: u64 },
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceCheck {
    pub archive_size: u64,
    pub required: u64,
    pub available: Option<u64>,
    pub verdict: SpaceVerdict,
}

impl SpaceCheck {
    pub fn evaluate(archive_size: u64, expansion_factor: u64, available: Option<u64>) -> Self {
        let required = archive_size.saturating_mul(expansion_factor);
        let verdict = match available {
            Some(free) if free >= required => SpaceVerdict::Sufficient {
                margin: free - required,
            },
            Some(free) => SpaceVerdict::Insufficient {
                deficit: required - free,
            },
            None => SpaceVerdict::Unknown,
        };

        Self {
            archive_size,
            required,
            available,
            verdict,
        }
    }
}

/// Estimates whether `archive` can be fully extracted next to itself.
pub fn check_space_for_archive(
    archive: &Path,
    expansion_factor: u64,
    probe: &dyn SpaceProbe,
) -> Result<SpaceCheck> {
    let size = fs::metadata(archive)
        .map_err(|e| KmzError::io(archive, e))?
        .len();
    let dir = crate::config::archive_dir(archive);
    let available = probe.free_bytes(&dir);

    let check = SpaceCheck::evaluate(size, expansion_factor, available);
    debug!(
        "Space check for {:?}: size={} required={} available={:?}",
        archive, check.archive_size, check.required, check.available
    );
    Ok(check)
}

/// Human readable size, 1024 based: `1536` -> `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
