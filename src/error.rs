use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a pipeline run.
///
/// Per-item problems (a missing rename source, an image that fails to
/// decode) never surface here; they are counted in
/// [`RunStats`](crate::report::RunStats) instead.
#[derive(Debug, Error)]
pub enum KmzError {
    #[error("Failed to read archive {path}: {source}")]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(
        "Insufficient disk space for {path}: needs about {required} bytes, {available} bytes available (short by {shortfall} bytes)"
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
        shortfall: u64,
    },

    #[error("No entry matching '{pattern}' found in archive {path}")]
    NoMapEntry { path: PathBuf, pattern: String },

    #[error("Map document '{name}' not found under {root}")]
    MapDocumentNotFound { root: PathBuf, name: String },

    #[error("Media directory '{name}' not found under {root}")]
    MediaDirNotFound { root: PathBuf, name: String },

    #[error("Failed to parse map document: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("Invalid image reference pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to write ledger {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KmzError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Pipeline stage the error belongs to, used in the final report.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ArchiveUnreadable { .. }
            | Self::InsufficientSpace { .. }
            | Self::NoMapEntry { .. } => "extraction",
            Self::MapDocumentNotFound { .. } | Self::MediaDirNotFound { .. } => "location",
            Self::Parse(_) => "parsing",
            Self::Pattern(_) => "reference resolution",
            Self::LedgerWrite { .. } => "report",
            Self::Io { .. } => "filesystem",
        }
    }
}

pub type Result<T> = std::result::Result<T, KmzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_space_message_cites_shortfall() {
        let err = KmzError::InsufficientSpace {
            path: PathBuf::from("/tmp/a.kmz"),
            required: 500,
            available: 120,
            shortfall: 380,
        };

        let msg = err.to_string();
        assert!(msg.contains("short by 380 bytes"), "{}", msg);
        assert_eq!(err.stage(), "extraction");
    }
}
