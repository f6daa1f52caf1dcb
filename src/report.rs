use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::classify::Outcome;
use crate::config::{
    ENTRY_DELIMITER, REGULARIZE_LEDGER_FILE, SAVABLE_LEDGER_FILE, UNKNOWN_LEDGER_SUFFIX,
};
use crate::error::{KmzError, Result};
use crate::media::{ConversionStats, RenameStats};
use crate::zip_handler::ExtractionMode;

/// 色が取得できなかった場合の注記
pub const COLOR_NOT_FOUND: &str = "não encontrada";

/// `"<name> |"`
pub fn ledger_entry(name: &str) -> String {
    format!("{}{}", name, ENTRY_DELIMITER)
}

/// `"<name> | (Cor: <code>)"`
pub fn unknown_entry(name: &str, color: Option<&str>) -> String {
    format!(
        "{} (Cor: {})",
        ledger_entry(name),
        color.filter(|c| !c.is_empty()).unwrap_or(COLOR_NOT_FOUND)
    )
}

/// Ordered, deduplicated entries for one output file.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl Ledger {
    /// Appends `entry` unless it is already present.
    pub fn push(&mut self, entry: String) -> bool {
        if self.seen.contains(&entry) {
            return false;
        }
        self.seen.insert(entry.clone());
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contents(&self) -> String {
        self.entries.join("\n")
    }

    /// Replaces `path` with the ledger contents. An empty ledger writes
    /// nothing and returns `false`.
    pub fn write_to(&self, path: &Path) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| KmzError::LedgerWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, self.contents()).map_err(|e| KmzError::LedgerWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(true)
    }
}

/// The three classification ledgers of a run.
#[derive(Debug, Default, Clone)]
pub struct Ledgers {
    pub savable: Ledger,
    pub must_regularize: Ledger,
    pub unknown: Ledger,
}

impl Ledgers {
    pub fn record(&mut self, name: &str, outcome: Outcome, color: Option<&str>) {
        let added = match outcome {
            Outcome::Savable => self.savable.push(ledger_entry(name)),
            Outcome::MustRegularize => self.must_regularize.push(ledger_entry(name)),
            Outcome::Unknown => self.unknown.push(unknown_entry(name, color)),
        };
        if !added {
            warn!("Duplicate {} entry ignored: {}", outcome, name);
        }
    }

    pub fn get(&self, outcome: Outcome) -> &Ledger {
        match outcome {
            Outcome::Savable => &self.savable,
            Outcome::MustRegularize => &self.must_regularize,
            Outcome::Unknown => &self.unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub savable: PathBuf,
    pub must_regularize: PathBuf,
    pub unknown: PathBuf,
}

impl LedgerPaths {
    pub fn new(output_dir: &Path, archive_base: &str) -> Self {
        Self {
            savable: output_dir.join(SAVABLE_LEDGER_FILE),
            must_regularize: output_dir.join(REGULARIZE_LEDGER_FILE),
            unknown: output_dir.join(format!("{}{}", archive_base, UNKNOWN_LEDGER_SUFFIX)),
        }
    }

    pub fn get(&self, outcome: Outcome) -> &Path {
        match outcome {
            Outcome::Savable => &self.savable,
            Outcome::MustRegularize => &self.must_regularize,
            Outcome::Unknown => &self.unknown,
        }
    }
}

#[derive(Debug, Default)]
pub struct LedgerWrites {
    pub written: Vec<PathBuf>,
    pub failures: Vec<KmzError>,
}

/// Writes every non-empty ledger. A failure is logged and recorded; the
/// remaining ledgers are still written.
pub fn write_ledgers(ledgers: &Ledgers, paths: &LedgerPaths) -> LedgerWrites {
    let mut writes = LedgerWrites::default();

    for outcome in [Outcome::Savable, Outcome::MustRegularize, Outcome::Unknown] {
        let ledger = ledgers.get(outcome);
        let path = paths.get(outcome);
        match ledger.write_to(path) {
            Ok(true) => {
                info!("{} {} entries written to {:?}", ledger.len(), outcome, path);
                writes.written.push(path.to_path_buf());
            }
            Ok(false) => info!("No {} entries, {:?} not written", outcome, path),
            Err(e) => {
                error!("{}", e);
                writes.failures.push(e);
            }
        }
    }

    writes
}

/// Run counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total_placemarks: usize,
    /// Placemarks classified.
    pub processed: usize,
    /// Placemarks without a usable name.
    pub skipped: usize,
    pub without_description: usize,
    pub savable: usize,
    pub must_regularize: usize,
    pub unknown: usize,
    /// Style references pointing at no definition.
    pub dangling_styles: usize,
    pub images_mapped: usize,
    pub canonical_collisions: usize,
    pub remapped_sources: usize,
    pub reference_errors: usize,
    pub rename: RenameStats,
    pub conversion: ConversionStats,
}

impl RunStats {
    pub fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Savable => self.savable += 1,
            Outcome::MustRegularize => self.must_regularize += 1,
            Outcome::Unknown => self.unknown += 1,
        }
    }
}

/// Everything a finished run has to say.
#[derive(Debug)]
pub struct RunReport {
    pub archive: PathBuf,
    pub mode: ExtractionMode,
    pub stats: RunStats,
    pub written: Vec<PathBuf>,
    pub write_failures: Vec<KmzError>,
    /// Degraded conditions, in the order they occurred.
    pub degradations: Vec<String>,
}

impl RunReport {
    pub fn new(archive: &Path, mode: ExtractionMode) -> Self {
        Self {
            archive: archive.to_path_buf(),
            mode,
            stats: RunStats::default(),
            written: Vec::new(),
            write_failures: Vec::new(),
            degradations: Vec::new(),
        }
    }

    pub fn degrade(&mut self, note: impl Into<String>) {
        let note = note.into();
        warn!("Degraded: {}", note);
        self.degradations.push(note);
    }

    pub fn record_writes(&mut self, writes: LedgerWrites) {
        self.written.extend(writes.written);
        self.write_failures.extend(writes.failures);
    }

    /// All ledgers reached the disk.
    pub fn is_complete(&self) -> bool {
        self.write_failures.is_empty()
    }

    pub fn log_summary(&self) {
        let s = &self.stats;
        info!("Summary for {:?}", self.archive);
        match &self.mode {
            ExtractionMode::Full => info!("  Extraction: full"),
            ExtractionMode::Reduced(reason) => {
                info!("  Extraction: map document only ({})", reason)
            }
        }
        info!("  Placemarks: {} total", s.total_placemarks);
        info!("  Processed: {}", s.processed);
        info!("  Skipped: {}", s.skipped);
        info!("  Without description: {}", s.without_description);
        info!("  Savable: {}", s.savable);
        info!("  Must regularize: {}", s.must_regularize);
        info!("  Unknown color: {}", s.unknown);
        info!("  Dangling style references: {}", s.dangling_styles);

        if self.mode.media_available() {
            info!(
                "  Images: {} mapped, {} canonical name collisions, {} remapped",
                s.images_mapped, s.canonical_collisions, s.remapped_sources
            );
            info!(
                "  Renames: {} done, {} already satisfied, {} not found, {} failed",
                s.rename.renamed, s.rename.already_satisfied, s.rename.not_found, s.rename.failed
            );
            info!(
                "  Conversion: {} converted, {} extensions normalized, {} already JPEG, {} skipped, {} non-image, {} errors",
                s.conversion.converted,
                s.conversion.extension_normalized,
                s.conversion.already_canonical,
                s.conversion.skipped_existing,
                s.conversion.non_image,
                s.conversion.errors
            );
        } else {
            info!("  Images: skipped (no media extracted)");
        }
        if s.reference_errors > 0 {
            info!("  Reference errors: {}", s.reference_errors);
        }

        for path in &self.written {
            info!("  Written: {:?}", path);
        }
        for failure in &self.write_failures {
            warn!("  Not written: {}", failure);
        }
        for note in &self.degradations {
            warn!("  Degraded: {}", note);
        }
    }
}
