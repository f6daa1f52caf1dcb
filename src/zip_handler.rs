use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::PipelineConfig;
use crate::error::{KmzError, Result};
use crate::space::{check_space_for_archive, format_bytes, SpaceProbe, SpaceVerdict};

#[cfg(windows)]
const OUT_OF_SPACE_CODES: &[i32] = &[39, 112];
#[cfg(not(windows))]
const OUT_OF_SPACE_CODES: &[i32] = &[28];

/// Archive entries an earlier run renamed or converted away, one path
/// relative to the work directory per line.
pub const CONSUMED_MANIFEST: &str = ".kmz-consumed";

/// Why only the map document was extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducedReason {
    /// Free space was below the estimate before extraction started.
    PreCheckShortfall { required: u64, available: u64 },
    /// The filesystem filled up during full extraction.
    OutOfSpace,
}

impl fmt::Display for ReducedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreCheckShortfall {
                required,
                available,
            } => write!(
                f,
                "estimated {} needed but only {} free",
                format_bytes(*required),
                format_bytes(*available)
            ),
            Self::OutOfSpace => f.write_str("disk ran out of space during extraction"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionMode {
    Full,
    /// Map document only; media steps are skipped.
    Reduced(ReducedReason),
}

impl ExtractionMode {
    pub fn media_available(&self) -> bool {
        matches!(self, Self::Full)
    }
}

#[derive(Debug)]
pub enum ExtractionOutcome {
    Full,
    Reduced(ReducedReason),
    Failed(KmzError),
}

impl ExtractionOutcome {
    pub fn into_result(self) -> Result<ExtractionMode> {
        match self {
            Self::Full => Ok(ExtractionMode::Full),
            Self::Reduced(reason) => Ok(ExtractionMode::Reduced(reason)),
            Self::Failed(e) => Err(e),
        }
    }
}

enum UnpackError {
    OutOfSpace(PathBuf, io::Error),
    Fatal(KmzError),
}

impl From<KmzError> for UnpackError {
    fn from(e: KmzError) -> Self {
        Self::Fatal(e)
    }
}

impl UnpackError {
    fn from_io(path: &Path, e: io::Error) -> Self {
        if is_out_of_space(&e) {
            Self::OutOfSpace(path.to_path_buf(), e)
        } else {
            Self::Fatal(KmzError::io(path, e))
        }
    }
}

pub fn is_out_of_space(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::StorageFull
        || e.raw_os_error()
            .is_some_and(|code| OUT_OF_SPACE_CODES.contains(&code))
}

pub struct ZipHandler {
    archive_path: PathBuf,
}

impl ZipHandler {
    pub fn new<P: AsRef<Path>>(archive_path: P) -> Self {
        Self {
            archive_path: archive_path.as_ref().to_path_buf(),
        }
    }

    /// Extracts the archive into `work_dir`, falling back to the map
    /// document alone when disk space runs short.
    pub fn extract(
        &self,
        work_dir: &Path,
        config: &PipelineConfig,
        probe: &dyn SpaceProbe,
    ) -> ExtractionOutcome {
        let check = match check_space_for_archive(
            &self.archive_path,
            config.expansion_factor,
            probe,
        ) {
            Ok(check) => check,
            Err(e) => return ExtractionOutcome::Failed(e),
        };

        info!("Archive size: {}", format_bytes(check.archive_size));
        match check.available {
            Some(free) => info!("Free disk space: {}", format_bytes(free)),
            None => warn!("Free disk space unknown, extracting without pre-check"),
        }

        if let SpaceVerdict::Insufficient { deficit } = check.verdict {
            let available = check.available.unwrap_or(0);
            warn!(
                "Insufficient disk space: need about {}, {} available (short by {})",
                format_bytes(check.required),
                format_bytes(available),
                format_bytes(deficit)
            );

            let shortfall = KmzError::InsufficientSpace {
                path: self.archive_path.clone(),
                required: check.required,
                available,
                shortfall: deficit,
            };
            if !config.fallback_on_shortfall {
                return ExtractionOutcome::Failed(shortfall);
            }

            let reason = ReducedReason::PreCheckShortfall {
                required: check.required,
                available,
            };
            return match self.extract_map_only(work_dir, &config.map_entry_pattern) {
                Ok(_) => ExtractionOutcome::Reduced(reason),
                Err(UnpackError::OutOfSpace(..)) => ExtractionOutcome::Failed(shortfall),
                Err(UnpackError::Fatal(e)) => ExtractionOutcome::Failed(e),
            };
        }

        match self.extract_all(work_dir) {
            Ok(count) => {
                info!("Extracted {} entries into {:?}", count, work_dir);
                ExtractionOutcome::Full
            }
            Err(UnpackError::OutOfSpace(path, e)) => {
                warn!("Out of disk space while writing {:?}: {}", path, e);
                self.retry_map_only(work_dir, &config.map_entry_pattern)
            }
            Err(UnpackError::Fatal(e)) => ExtractionOutcome::Failed(e),
        }
    }

    /// Discards the partial tree and extracts only the map document.
    pub fn retry_map_only(&self, work_dir: &Path, pattern: &str) -> ExtractionOutcome {
        if work_dir.exists() {
            info!("Removing partially extracted directory {:?}", work_dir);
            if let Err(e) = fs::remove_dir_all(work_dir) {
                return ExtractionOutcome::Failed(KmzError::io(work_dir, e));
            }
        }

        match self.extract_map_only(work_dir, pattern) {
            Ok(_) => ExtractionOutcome::Reduced(ReducedReason::OutOfSpace),
            Err(UnpackError::OutOfSpace(path, e)) => {
                ExtractionOutcome::Failed(KmzError::io(path, e))
            }
            Err(UnpackError::Fatal(e)) => ExtractionOutcome::Failed(e),
        }
    }

    fn open(&self) -> Result<ZipArchive<File>> {
        let file =
            File::open(&self.archive_path).map_err(|e| KmzError::io(&self.archive_path, e))?;
        ZipArchive::new(file).map_err(|source| KmzError::ArchiveUnreadable {
            path: self.archive_path.clone(),
            source,
        })
    }

    fn entry_error(&self, source: zip::result::ZipError) -> KmzError {
        KmzError::ArchiveUnreadable {
            path: self.archive_path.clone(),
            source,
        }
    }

    fn extract_all(&self, work_dir: &Path) -> std::result::Result<usize, UnpackError> {
        let mut archive = self.open()?;
        fs::create_dir_all(work_dir).map_err(|e| UnpackError::from_io(work_dir, e))?;

        let consumed = load_consumed(work_dir);
        let mut count = 0;
        let mut kept_consumed = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| self.entry_error(e))?;

            // アーカイブ外に出るパスは展開しない
            let Some(relative) = entry.enclosed_name() else {
                warn!("Skipping unsafe entry name: {}", entry.name());
                continue;
            };
            let out_path = work_dir.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path).map_err(|e| UnpackError::from_io(&out_path, e))?;
                continue;
            }

            // 前回の実行でリネーム・変換済みのファイルは戻さない
            if consumed.contains(&manifest_key(&relative)) {
                debug!("Already processed by an earlier run: {}", entry.name());
                kept_consumed += 1;
                continue;
            }

            write_entry(&mut entry, &out_path)?;
            count += 1;
        }

        if kept_consumed > 0 {
            info!(
                "{} entries processed by an earlier run were not extracted again",
                kept_consumed
            );
        }
        Ok(count)
    }

    /// Records the file entries that no longer exist under `work_dir`, so
    /// that a later extraction into the same tree does not bring them back.
    /// Returns the number of newly recorded entries.
    pub fn remember_consumed(&self, work_dir: &Path) -> Result<usize> {
        let mut archive = self.open()?;
        let mut consumed = load_consumed(work_dir);
        let before = consumed.len();

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| self.entry_error(e))?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                continue;
            };
            if !work_dir.join(&relative).exists() {
                consumed.insert(manifest_key(&relative));
            }
        }

        let mut lines: Vec<&str> = consumed.iter().map(String::as_str).collect();
        lines.sort_unstable();
        let path = work_dir.join(CONSUMED_MANIFEST);
        fs::write(&path, lines.join("\n")).map_err(|e| KmzError::io(&path, e))?;

        let added = consumed.len() - before;
        debug!("{} consumed entries recorded in {:?}", added, path);
        Ok(added)
    }

    /// Extracts entries whose name contains `pattern` (case-insensitive),
    /// flattened into `work_dir`.
    fn extract_map_only(
        &self,
        work_dir: &Path,
        pattern: &str,
    ) -> std::result::Result<Vec<String>, UnpackError> {
        info!("Extracting only entries matching '{}'", pattern);

        let mut archive = self.open()?;
        fs::create_dir_all(work_dir).map_err(|e| UnpackError::from_io(work_dir, e))?;

        let needle = pattern.to_lowercase();
        let mut extracted = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| self.entry_error(e))?;
            if entry.is_dir() || !entry.name().to_lowercase().contains(&needle) {
                continue;
            }

            let Some(file_name) = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_os_string()))
            else {
                warn!("Skipping unsafe entry name: {}", entry.name());
                continue;
            };

            debug!("Extracting {}", entry.name());
            write_entry(&mut entry, &work_dir.join(file_name))?;
            extracted.push(entry.name().to_string());
        }

        if extracted.is_empty() {
            return Err(UnpackError::Fatal(KmzError::NoMapEntry {
                path: self.archive_path.clone(),
                pattern: pattern.to_string(),
            }));
        }

        warn!(
            "Map-only extraction finished ({} entries); images were not extracted",
            extracted.len()
        );
        Ok(extracted)
    }
}

/// `a/b.png` on every platform.
fn manifest_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn load_consumed(work_dir: &Path) -> HashSet<String> {
    let path = work_dir.join(CONSUMED_MANIFEST);
    match fs::read_to_string(&path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => {
            warn!("Could not read {:?}, extracting everything: {}", path, e);
            HashSet::new()
        }
    }
}

fn write_entry(entry: &mut impl Read, out_path: &Path) -> std::result::Result<u64, UnpackError> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| UnpackError::from_io(parent, e))?;
    }

    let file = File::create(out_path).map_err(|e| UnpackError::from_io(out_path, e))?;
    let mut writer = BufWriter::new(file);
    let written = io::copy(entry, &mut writer).map_err(|e| UnpackError::from_io(out_path, e))?;
    writer
        .flush()
        .map_err(|e| UnpackError::from_io(out_path, e))?;

    Ok(written)
}
