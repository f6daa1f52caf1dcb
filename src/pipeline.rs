use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classify::classify;
use crate::config::{archive_base_name, work_dir_for, PipelineConfig};
use crate::error::{KmzError, Result};
use crate::locator::{locate_map_document, locate_media_dir};
use crate::media::{apply_mappings, ImageMappings, JpegNormalizer};
use crate::model::MapDocument;
use crate::naming::{canonical_stem, sanitize_file_name};
use crate::parser::parse_kml;
use crate::references::ReferenceResolver;
use crate::report::{write_ledgers, LedgerPaths, Ledgers, RunReport};
use crate::space::{Fs2Probe, SpaceProbe};
use crate::style::{self, StyleResolution};
use crate::zip_handler::{ExtractionMode, ZipHandler};

/// A fatal error together with whatever the run had gathered by then.
#[derive(Debug, Error)]
#[error("{} failed: {}", .error.stage(), .error)]
pub struct RunFailure {
    pub error: KmzError,
    /// Present once classification has run; its ledgers are already written.
    pub report: Option<Box<RunReport>>,
}

impl RunFailure {
    pub fn stage(&self) -> &'static str {
        self.error.stage()
    }
}

impl From<KmzError> for RunFailure {
    fn from(error: KmzError) -> Self {
        Self {
            error,
            report: None,
        }
    }
}

/// Runs the whole classification pipeline for one archive.
pub struct KmzProcessor {
    archive: PathBuf,
    config: PipelineConfig,
    probe: Box<dyn SpaceProbe>,
}

impl KmzProcessor {
    pub fn new<P: AsRef<Path>>(archive: P, config: PipelineConfig) -> Self {
        Self {
            archive: archive.as_ref().to_path_buf(),
            config,
            probe: Box::new(Fs2Probe),
        }
    }

    /// Replaces the free-space probe used by the extraction pre-check.
    pub fn with_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        work_dir_for(&self.archive)
    }

    pub fn ledger_paths(&self) -> LedgerPaths {
        LedgerPaths::new(
            &self.config.output_dir_for(&self.archive),
            &archive_base_name(&self.archive),
        )
    }

    /// Extracts, classifies, writes the ledgers and then renames and
    /// converts the media.
    ///
    /// A missing media folder after full extraction is fatal, but only
    /// after the ledgers have been written; the failure then carries the
    /// report.
    pub fn run(&self) -> std::result::Result<RunReport, RunFailure> {
        info!("Processing archive: {:?}", self.archive);
        let work_dir = self.work_dir();

        // 展開
        let handler = ZipHandler::new(&self.archive);
        let mode = handler
            .extract(&work_dir, &self.config, self.probe.as_ref())
            .into_result()?;
        let mut report = RunReport::new(&self.archive, mode.clone());
        if let ExtractionMode::Reduced(reason) = &mode {
            report.degrade(format!("only the map document was extracted: {}", reason));
        }

        // KMLの読み込み
        let map_document = locate_map_document(&work_dir, &self.config.map_document_name)?;
        let document = read_document(&map_document)?;
        info!(
            "Parsed {} placemarks and {} shared styles",
            document.placemarks.len(),
            document.shared_styles.len()
        );

        // 縮小モードではメディアを探さない
        let (media_dir, media_error) = if mode.media_available() {
            match locate_media_dir(&work_dir, &map_document, &self.config.media_dir_name) {
                Ok(dir) => {
                    info!("Media directory: {:?}", dir);
                    (Some(dir), None)
                }
                Err(e) => {
                    error!("{}", e);
                    (None, Some(e))
                }
            }
        } else {
            info!("Media steps skipped in map-only mode");
            (None, None)
        };

        let resolver = ReferenceResolver::new(&self.config.media_dir_name)?;
        let mut ledgers = Ledgers::default();
        let mut mappings = ImageMappings::default();
        self.classify_placemarks(
            &document,
            media_dir.as_deref(),
            &resolver,
            &mut ledgers,
            &mut mappings,
            &mut report,
        );

        if report.stats.dangling_styles > 0 {
            let note = format!(
                "{} style references point at missing definitions",
                report.stats.dangling_styles
            );
            report.degrade(note);
        }
        if report.stats.without_description > 0 {
            let note = format!(
                "{} placemarks have no description",
                report.stats.without_description
            );
            report.degrade(note);
        }

        // 致命的なエラーでも台帳は先に書き出す
        report.record_writes(write_ledgers(&ledgers, &self.ledger_paths()));
        if let Some(error) = media_error {
            return Err(RunFailure {
                error,
                report: Some(Box::new(report)),
            });
        }

        if let Some(media_dir) = media_dir {
            self.process_media(&media_dir, &mappings, &mut report);
            // 再実行時に元ファイルを再展開しないよう記録する
            if let Err(e) = handler.remember_consumed(&work_dir) {
                report.degrade(format!("processed files not recorded: {}", e));
            }
        }

        if !report.is_complete() {
            warn!(
                "{} ledgers could not be written",
                report.write_failures.len()
            );
        }
        Ok(report)
    }

    fn classify_placemarks(
        &self,
        document: &MapDocument,
        media_dir: Option<&Path>,
        resolver: &ReferenceResolver,
        ledgers: &mut Ledgers,
        mappings: &mut ImageMappings,
        report: &mut RunReport,
    ) {
        let stats = &mut report.stats;
        stats.total_placemarks = document.placemarks.len();

        for (i, placemark) in document.placemarks.iter().enumerate() {
            let Some(name) = placemark
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
            else {
                info!(
                    "Placemark #{} (ID: {}) has no name, skipping",
                    i,
                    placemark.display_id()
                );
                stats.skipped += 1;
                continue;
            };
            debug!(
                "Processing placemark #{} (ID: {}, name: {})",
                i,
                placemark.display_id(),
                name
            );

            let resolution = style::resolve(placemark, &document.shared_styles);
            if let StyleResolution::DanglingReference(_) = resolution {
                stats.dangling_styles += 1;
            }
            let color = resolution.color();
            let classification = classify(color);
            info!(
                "{}: {} ({})",
                name, classification.outcome, classification.label
            );
            ledgers.record(name, classification.outcome, color);
            stats.count(classification.outcome);
            stats.processed += 1;

            let Some(description) = placemark.description.as_deref() else {
                warn!("Placemark {} has no description", name);
                stats.without_description += 1;
                continue;
            };
            let Some(media_dir) = media_dir else {
                continue;
            };

            match resolver.resolve(name, description, media_dir) {
                Ok(refs) => {
                    let stem = canonical_stem(name, &refs.suffix);
                    if sanitize_file_name(&stem).is_empty() {
                        warn!("Placemark {} yields an empty file name, images left as is", name);
                        continue;
                    }
                    debug!(
                        "{} images for {} ({:?})",
                        refs.images.len(),
                        name,
                        refs.source
                    );
                    mappings.add_placemark(&stem, &refs.images);
                }
                Err(e) => {
                    warn!("Failed to list images in {:?}: {}", media_dir, e);
                    stats.reference_errors += 1;
                }
            }
        }

        stats.images_mapped = mappings.len();
        stats.canonical_collisions = mappings.collisions();
        stats.remapped_sources = mappings.remapped();
    }

    fn process_media(&self, media_dir: &Path, mappings: &ImageMappings, report: &mut RunReport) {
        let policy = self.config.collision_policy;
        report.stats.rename = apply_mappings(media_dir, mappings, policy);

        let normalizer = JpegNormalizer::new(self.config.jpeg_quality, policy);
        match normalizer.normalize_dir(media_dir) {
            Ok(stats) => report.stats.conversion = stats,
            Err(e) => report.degrade(format!("image conversion skipped: {:#}", e)),
        }
    }
}

fn read_document(path: &Path) -> Result<MapDocument> {
    info!("Reading map document: {:?}", path);
    let file = File::open(path).map_err(|e| KmzError::io(path, e))?;
    parse_kml(BufReader::new(file))
}
