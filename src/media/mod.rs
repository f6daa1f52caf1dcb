pub mod convert;

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::CollisionPolicy;
use crate::naming::canonical_file_name;

pub use convert::{ConversionStats, JpegNormalizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMapping {
    /// File name relative to the media folder, as referenced.
    pub source: String,
    pub target: String,
}

/// Original-name to canonical-name table for one run.
///
/// Sources are unique; a source mapped again by a later placemark keeps its
/// position and takes the new target. Targets are unique too: a name
/// already claimed by another source gets further `..` suffixes and the
/// clash is counted.
#[derive(Debug, Default)]
pub struct ImageMappings {
    entries: Vec<ImageMapping>,
    by_source: HashMap<String, usize>,
    claimed: HashMap<String, String>,
    collisions: usize,
    remapped: usize,
}

impl ImageMappings {
    /// Maps the images of one placemark, in discovery order.
    pub fn add_placemark(&mut self, stem: &str, images: &[String]) {
        for (index, source) in images.iter().enumerate() {
            let mut repeats = usize::from(index > 0);
            let target = loop {
                let candidate = canonical_file_name(stem, repeats);
                match self.claimed.get(&candidate) {
                    Some(owner) if owner != source => {
                        debug!("Canonical name {:?} already taken by {:?}", candidate, owner);
                        self.collisions += 1;
                        repeats += 1;
                    }
                    _ => break candidate,
                }
            };
            self.insert(source, target);
        }
    }

    fn insert(&mut self, source: &str, target: String) {
        self.claimed.insert(target.clone(), source.to_string());

        match self.by_source.get(source) {
            Some(&i) => {
                let previous = std::mem::replace(&mut self.entries[i].target, target);
                if previous != self.entries[i].target {
                    warn!(
                        "{} was already mapped to {}, now {}",
                        source, previous, self.entries[i].target
                    );
                    self.claimed.remove(&previous);
                    self.remapped += 1;
                }
            }
            None => {
                debug!("Mapped: {} -> {}", source, target);
                self.by_source.insert(source.to_string(), self.entries.len());
                self.entries.push(ImageMapping {
                    source: source.to_string(),
                    target,
                });
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageMapping> {
        self.entries.iter()
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.by_source
            .get(source)
            .map(|&i| self.entries[i].target.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn remapped(&self) -> usize {
        self.remapped
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameStats {
    pub renamed: usize,
    /// Target already present; nothing to do.
    pub already_satisfied: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Applies the mappings inside `media_dir`.
///
/// Missing sources and failed renames are counted, never fatal.
pub fn apply_mappings(
    media_dir: &Path,
    mappings: &ImageMappings,
    policy: CollisionPolicy,
) -> RenameStats {
    info!("Renaming {} image files", mappings.len());
    let mut stats = RenameStats::default();

    for mapping in mappings.iter() {
        let Some(relative) = safe_relative(&mapping.source) else {
            warn!("Ignoring reference outside the media folder: {}", mapping.source);
            stats.not_found += 1;
            continue;
        };
        let source = media_dir.join(relative);
        let target = media_dir.join(&mapping.target);

        if !source.is_file() {
            if target.is_file() {
                debug!("Already renamed: {}", mapping.target);
                stats.already_satisfied += 1;
            } else {
                warn!("File not found: {:?}", source);
                stats.not_found += 1;
            }
            continue;
        }

        if source == target {
            stats.already_satisfied += 1;
            continue;
        }

        if target.exists() {
            match policy {
                CollisionPolicy::Skip => {
                    info!("File already exists with name {}, skipping", mapping.target);
                    stats.already_satisfied += 1;
                    continue;
                }
                CollisionPolicy::Overwrite => {
                    if let Err(e) = fs::remove_file(&target) {
                        error!("Failed to replace {:?}: {}", target, e);
                        stats.failed += 1;
                        continue;
                    }
                }
            }
        }

        match fs::rename(&source, &target) {
            Ok(()) => {
                info!("Renamed: {} -> {}", mapping.source, mapping.target);
                stats.renamed += 1;
            }
            Err(e) => {
                error!("Failed to rename {}: {}", mapping.source, e);
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Accepts only plain relative paths that stay inside the media folder.
fn safe_relative(reference: &str) -> Option<PathBuf> {
    let path = Path::new(reference);
    let plain = !reference.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    plain.then(|| path.to_path_buf())
}
