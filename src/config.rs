use std::path::{Path, PathBuf};

/// 保存可能なコードの出力ファイル名
pub const SAVABLE_LEDGER_FILE: &str = "Codigos-salvos-regularizado.txt";
/// 要是正コードの出力ファイル名
pub const REGULARIZE_LEDGER_FILE: &str = "pedente-pra-regularizar.txt";
/// 未知の色のファイル名サフィックス（先頭にアーカイブ名が付く）
pub const UNKNOWN_LEDGER_SUFFIX: &str = "_cores-desconhecidas.txt";
/// 作業ディレクトリ名のプレフィックス
pub const WORK_DIR_PREFIX: &str = "extracted_";
/// 台帳エントリの区切り
pub const ENTRY_DELIMITER: &str = " |";

/// What to do when a rename or conversion target already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Leave the existing target alone and count the item as satisfied.
    #[default]
    Skip,
    /// Replace the existing target.
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Required space is estimated as archive size times this factor.
    pub expansion_factor: u64,
    /// Go straight to map-only extraction when the space pre-check fails,
    /// instead of aborting.
    pub fallback_on_shortfall: bool,
    pub map_document_name: String,
    /// Case-insensitive substring selecting entries in map-only mode.
    pub map_entry_pattern: String,
    pub media_dir_name: String,
    pub jpeg_quality: u8,
    pub collision_policy: CollisionPolicy,
    /// Ledger directory; defaults to the archive's directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            expansion_factor: 5,
            fallback_on_shortfall: true,
            map_document_name: "doc.kml".to_string(),
            map_entry_pattern: ".kml".to_string(),
            media_dir_name: "cloud_media".to_string(),
            jpeg_quality: 90,
            collision_policy: CollisionPolicy::Skip,
            output_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn output_dir_for(&self, archive: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => archive_dir(archive),
        }
    }
}

/// Archive file name without its extension.
pub fn archive_base_name(archive: &Path) -> String {
    archive
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("archive")
        .to_string()
}

pub fn archive_dir(archive: &Path) -> PathBuf {
    match archive.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `extracted_<base>` next to the archive.
pub fn work_dir_for(archive: &Path) -> PathBuf {
    archive_dir(archive).join(format!("{}{}", WORK_DIR_PREFIX, archive_base_name(archive)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_dir_is_adjacent_to_archive() {
        let archive = Path::new("/data/maps/rota-norte.kmz");
        assert_eq!(
            work_dir_for(archive),
            PathBuf::from("/data/maps/extracted_rota-norte")
        );
        assert_eq!(archive_base_name(archive), "rota-norte");
    }

    #[test]
    fn test_bare_file_name_uses_current_dir() {
        let archive = Path::new("mapa.kmz");
        assert_eq!(archive_dir(archive), PathBuf::from("."));
        assert_eq!(work_dir_for(archive), PathBuf::from("./extracted_mapa"));
    }

    #[test]
    fn test_output_dir_override() {
        let config = PipelineConfig {
            output_dir: Some(PathBuf::from("/out")),
            ..Default::default()
        };
        assert_eq!(
            config.output_dir_for(Path::new("/data/a.kmz")),
            PathBuf::from("/out")
        );
        assert_eq!(
            PipelineConfig::default().output_dir_for(Path::new("/data/a.kmz")),
            PathBuf::from("/data")
        );
    }
}
