use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{KmzError, Result};

/// Finds the map document under `root`.
///
/// The first file named `name` wins; failing that, the first `.kml` file.
/// Entries are visited in file-name order so the choice is stable.
pub fn locate_map_document(root: &Path, name: &str) -> Result<PathBuf> {
    let mut first_kml = None;

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.file_name() == name {
            info!("Map document found at {:?}", entry.path());
            return Ok(entry.into_path());
        }
        if first_kml.is_none() && has_extension(entry.path(), "kml") {
            first_kml = Some(entry.into_path());
        }
    }

    match first_kml {
        Some(path) => {
            info!("No '{}' found, using {:?}", name, path);
            Ok(path)
        }
        None => Err(KmzError::MapDocumentNotFound {
            root: root.to_path_buf(),
            name: name.to_string(),
        }),
    }
}

/// Finds the media folder: next to the map document first, then anywhere
/// under `root`. `None` when no such folder exists.
pub fn find_media_dir(root: &Path, map_document: &Path, media_dir_name: &str) -> Option<PathBuf> {
    if let Some(parent) = map_document.parent() {
        let sibling = parent.join(media_dir_name);
        if sibling.is_dir() {
            debug!("Media directory next to map document: {:?}", sibling);
            return Some(sibling);
        }
    }

    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == media_dir_name)
        .map(|e| e.into_path())
}

/// Like [`find_media_dir`] but a missing folder is fatal.
pub fn locate_media_dir(root: &Path, map_document: &Path, media_dir_name: &str) -> Result<PathBuf> {
    find_media_dir(root, map_document, media_dir_name).ok_or_else(|| KmzError::MediaDirNotFound {
        root: root.to_path_buf(),
        name: media_dir_name.to_string(),
    })
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_nested_layout() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join("z/cloud_media")).unwrap();
        fs::write(root.join("a/b/doc.kml"), "<kml/>").unwrap();

        let doc = locate_map_document(root, "doc.kml").unwrap();
        assert_eq!(doc, root.join("a/b/doc.kml"));

        // 兄弟ディレクトリが無いので再帰探索で見つける
        let media = locate_media_dir(root, &doc, "cloud_media").unwrap();
        assert_eq!(media, root.join("z/cloud_media"));
    }

    #[test]
    fn test_sibling_media_dir_preferred() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/cloud_media")).unwrap();
        fs::create_dir_all(root.join("b/cloud_media")).unwrap();
        fs::write(root.join("b/doc.kml"), "<kml/>").unwrap();

        let doc = locate_map_document(root, "doc.kml").unwrap();
        let media = locate_media_dir(root, &doc, "cloud_media").unwrap();
        assert_eq!(media, root.join("b/cloud_media"));
    }

    #[test]
    fn test_other_kml_name_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("Rota.KML"), "<kml/>").unwrap();

        let doc = locate_map_document(temp_dir.path(), "doc.kml").unwrap();
        assert_eq!(doc, temp_dir.path().join("Rota.KML"));
    }

    #[test]
    fn test_missing_document_and_media() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("readme.txt"), "x").unwrap();

        assert!(matches!(
            locate_map_document(root, "doc.kml"),
            Err(KmzError::MapDocumentNotFound { .. })
        ));
        assert!(matches!(
            locate_media_dir(root, &root.join("doc.kml"), "cloud_media"),
            Err(KmzError::MediaDirNotFound { .. })
        ));
        assert_eq!(find_media_dir(root, &root.join("doc.kml"), "cloud_media"), None);
    }
}
