use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::Result;

/// Extensions treated as images when listing the media folder directly.
pub const LISTED_IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    /// `src="<media>/..."` tokens in the description.
    MediaScoped,
    /// Any `src="..."` token.
    AnySource,
    /// No token at all; every image in the media folder.
    DirectoryListing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacemarkReferences {
    /// Text appended to the placemark name in target file names.
    pub suffix: String,
    pub images: Vec<String>,
    pub source: ReferenceSource,
}

fn excerpt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<pre\b[^>]*>(.*?)</pre>").expect("valid excerpt regex"))
}

fn any_source_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"src="(.*?)""#).expect("valid src regex"))
}

pub struct ReferenceResolver {
    media_scoped: Regex,
}

impl ReferenceResolver {
    pub fn new(media_dir_name: &str) -> Result<Self> {
        let media_scoped = Regex::new(&format!(
            r#"src="{}/(.*?)""#,
            regex::escape(media_dir_name)
        ))?;
        Ok(Self { media_scoped })
    }

    /// Trimmed text of the first `<pre>` block, if any and non-empty.
    pub fn excerpt(&self, description: &str) -> Option<String> {
        excerpt_pattern()
            .captures(description)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Image tokens embedded in the description, media-scoped first.
    pub fn embedded(&self, description: &str) -> Option<(Vec<String>, ReferenceSource)> {
        let scoped = capture_all(&self.media_scoped, description);
        if !scoped.is_empty() {
            return Some((scoped, ReferenceSource::MediaScoped));
        }

        let any = capture_all(any_source_pattern(), description);
        if !any.is_empty() {
            return Some((any, ReferenceSource::AnySource));
        }

        None
    }

    /// Resolves the images of one placemark.
    ///
    /// Fails only when the media folder has to be listed and cannot be read.
    pub fn resolve(
        &self,
        placemark_name: &str,
        description: &str,
        media_dir: &Path,
    ) -> io::Result<PlacemarkReferences> {
        let suffix = match self.excerpt(description) {
            Some(excerpt) => {
                debug!("Description excerpt: {:?}", excerpt);
                excerpt
            }
            None => placemark_name.to_string(),
        };

        let (images, source) = match self.embedded(description) {
            Some(found) => found,
            None => {
                debug!(
                    "No image reference for {}, listing {:?}",
                    placemark_name, media_dir
                );
                (list_images(media_dir)?, ReferenceSource::DirectoryListing)
            }
        };

        Ok(PlacemarkReferences {
            suffix,
            images,
            source,
        })
    }
}

fn capture_all(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> io::Result<Vec<String>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| LISTED_IMAGE_EXTENSIONS.contains(&e.as_str()));
        if is_image {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                images.push(name.to_string());
            }
        }
    }
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> ReferenceResolver {
        ReferenceResolver::new("cloud_media").unwrap()
    }

    #[test]
    fn test_excerpt() {
        let r = resolver();
        let desc = r#"<div><pre id="com.exlyo.mapmarker.description_p_tag">
            Poste 12
        </pre></div>"#;
        assert_eq!(r.excerpt(desc).as_deref(), Some("Poste 12"));
        assert_eq!(r.excerpt("<pre></pre>"), None);
        assert_eq!(r.excerpt("<p>sem pre</p>"), None);
        // <preview> は <pre> ではない
        assert_eq!(r.excerpt("<preview>x</preview>"), None);
    }

    #[test]
    fn test_media_scoped_references_first() {
        let desc = r#"<img src="cloud_media/a.png"><img src="http://x/y.png"><img src="cloud_media/b.jpg">"#;
        let (images, source) = resolver().embedded(desc).unwrap();

        assert_eq!(images, vec!["a.png", "b.jpg"]);
        assert_eq!(source, ReferenceSource::MediaScoped);
    }

    #[test]
    fn test_any_source_fallback() {
        let desc = r#"<img src="fotos/a.png">"#;
        let (images, source) = resolver().embedded(desc).unwrap();

        assert_eq!(images, vec!["fotos/a.png"]);
        assert_eq!(source, ReferenceSource::AnySource);
        assert_eq!(resolver().embedded("texto simples"), None);
    }

    #[test]
    fn test_media_name_is_escaped() {
        let r = ReferenceResolver::new("media.v2").unwrap();
        let (_, source) = r.embedded(r#"src="mediaXv2/a.png""#).unwrap();
        assert_eq!(source, ReferenceSource::AnySource);
    }

    #[test]
    fn test_directory_listing_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path();
        for name in ["b.PNG", "a.jpg", "notas.txt", "c.webp"] {
            std::fs::write(media.join(name), b"x").unwrap();
        }
        std::fs::create_dir(media.join("sub.jpg")).unwrap();

        let refs = resolver().resolve("PT-9", "sem imagens", media).unwrap();

        assert_eq!(refs.source, ReferenceSource::DirectoryListing);
        assert_eq!(refs.images, vec!["a.jpg", "b.PNG", "c.webp"]);
        assert_eq!(refs.suffix, "PT-9");
    }

    #[test]
    fn test_listing_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = resolver().resolve("A", "", &temp_dir.path().join("nao-existe"));
        assert!(result.is_err());
    }
}
