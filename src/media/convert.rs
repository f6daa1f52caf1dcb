use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::CollisionPolicy;
use crate::naming::CANONICAL_EXTENSION;

/// Raster formats converted to JPEG.
pub const CONVERTIBLE_EXTENSIONS: [&str; 10] = [
    "png", "gif", "bmp", "webp", "tiff", "tif", "svg", "heic", "heif", "avif",
];
/// Formats retried with the permissive decoder.
const BITMAP_EXTENSIONS: [&str; 2] = ["bmp", "dib"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub scanned: usize,
    pub already_canonical: usize,
    /// `.jpeg` renamed to `.jpg`.
    pub extension_normalized: usize,
    pub converted: usize,
    /// Target already present; source left untouched.
    pub skipped_existing: usize,
    pub errors: usize,
    pub non_image: usize,
}

impl ConversionStats {
    /// Changes made to the directory by this pass.
    pub fn changes(&self) -> usize {
        self.extension_normalized + self.converted
    }
}

enum DecodeMode {
    Strict,
    /// Lifts decoder limits and flattens transparency onto white.
    Permissive,
}

/// Converts every image in a directory to JPEG.
#[derive(Debug, Clone)]
pub struct JpegNormalizer {
    quality: u8,
    policy: CollisionPolicy,
}

impl Default for JpegNormalizer {
    fn default() -> Self {
        Self::new(90, CollisionPolicy::Skip)
    }
}

impl JpegNormalizer {
    pub fn new(quality: u8, policy: CollisionPolicy) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            policy,
        }
    }

    /// One pass over the files directly inside `dir`. Per-file failures
    /// are counted; only an unreadable directory is an error.
    pub fn normalize_dir(&self, dir: &Path) -> Result<ConversionStats> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
            let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                debug!("Ignoring directory: {:?}", entry.file_name());
                continue;
            }
            files.push(entry.path());
        }
        files.sort();
        info!("Checking {} files in {:?}", files.len(), dir);

        let mut stats = ConversionStats::default();
        for path in &files {
            stats.scanned += 1;
            self.process_file(path, &mut stats);
        }

        info!(
            "Image conversion: {} already JPEG, {} converted, {} extensions normalized, {} skipped, {} non-image, {} errors",
            stats.already_canonical,
            stats.converted,
            stats.extension_normalized,
            stats.skipped_existing,
            stats.non_image,
            stats.errors
        );
        Ok(stats)
    }

    fn process_file(&self, path: &Path, stats: &mut ConversionStats) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("jpg") => self.check_canonical(path, stats),
            Some("jpeg") => self.normalize_extension(path, stats),
            Some(e) if CONVERTIBLE_EXTENSIONS.contains(&e) => self.convert_known(path, e, stats),
            _ => self.convert_unlabelled(path, stats),
        }
    }

    /// `.jpg` files keep their name; content that is not JPEG (an image
    /// renamed by the mapping step) is transcoded in place.
    fn check_canonical(&self, path: &Path, stats: &mut ConversionStats) {
        match sniff_format(path) {
            Some(format) if format != ImageFormat::Jpeg => {
                info!("{:?} holds {:?} data, re-encoding as JPEG", path, format);
                match self.transcode_in_place(path) {
                    Ok(()) => stats.converted += 1,
                    Err(e) => {
                        error!("Failed to re-encode {:?}: {:#}", path, e);
                        stats.errors += 1;
                    }
                }
            }
            _ => {
                debug!("Already JPEG: {:?}", path);
                stats.already_canonical += 1;
            }
        }
    }

    fn normalize_extension(&self, path: &Path, stats: &mut ConversionStats) {
        let target = canonical_path(path);
        if target.exists() && self.policy == CollisionPolicy::Skip {
            warn!("{:?} already exists, keeping {:?}", target, path);
            stats.skipped_existing += 1;
            return;
        }

        match fs::rename(path, &target) {
            Ok(()) => {
                info!("Extension normalized: {:?} -> {:?}", path, target);
                stats.extension_normalized += 1;
            }
            Err(e) => {
                error!("Failed to normalize extension of {:?}: {}", path, e);
                stats.errors += 1;
            }
        }
    }

    fn convert_known(&self, path: &Path, ext: &str, stats: &mut ConversionStats) {
        let target = canonical_path(path);
        if target.exists() && self.policy == CollisionPolicy::Skip {
            warn!("{:?} already exists, skipping conversion", target);
            stats.skipped_existing += 1;
            return;
        }

        let result = self.convert(path, &target, DecodeMode::Strict).or_else(|e| {
            if !BITMAP_EXTENSIONS.contains(&ext) {
                return Err(e);
            }
            warn!("Failed to convert {:?} ({:#}), retrying permissively", path, e);
            self.convert(path, &target, DecodeMode::Permissive)
        });

        match result {
            Ok(()) => {
                info!("Converted: {:?} -> {:?}", path, target);
                stats.converted += 1;
            }
            Err(e) => {
                error!("Failed to convert {:?}: {:#}", path, e);
                stats.errors += 1;
            }
        }
    }

    /// Files without a known image extension are converted only when their
    /// content is recognised as an image.
    fn convert_unlabelled(&self, path: &Path, stats: &mut ConversionStats) {
        let Some(format) = sniff_format(path) else {
            debug!("Not an image, leaving as is: {:?}", path);
            stats.non_image += 1;
            return;
        };
        info!("Detected {:?} image without a proper extension: {:?}", format, path);

        let target = canonical_path(path);
        if target.exists() && self.policy == CollisionPolicy::Skip {
            warn!("{:?} already exists, skipping conversion", target);
            stats.skipped_existing += 1;
            return;
        }

        let result = if format == ImageFormat::Jpeg {
            fs::rename(path, &target).with_context(|| format!("Failed to rename {:?}", path))
        } else {
            self.convert(path, &target, DecodeMode::Strict)
        };

        match result {
            Ok(()) => {
                info!("Converted: {:?} -> {:?}", path, target);
                stats.converted += 1;
            }
            Err(e) => {
                error!("Failed to convert {:?}: {:#}", path, e);
                stats.errors += 1;
            }
        }
    }

    /// Decodes `source`, writes `target` and removes `source`.
    fn convert(&self, source: &Path, target: &Path, mode: DecodeMode) -> Result<()> {
        let image = decode(source, &mode)?;
        let rgb = match mode {
            DecodeMode::Strict => image.to_rgb8(),
            DecodeMode::Permissive => flatten_on_white(&image),
        };

        self.write_jpeg(&rgb, target)?;
        fs::remove_file(source).with_context(|| format!("Failed to remove {:?}", source))?;
        Ok(())
    }

    fn transcode_in_place(&self, path: &Path) -> Result<()> {
        let image = decode(path, &DecodeMode::Strict)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Invalid file name")?;
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

        self.write_jpeg(&image.to_rgb8(), &temp_path)?;
        fs::rename(&temp_path, path).with_context(|| format!("Failed to replace {:?}", path))
    }

    fn write_jpeg(&self, image: &RgbImage, target: &Path) -> Result<()> {
        let result = (|| -> Result<()> {
            let file =
                File::create(target).with_context(|| format!("Failed to create {:?}", target))?;
            let mut writer = BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(&mut writer, self.quality);
            image
                .write_with_encoder(encoder)
                .context("Failed to encode JPEG")?;
            writer.flush().context("Failed to flush JPEG")?;
            Ok(())
        })();

        if result.is_err() && target.exists() {
            // 書きかけのファイルは残さない
            let _ = fs::remove_file(target);
        }
        result
    }
}

fn canonical_path(path: &Path) -> PathBuf {
    path.with_extension(CANONICAL_EXTENSION)
}

/// Image format detected from the file's leading bytes.
pub fn sniff_format(path: &Path) -> Option<ImageFormat> {
    // 拡張子ではなく中身で判定する
    let mut header = [0u8; 32];
    let read = File::open(path).ok()?.read(&mut header).ok()?;
    image::guess_format(&header[..read]).ok()
}

fn decode(path: &Path, mode: &DecodeMode) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open {:?}", path))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read {:?}", path))?;
    if let DecodeMode::Permissive = mode {
        reader.no_limits();
    }
    reader
        .decode()
        .with_context(|| format!("Failed to decode {:?}", path))
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    RgbImage::from_fn(width, height, |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn write_png(path: &Path) {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_png_converted_to_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_png(&dir.join("foto.png"));

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.converted, 1);
        assert_eq!(stats.errors, 0);
        assert!(!dir.join("foto.png").exists());
        assert_eq!(sniff_format(&dir.join("foto.jpg")), Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_png(&dir.join("a.png"));
        write_png(&dir.join("b.PNG"));

        let normalizer = JpegNormalizer::default();
        let first = normalizer.normalize_dir(dir).unwrap();
        assert_eq!(first.converted, 2);

        let second = normalizer.normalize_dir(dir).unwrap();
        assert_eq!(second.changes(), 0);
        assert_eq!(second.already_canonical, 2);
    }

    #[test]
    fn test_non_image_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("notas.txt"), "texto").unwrap();
        fs::create_dir(dir.join("sub")).unwrap();

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.non_image, 1);
        assert!(dir.join("notas.txt").is_file());
    }

    #[test]
    fn test_image_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_png(&dir.join("foto"));

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.converted, 1);
        assert!(!dir.join("foto").exists());
        assert_eq!(sniff_format(&dir.join("foto.jpg")), Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_jpeg_extension_normalized() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a.jpeg"), b"jpeg").unwrap();
        fs::write(dir.join("b.jpeg"), b"new").unwrap();
        fs::write(dir.join("b.jpg"), b"old").unwrap();

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.extension_normalized, 1);
        assert_eq!(stats.skipped_existing, 1);
        assert!(dir.join("a.jpg").is_file());
        assert_eq!(fs::read(dir.join("b.jpg")).unwrap(), b"old");
    }

    #[test]
    fn test_misnamed_jpg_transcoded_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_png(&dir.join("PT-1.jpg"));

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.converted, 1);
        assert_eq!(sniff_format(&dir.join("PT-1.jpg")), Some(ImageFormat::Jpeg));
        assert_eq!(fs::read_dir(dir).unwrap().count(), 1);
    }

    #[test]
    fn test_existing_target_skips_conversion() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_png(&dir.join("a.png"));
        fs::write(dir.join("a.jpg"), b"old").unwrap();

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.skipped_existing, 1);
        assert!(dir.join("a.png").is_file());
    }

    #[test]
    fn test_flatten_on_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        let flat = flatten_on_white(&DynamicImage::ImageRgba8(rgba));

        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_broken_image_counted_as_error() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("quebrada.png"), b"not a png").unwrap();

        let stats = JpegNormalizer::default().normalize_dir(dir).unwrap();

        assert_eq!(stats.errors, 1);
        assert!(dir.join("quebrada.png").is_file());
        assert!(!dir.join("quebrada.jpg").exists());
    }
}
