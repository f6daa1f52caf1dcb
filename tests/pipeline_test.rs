use image::{ImageFormat, Rgb, RgbImage};
use kmz_classifier::config::{REGULARIZE_LEDGER_FILE, SAVABLE_LEDGER_FILE};
use kmz_classifier::space::FixedProbe;
use kmz_classifier::{ExtractionMode, KmzError, KmzProcessor, PipelineConfig, RunFailure};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const STYLES: &str = r##"
    <Style id="verde"><IconStyle><color>ff00b371</color></IconStyle></Style>
    <Style id="rosa"><IconStyle><color>FF631EE9</color></IconStyle></Style>
"##;

fn kml(placemarks: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Rota</name>
    {}
    {}
  </Document>
</kml>"#,
        STYLES, placemarks
    )
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([30, 120, 60]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn write_kmz(dir: &Path, name: &str, entries: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    for (entry, data) in entries {
        zip.start_file(*entry, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
    path
}

fn two_placemark_archive(dir: &Path) -> PathBuf {
    let placemarks = r##"
    <Placemark id="p1">
      <name>PT-001</name>
      <description><![CDATA[<pre>Poste</pre><img src="cloud_media/a.png">]]></description>
      <styleUrl>#verde</styleUrl>
    </Placemark>
    <Placemark id="p2">
      <name>PT-002 ❌</name>
      <description><![CDATA[<img src="cloud_media/b.png"><img src="cloud_media/c.png">]]></description>
      <styleUrl>#rosa</styleUrl>
    </Placemark>
    "##;
    write_kmz(
        dir,
        "rota.kmz",
        &[
            ("doc.kml", kml(placemarks).into_bytes()),
            ("cloud_media/a.png", png_bytes()),
            ("cloud_media/b.png", png_bytes()),
            ("cloud_media/c.png", png_bytes()),
        ],
    )
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn plenty_of_space() -> Box<FixedProbe> {
    Box::new(FixedProbe(Some(u64::MAX)))
}

#[test]
fn test_classifies_and_renames() {
    let temp_dir = TempDir::new().unwrap();
    let archive = two_placemark_archive(temp_dir.path());

    let report = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(plenty_of_space())
        .run()
        .unwrap();

    assert_eq!(report.mode, ExtractionMode::Full);
    assert_eq!(
        fs::read_to_string(temp_dir.path().join(SAVABLE_LEDGER_FILE)).unwrap(),
        "PT-001 |"
    );
    assert_eq!(
        fs::read_to_string(temp_dir.path().join(REGULARIZE_LEDGER_FILE)).unwrap(),
        "PT-002 ❌ |"
    );
    assert!(!temp_dir.path().join("rota_cores-desconhecidas.txt").exists());

    let media = temp_dir.path().join("extracted_rota/cloud_media");
    assert!(media.join("PT-001 Poste.jpg").is_file());
    assert!(media.join("PT-002 PT-002.jpg").is_file());
    assert!(media.join("PT-002 PT-002...jpg").is_file());
    assert!(!media.join("a.png").exists());

    let stats = &report.stats;
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.rename.renamed, 3);
    // リネーム後の .jpg は中身がPNGなので再エンコードされる
    assert_eq!(stats.conversion.converted, 3);
    assert!(report.degradations.is_empty());
    assert!(report.is_complete());
}

#[test]
fn test_low_space_runs_map_only() {
    let temp_dir = TempDir::new().unwrap();
    let archive = two_placemark_archive(temp_dir.path());

    let report = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(Box::new(FixedProbe(Some(1))))
        .run()
        .unwrap();

    assert!(matches!(report.mode, ExtractionMode::Reduced(_)));
    assert!(temp_dir.path().join(SAVABLE_LEDGER_FILE).is_file());
    assert!(temp_dir.path().join(REGULARIZE_LEDGER_FILE).is_file());
    assert!(!temp_dir.path().join("extracted_rota/cloud_media").exists());
    assert_eq!(report.stats.rename.renamed, 0);
    assert_eq!(report.stats.conversion.converted, 0);
    assert!(report
        .degradations
        .iter()
        .any(|d| d.contains("only the map document")));
}

#[test]
fn test_low_space_without_fallback_fails() {
    let temp_dir = TempDir::new().unwrap();
    let archive = two_placemark_archive(temp_dir.path());
    let config = PipelineConfig {
        fallback_on_shortfall: false,
        ..Default::default()
    };

    let result = KmzProcessor::new(&archive, config)
        .with_probe(Box::new(FixedProbe(Some(1))))
        .run();

    assert!(matches!(
        result,
        Err(RunFailure {
            error: KmzError::InsufficientSpace { .. },
            report: None,
        })
    ));
    assert!(!temp_dir.path().join(SAVABLE_LEDGER_FILE).exists());
}

#[test]
fn test_placemark_without_name_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let placemarks = r##"
    <Placemark><styleUrl>#verde</styleUrl></Placemark>
    <Placemark><n>PT-010</n><styleUrl>#verde</styleUrl></Placemark>
    <Placemark><name>PT-011</name><styleUrl>#inexistente</styleUrl></Placemark>
    "##;
    let archive = write_kmz(
        temp_dir.path(),
        "mapa.kmz",
        &[
            ("doc.kml", kml(placemarks).into_bytes()),
            ("cloud_media/", Vec::new()),
        ],
    );

    let report = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(plenty_of_space())
        .run()
        .unwrap();

    assert_eq!(report.stats.total_placemarks, 3);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.processed, 2);
    assert_eq!(report.stats.without_description, 2);
    assert_eq!(report.stats.dangling_styles, 1);
    assert_eq!(
        fs::read_to_string(temp_dir.path().join(SAVABLE_LEDGER_FILE)).unwrap(),
        "PT-010 |"
    );
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("mapa_cores-desconhecidas.txt")).unwrap(),
        "PT-011 | (Cor: não encontrada)"
    );
}

#[test]
fn test_missing_media_dir_still_writes_ledgers() {
    let temp_dir = TempDir::new().unwrap();
    let placemarks = r##"
    <Placemark><name>PT-020</name><styleUrl>#verde</styleUrl></Placemark>
    "##;
    let archive = write_kmz(
        temp_dir.path(),
        "sem-midia.kmz",
        &[("doc.kml", kml(placemarks).into_bytes())],
    );

    let result = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(plenty_of_space())
        .run();

    let failure = result.unwrap_err();
    assert!(matches!(failure.error, KmzError::MediaDirNotFound { .. }));
    assert_eq!(failure.stage(), "location");
    assert!(failure.to_string().starts_with("location failed: "));
    assert_eq!(
        fs::read_to_string(temp_dir.path().join(SAVABLE_LEDGER_FILE)).unwrap(),
        "PT-020 |"
    );

    // 集計は失敗後も参照できる
    let report = failure.report.expect("report of a run that reached the ledgers");
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.savable, 1);
    assert_eq!(report.stats.without_description, 1);
    assert_eq!(report.written, vec![temp_dir.path().join(SAVABLE_LEDGER_FILE)]);
}

#[test]
fn test_missing_map_document_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let archive = write_kmz(
        temp_dir.path(),
        "vazio.kmz",
        &[("cloud_media/a.png", png_bytes())],
    );

    let result = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(plenty_of_space())
        .run();

    assert!(matches!(
        result,
        Err(RunFailure {
            error: KmzError::MapDocumentNotFound { .. },
            report: None,
        })
    ));
}

#[test]
fn test_rerun_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let archive = two_placemark_archive(temp_dir.path());
    let processor =
        KmzProcessor::new(&archive, PipelineConfig::default()).with_probe(plenty_of_space());

    let first = processor.run().unwrap();
    assert_eq!(first.stats.rename.renamed, 3);

    // 既存の作業ディレクトリに再展開しても上書きはしない
    let media = temp_dir.path().join("extracted_rota/cloud_media");
    let before = list_dir(&media);

    let second = processor.run().unwrap();
    assert_eq!(second.stats.conversion.changes(), 0);
    assert_eq!(second.stats.conversion.already_canonical, 3);
    assert_eq!(list_dir(&media), before);
    assert_eq!(second.stats.rename.failed, 0);
    assert_eq!(second.stats.rename.not_found, 0);
    assert_eq!(second.stats.rename.renamed, 0);
    assert_eq!(second.stats.rename.already_satisfied, 3);
    assert!(media.join("PT-001 Poste.jpg").is_file());
    assert_eq!(
        fs::read_to_string(temp_dir.path().join(SAVABLE_LEDGER_FILE)).unwrap(),
        "PT-001 |"
    );
}

#[test]
fn test_unreadable_archive() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("quebrado.kmz");
    fs::write(&archive, b"not a zip").unwrap();

    let result = KmzProcessor::new(&archive, PipelineConfig::default())
        .with_probe(plenty_of_space())
        .run();

    assert!(matches!(
        result,
        Err(RunFailure {
            error: KmzError::ArchiveUnreadable { .. },
            report: None,
        })
    ));
}
