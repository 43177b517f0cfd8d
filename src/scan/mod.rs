//! End-to-end scanning: pipeline stages, the document loader and the
//! top-level driver.
//!
//! The stages are registered in a [`PipelineGraph`] so intermediate
//! artifacts (the downscaled image, the binarized mask, the candidate
//! boxes) are computed once and shared between queries. The driver adds a
//! second phase: when the first pass finds nothing and the binarization
//! looks degenerate, the downscaling stage is swapped for a finer one and
//! the affected tail of the graph recomputes.

pub mod reader;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::GrayImage;
use tracing::{debug, info, warn};

use crate::core::record::MrzRecord;
use crate::imgproc::{boone_binarize, mean_level, scale_to_width};
use crate::locate::BoxLocator;
use crate::ocr::{OcrEngine, OcrError, TesseractEngine};
use crate::pipeline::{Artifact, Component, PipelineGraph};
use crate::scan::reader::{MrzFinder, ROI_MARGIN};

/// Scan tuning knobs surfaced to the CLI.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Width the input is downscaled to before binarization.
    pub max_width: u32,
    /// Finer width used by the second phase on degenerate binarizations.
    pub fallback_max_width: u32,
    /// Use the legacy (non-LSTM) recognizer.
    pub legacy_ocr: bool,
    /// Kill the recognizer subprocess after this long.
    pub ocr_timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_width: 250,
            fallback_max_width: 1000,
            legacy_ocr: false,
            ocr_timeout: None,
        }
    }
}

/// Reads an image or PDF file into a grayscale image. For PDFs the first
/// embedded JPEG stream is taken, which covers the common
/// scanner-produces-a-one-page-PDF case.
struct Loader {
    path: PathBuf,
}

impl Loader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

fn first_jpeg_stream(doc: &lopdf::Document) -> Option<Vec<u8>> {
    for object in doc.objects.values() {
        let lopdf::Object::Stream(stream) = object else {
            continue;
        };
        let dct = match stream.dict.get(b"Filter") {
            Ok(lopdf::Object::Name(name)) => name == b"DCTDecode",
            Ok(lopdf::Object::Array(filters)) => filters
                .iter()
                .any(|f| matches!(f, lopdf::Object::Name(n) if n == b"DCTDecode")),
            _ => false,
        };
        // JPEG streams start with the SOI marker.
        if dct && stream.content.starts_with(&[0xFF, 0xD8]) {
            return Some(stream.content.clone());
        }
    }
    None
}

impl Component for Loader {
    fn provides(&self) -> &[&'static str] {
        &["image"]
    }
    fn depends(&self) -> &[&'static str] {
        &[]
    }
    fn compute(&self, _inputs: &[Artifact]) -> Result<Vec<Artifact>> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("cannot read {}", self.path.display()))?;
        let img = if is_pdf(&bytes) {
            let doc = lopdf::Document::load_mem(&bytes)
                .with_context(|| format!("cannot parse pdf {}", self.path.display()))?;
            let Some(jpeg) = first_jpeg_stream(&doc) else {
                bail!("no embedded jpeg image in {}", self.path.display());
            };
            image::load_from_memory(&jpeg)
                .context("embedded jpeg does not decode")?
                .to_luma8()
        } else {
            image::load_from_memory(&bytes)
                .with_context(|| format!("cannot decode {}", self.path.display()))?
                .to_luma8()
        };
        debug!(width = img.width(), height = img.height(), "loaded input");
        Ok(vec![Artifact::Gray(img)])
    }
}

/// Downscales the input for binarization and reports the applied factor.
struct Scaler {
    max_width: u32,
}

impl Scaler {
    fn new(max_width: u32) -> Self {
        Self { max_width }
    }
}

impl Component for Scaler {
    fn provides(&self) -> &[&'static str] {
        &["img_small", "scale_factor"]
    }
    fn depends(&self) -> &[&'static str] {
        &["image"]
    }
    fn compute(&self, inputs: &[Artifact]) -> Result<Vec<Artifact>> {
        let (scaled, factor) = scale_to_width(inputs[0].gray()?, self.max_width);
        Ok(vec![Artifact::Gray(scaled), Artifact::Scalar(factor)])
    }
}

/// Binarizes the downscaled image with the Boone transform.
struct BooneStage;

impl Component for BooneStage {
    fn provides(&self) -> &[&'static str] {
        &["img_binary"]
    }
    fn depends(&self) -> &[&'static str] {
        &["img_small"]
    }
    fn compute(&self, inputs: &[Artifact]) -> Result<Vec<Artifact>> {
        Ok(vec![Artifact::Gray(boone_binarize(inputs[0].gray()?))])
    }
}

/// Fits and merges candidate boxes on the binarized mask.
struct LocatorStage {
    locator: BoxLocator,
}

impl Component for LocatorStage {
    fn provides(&self) -> &[&'static str] {
        &["boxes"]
    }
    fn depends(&self) -> &[&'static str] {
        &["img_binary"]
    }
    fn compute(&self, inputs: &[Artifact]) -> Result<Vec<Artifact>> {
        let boxes = self.locator.locate(inputs[0].gray()?);
        Ok(vec![Artifact::Boxes(boxes)])
    }
}

/// Runs OCR and parsing over the candidate boxes.
struct ReaderStage {
    engine: Box<dyn OcrEngine>,
}

impl Component for ReaderStage {
    fn provides(&self) -> &[&'static str] {
        &["record"]
    }
    fn depends(&self) -> &[&'static str] {
        &["boxes", "image", "scale_factor"]
    }
    fn compute(&self, inputs: &[Artifact]) -> Result<Vec<Artifact>> {
        let boxes = inputs[0].boxes()?;
        let img = inputs[1].gray()?;
        let factor = inputs[2].scalar()?;
        let finder = MrzFinder::new(self.engine.as_ref());
        let record = finder
            .find(boxes, img, 1.0 / factor)?
            .unwrap_or_else(MrzRecord::invalid);
        Ok(vec![Artifact::Record(Box::new(record))])
    }
}

/// Builds the standard scan graph over one input file.
pub fn build_graph(path: &Path, config: &ScanConfig) -> Result<PipelineGraph> {
    let mut engine = if config.legacy_ocr {
        TesseractEngine::legacy()
    } else {
        TesseractEngine::new()
    };
    if let Some(timeout) = config.ocr_timeout {
        engine = engine.with_timeout(timeout);
    }
    let mut graph = PipelineGraph::new();
    graph.register("loader", Box::new(Loader::new(path)))?;
    graph.register("scaler", Box::new(Scaler::new(config.max_width)))?;
    graph.register("boone", Box::new(BooneStage))?;
    graph.register(
        "locator",
        Box::new(LocatorStage {
            locator: BoxLocator::default(),
        }),
    )?;
    graph.register(
        "reader",
        Box::new(ReaderStage {
            engine: Box::new(engine),
        }),
    )?;
    Ok(graph)
}

/// Reads the MRZ out of an image or PDF file.
///
/// Processing failures (unreadable file, no text found) come back as an
/// invalid record; only recognizer-level failures, where retrying other
/// inputs is pointless, surface as errors.
pub fn read_mrz(path: &Path, config: &ScanConfig) -> Result<MrzRecord> {
    let mut graph = build_graph(path, config)?;
    scan_graph(&mut graph, config)
}

/// Driver over an already-built graph. Separated out so tests can swap
/// stages before scanning.
pub fn scan_graph(graph: &mut PipelineGraph, config: &ScanConfig) -> Result<MrzRecord> {
    match run_scan(graph, config) {
        Ok(record) => Ok(record),
        Err(err) => {
            if err.downcast_ref::<OcrError>().is_some() {
                return Err(err);
            }
            warn!(error = %err, "scan failed");
            Ok(MrzRecord::invalid())
        }
    }
}

fn record_found(record: &MrzRecord) -> bool {
    record.mrz_type.is_some() || record.valid_score > 0
}

fn run_scan(graph: &mut PipelineGraph, config: &ScanConfig) -> Result<MrzRecord> {
    let record = graph.get("record")?.record()?.clone();
    if record_found(&record) {
        return Ok(record);
    }

    // Nothing found. If the binarization came out nearly empty or the scan
    // is nearly blank at this resolution, retry the tail of the pipeline
    // with a finer downscale.
    let mask_mean = mean_level(graph.get("img_binary")?.gray()?);
    let img_mean = mean_level(graph.get("img_small")?.gray()?);
    if mask_mean >= 0.01 && img_mean <= 0.95 {
        return Ok(record);
    }
    info!(mask_mean, img_mean, "degenerate binarization, rescanning finer");
    graph.replace("scaler", Box::new(Scaler::new(config.fallback_max_width)))?;
    let mut retried = graph.get("record")?.record()?.clone();
    if record_found(&retried) {
        let method = retried.aux.remove("method").unwrap_or_default();
        retried.aux.insert(
            "method".to_string(),
            format!("{method}|max_width({})", config.fallback_max_width),
        );
    }
    Ok(retried)
}

/// Extracts the located regions at full resolution, one image per
/// candidate box.
pub fn extract_rois(graph: &mut PipelineGraph) -> Result<Vec<GrayImage>> {
    let boxes = graph.get("boxes")?;
    let image = graph.get("image")?;
    let factor = graph.get("scale_factor")?.scalar()?;
    let img = image.gray()?;
    Ok(boxes
        .boxes()?
        .iter()
        .map(|b| b.extract_from_image(img, 1.0 / factor, ROI_MARGIN, ROI_MARGIN))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::MrzType;
    use std::cell::Cell;

    #[test]
    fn pdf_sniffing() {
        assert!(is_pdf(b"%PDF-1.4 rest"));
        assert!(!is_pdf(b"\x89PNG\r\n"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn unreadable_input_becomes_invalid_record() {
        let config = ScanConfig::default();
        let record = read_mrz(Path::new("/nonexistent/input.png"), &config).unwrap();
        assert!(!record.valid);
        assert_eq!(record.valid_score, 0);
    }

    struct FlakyReader {
        calls: Cell<usize>,
    }

    impl Component for FlakyReader {
        fn provides(&self) -> &[&'static str] {
            &["record"]
        }
        fn depends(&self) -> &[&'static str] {
            &["scale_factor"]
        }
        fn compute(&self, _inputs: &[Artifact]) -> Result<Vec<Artifact>> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            let record = if call == 0 {
                MrzRecord::invalid()
            } else {
                let mut r = MrzRecord::invalid();
                r.mrz_type = Some(MrzType::Td3);
                r.valid = true;
                r.valid_score = 100;
                r.aux.insert("method".to_string(), "direct".to_string());
                r
            };
            Ok(vec![Artifact::Record(Box::new(record))])
        }
    }

    #[test]
    fn blank_scan_triggers_the_finer_second_phase() {
        let mut graph = PipelineGraph::new();
        graph
            .register("scaler", Box::new(Scaler::new(250)))
            .unwrap();
        graph.register("boone", Box::new(BooneStage)).unwrap();
        graph
            .register("reader", Box::new(FlakyReader { calls: Cell::new(0) }))
            .unwrap();
        // A blank page: the first pass finds nothing and the mask is empty.
        graph.set(
            "image",
            Artifact::Gray(GrayImage::from_pixel(120, 60, image::Luma([255]))),
        );

        let config = ScanConfig::default();
        let record = scan_graph(&mut graph, &config).unwrap();
        assert!(record.valid);
        assert_eq!(record.aux["method"], "direct|max_width(1000)");
    }

    #[test]
    fn found_record_skips_the_second_phase() {
        let mut graph = PipelineGraph::new();
        graph
            .register("scaler", Box::new(Scaler::new(250)))
            .unwrap();
        graph.register("boone", Box::new(BooneStage)).unwrap();
        let reader = FlakyReader { calls: Cell::new(1) };
        graph.register("reader", Box::new(reader)).unwrap();
        graph.set(
            "image",
            Artifact::Gray(GrayImage::from_pixel(120, 60, image::Luma([255]))),
        );

        let record = scan_graph(&mut graph, &ScanConfig::default()).unwrap();
        assert!(record.valid);
        assert_eq!(record.aux["method"], "direct");
    }
}
