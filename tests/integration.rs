//! End-to-end tests over the public API: a synthetic document image goes
//! through loading, downscaling, binarization and box location, and a
//! scripted recognizer stands in for tesseract so the full read path runs
//! without external tools.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;

use image::{GrayImage, Luma};

use mrzscan::ocr::{OcrEngine, OcrError};
use mrzscan::scan::reader::MrzFinder;
use mrzscan::scan::{build_graph, extract_rois, read_mrz, ScanConfig};

const VALID_TD3: &str = "P<POLKOWALSKA<KWIATKOWSKA<<JOANNA<<<<<<<<<<<\nAA00000000POL6002084F1412314<<<<<<<<<<<<<<<4";

struct ScriptedEngine {
    responses: RefCell<VecDeque<&'static str>>,
}

impl ScriptedEngine {
    fn new(responses: &[&'static str]) -> Self {
        Self {
            responses: RefCell::new(responses.iter().copied().collect()),
        }
    }
}

impl OcrEngine for ScriptedEngine {
    fn recognize(&self, _img: &GrayImage) -> Result<String, OcrError> {
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .expect("recognizer called more often than scripted")
            .to_string())
    }
}

/// A white page with two dashed dark bands near the bottom, mimicking the
/// texture an MRZ presents to the binarization.
fn synthetic_document() -> GrayImage {
    let mut img = GrayImage::from_pixel(440, 280, Luma([255]));
    for (y0, y1) in [(200u32, 212u32), (218, 230)] {
        for y in y0..y1 {
            for x in 30..420u32 {
                if (x / 4) % 2 == 0 {
                    img.put_pixel(x, y, Luma([30]));
                }
            }
        }
    }
    img
}

fn temp_png(name: &str, img: &GrayImage) -> PathBuf {
    let path = std::env::temp_dir().join(format!("mrzscan-test-{}-{name}", std::process::id()));
    img.save_with_format(&path, image::ImageFormat::Png)
        .expect("temp png written");
    path
}

#[test]
fn locates_the_text_band_in_a_synthetic_document() {
    let path = temp_png("locate.png", &synthetic_document());
    let mut graph = build_graph(&path, &ScanConfig::default()).unwrap();

    let boxes_artifact = graph.get("boxes").unwrap();
    let boxes = boxes_artifact.boxes().unwrap();
    assert!(!boxes.is_empty(), "no candidate region found");

    let factor = graph.get("scale_factor").unwrap().scalar().unwrap();
    assert!(factor < 1.0);

    // The largest box is the merged band: wide, upright, near the bottom.
    let band = &boxes[0];
    assert!(band.angle.abs() < 0.1);
    assert!(band.width > 150.0);
    let expected_cy = 215.0 * factor;
    assert!((band.cy - expected_cy).abs() < 10.0);

    let rois = extract_rois(&mut graph).unwrap();
    assert_eq!(rois.len(), boxes.len());
    assert!(rois[0].width() > 300);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn located_band_reads_into_a_valid_record() {
    let path = temp_png("read.png", &synthetic_document());
    let mut graph = build_graph(&path, &ScanConfig::default()).unwrap();

    let boxes_artifact = graph.get("boxes").unwrap();
    let boxes = boxes_artifact.boxes().unwrap();
    let image_artifact = graph.get("image").unwrap();
    let img = image_artifact.gray().unwrap();
    let factor = graph.get("scale_factor").unwrap().scalar().unwrap();

    let engine = ScriptedEngine::new(&[VALID_TD3]);
    let record = MrzFinder::new(&engine)
        .find(boxes, img, 1.0 / factor)
        .unwrap()
        .expect("band should parse");

    assert!(record.valid);
    assert_eq!(record.valid_score, 100);
    assert_eq!(record.surname, "KOWALSKA KWIATKOWSKA");
    assert_eq!(record.aux["method"], "direct");
    assert_eq!(record.aux["box_index"], "0");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn blank_page_yields_an_invalid_record_without_ocr() {
    // No candidate boxes means the recognizer never runs, in either phase.
    let blank = GrayImage::from_pixel(300, 200, Luma([255]));
    let path = temp_png("blank.png", &blank);

    let record = read_mrz(&path, &ScanConfig::default()).unwrap();
    assert!(!record.valid);
    assert_eq!(record.valid_score, 0);
    assert!(record.mrz_type.is_none());

    let _ = std::fs::remove_file(&path);
}
