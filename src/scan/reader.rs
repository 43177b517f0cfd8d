//! Turns a located region into a parsed record.
//!
//! A single OCR pass over the extracted region often fails on weak scans,
//! so the reader walks a short ladder of transformed retries and keeps the
//! candidate with the best validity score, stopping as soon as one is
//! fully valid.

use image::imageops::{self, FilterType};
use image::GrayImage;
use tracing::debug;

use crate::core::geometry::RotatedBox;
use crate::core::record::MrzRecord;
use crate::imgproc::{enhance_dark_features, upscale};
use crate::ocr::{OcrEngine, OcrError};
use crate::parse::from_ocr;

/// Extraction margin around the located box, in unscaled pixels.
pub(crate) const ROI_MARGIN: f64 = 5.0;
/// Regions narrower than this get upscaled before the rescaled retries.
const RESCALE_WIDTH_LIMIT: u32 = 700;
/// Target width the rescaled retries aim for.
const RESCALE_TARGET: f64 = 1050.0;

pub struct BoxReader<'a> {
    engine: &'a dyn OcrEngine,
}

impl<'a> BoxReader<'a> {
    pub fn new(engine: &'a dyn OcrEngine) -> Self {
        Self { engine }
    }

    /// Reads one candidate box out of the full-resolution image. `scale`
    /// maps the box coordinates (measured on the downscaled image) back to
    /// the full image.
    pub fn read(
        &self,
        rb: &RotatedBox,
        img: &GrayImage,
        scale: f64,
    ) -> Result<MrzRecord, OcrError> {
        let mut roi = rb.extract_from_image(img, scale, ROI_MARGIN, ROI_MARGIN);
        let mut text = self.engine.recognize(&roi)?;

        // A region held upside down reads as a stream of `>` instead of `<`.
        if text.contains(">>") || (text.contains('>') && !text.contains('<')) {
            roi = imageops::rotate180(&roi);
            text = self.engine.recognize(&roi)?;
        }

        let mut record = from_ocr(&text);
        record.aux.insert("method".to_string(), "direct".to_string());
        record.roi = Some(roi.clone());
        if record.valid {
            return Ok(record);
        }
        if !text.contains('<') {
            // Not even filler characters; retries will not help.
            return Ok(record);
        }
        debug!(score = record.valid_score, "direct read not valid, retrying");

        record = self.try_rescaled(&roi, record, FilterType::CatmullRom, "rescaled(3)")?;
        if record.valid {
            return Ok(record);
        }
        record = self.try_rescaled(&roi, record, FilterType::Nearest, "rescaled(0)")?;
        if record.valid {
            return Ok(record);
        }
        self.try_enhanced(&roi, record)
    }

    /// Retries on an integer-upscaled copy of the region, keeping the new
    /// candidate only when it strictly improves the score.
    fn try_rescaled(
        &self,
        roi: &GrayImage,
        current: MrzRecord,
        filter: FilterType,
        tag: &str,
    ) -> Result<MrzRecord, OcrError> {
        if roi.width() > RESCALE_WIDTH_LIMIT {
            return Ok(current);
        }
        let factor = ((RESCALE_TARGET / roi.width() as f64 + 0.5) as u32).max(1);
        let big = upscale(roi, factor, filter);
        let text = self.engine.recognize(&big)?;
        let mut candidate = from_ocr(&text);
        candidate.aux.insert("method".to_string(), tag.to_string());
        candidate.roi = Some(big);
        Ok(if candidate.valid_score > current.valid_score {
            candidate
        } else {
            current
        })
    }

    /// Retries on a dark-feature-enhanced copy, then on its upscaled form.
    fn try_enhanced(
        &self,
        roi: &GrayImage,
        current: MrzRecord,
    ) -> Result<MrzRecord, OcrError> {
        let dark = enhance_dark_features(roi);
        let text = self.engine.recognize(&dark)?;
        let mut candidate = from_ocr(&text);
        candidate
            .aux
            .insert("method".to_string(), "black_tophat".to_string());
        candidate.roi = Some(dark.clone());
        let best = if candidate.valid_score > current.valid_score {
            candidate
        } else {
            current
        };
        if best.valid {
            return Ok(best);
        }
        self.try_rescaled(&dark, best, FilterType::CatmullRom, "black_tophat(rescaled(3))")
    }
}

/// Runs the reader over every candidate box and picks the winner: the
/// first fully valid record short-circuits, otherwise the best nonzero
/// score wins.
pub struct MrzFinder<'a> {
    reader: BoxReader<'a>,
}

impl<'a> MrzFinder<'a> {
    pub fn new(engine: &'a dyn OcrEngine) -> Self {
        Self {
            reader: BoxReader::new(engine),
        }
    }

    pub fn find(
        &self,
        boxes: &[RotatedBox],
        img: &GrayImage,
        scale: f64,
    ) -> Result<Option<MrzRecord>, OcrError> {
        let mut best: Option<(usize, MrzRecord)> = None;
        for (i, rb) in boxes.iter().enumerate() {
            let record = self.reader.read(rb, img, scale)?;
            if record.valid {
                return Ok(Some(tag_box(record, i)));
            }
            let better = best
                .as_ref()
                .map_or(record.valid_score > 0, |(_, b)| {
                    record.valid_score > b.valid_score
                });
            if better {
                best = Some((i, record));
            }
        }
        Ok(best.map(|(i, record)| tag_box(record, i)))
    }
}

fn tag_box(mut record: MrzRecord, index: usize) -> MrzRecord {
    record.aux.insert("box_index".to_string(), index.to_string());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    const VALID_TD3: &str = "P<POLKOWALSKA<KWIATKOWSKA<<JOANNA<<<<<<<<<<<\nAA00000000POL6002084F1412314<<<<<<<<<<<<<<<4";
    // Same document with the composite check digit corrupted.
    const BROKEN_TD3: &str = "P<POLKOWALSKA<KWIATKOWSKA<<JOANNA<<<<<<<<<<<\nAA00000000POL6002084F1412314<<<<<<<<<<<<<<<9";

    struct ScriptedEngine {
        responses: RefCell<VecDeque<&'static str>>,
        calls: Cell<usize>,
    }

    impl ScriptedEngine {
        fn new(responses: &[&'static str]) -> Self {
            Self {
                responses: RefCell::new(responses.iter().copied().collect()),
                calls: Cell::new(0),
            }
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(&self, _img: &GrayImage) -> Result<String, OcrError> {
            self.calls.set(self.calls.get() + 1);
            let text = self
                .responses
                .borrow_mut()
                .pop_front()
                .expect("recognizer called more often than scripted");
            Ok(text.to_string())
        }
    }

    fn test_box() -> RotatedBox {
        RotatedBox {
            cx: 200.0,
            cy: 150.0,
            width: 300.0,
            height: 60.0,
            angle: 0.0,
            points: Vec::new(),
        }
    }

    fn test_image() -> GrayImage {
        GrayImage::from_pixel(400, 300, image::Luma([255]))
    }

    #[test]
    fn direct_read_short_circuits() {
        let engine = ScriptedEngine::new(&[VALID_TD3]);
        let reader = BoxReader::new(&engine);
        let record = reader.read(&test_box(), &test_image(), 1.0).unwrap();
        assert!(record.valid);
        assert_eq!(record.aux["method"], "direct");
        assert_eq!(engine.calls.get(), 1);
        assert!(record.roi.is_some());
    }

    #[test]
    fn upside_down_region_is_flipped_and_reread() {
        let engine = ScriptedEngine::new(&["VVV>>ZZZ>>", VALID_TD3]);
        let reader = BoxReader::new(&engine);
        let record = reader.read(&test_box(), &test_image(), 1.0).unwrap();
        assert!(record.valid);
        assert_eq!(engine.calls.get(), 2);
    }

    #[test]
    fn rescaled_retry_improves_on_a_broken_read() {
        let engine = ScriptedEngine::new(&[BROKEN_TD3, VALID_TD3]);
        let reader = BoxReader::new(&engine);
        let record = reader.read(&test_box(), &test_image(), 1.0).unwrap();
        assert!(record.valid);
        assert_eq!(record.aux["method"], "rescaled(3)");
        assert_eq!(engine.calls.get(), 2);
    }

    #[test]
    fn text_without_fillers_stops_immediately() {
        let engine = ScriptedEngine::new(&["NOTHING USEFUL HERE AT ALL"]);
        let reader = BoxReader::new(&engine);
        let record = reader.read(&test_box(), &test_image(), 1.0).unwrap();
        assert!(!record.valid);
        assert_eq!(record.valid_score, 0);
        assert_eq!(engine.calls.get(), 1);
    }

    #[test]
    fn ladder_keeps_best_scoring_candidate() {
        // Every retry produces the same broken text; the ladder runs out
        // and the direct candidate survives on its score.
        let engine =
            ScriptedEngine::new(&[BROKEN_TD3, BROKEN_TD3, BROKEN_TD3, BROKEN_TD3, BROKEN_TD3]);
        let reader = BoxReader::new(&engine);
        let record = reader.read(&test_box(), &test_image(), 1.0).unwrap();
        assert!(!record.valid);
        assert!(record.valid_score > 0);
        assert_eq!(record.aux["method"], "direct");
        assert_eq!(engine.calls.get(), 5);
    }

    #[test]
    fn finder_reports_winning_box_index() {
        let engine = ScriptedEngine::new(&["NO FILLERS", VALID_TD3]);
        let finder = MrzFinder::new(&engine);
        let boxes = [test_box(), test_box()];
        let record = finder
            .find(&boxes, &test_image(), 1.0)
            .unwrap()
            .expect("second box is readable");
        assert!(record.valid);
        assert_eq!(record.aux["box_index"], "1");
    }

    #[test]
    fn finder_returns_none_when_nothing_scores() {
        let engine = ScriptedEngine::new(&["NO FILLERS", "STILL NOTHING"]);
        let finder = MrzFinder::new(&engine);
        let boxes = [test_box(), test_box()];
        assert!(finder.find(&boxes, &test_image(), 1.0).unwrap().is_none());
    }
}
