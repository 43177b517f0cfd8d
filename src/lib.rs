pub mod core;
pub mod imgproc;
pub mod locate;
pub mod ocr;
pub mod parse;
pub mod pipeline;
pub mod scan;

pub use crate::core::record::{MrzRecord, MrzType};
pub use scan::{read_mrz, ScanConfig};
