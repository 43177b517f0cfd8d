//! Character recognition over an external `tesseract` process.
//!
//! The engine is behind a trait so the scan pipeline can be exercised with
//! scripted recognizers in tests. Failures distinguish a missing binary
//! from an engine error so callers can report an actionable message.

use std::io::ErrorKind;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use std::{env, fs, process, thread};

use image::GrayImage;
use thiserror::Error;
use tracing::debug;

/// The characters an MRZ may contain. Everything else is disabled in the
/// recognizer to cut down confusions.
const MRZ_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789><";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("tesseract is not installed or not on PATH")]
    NotInstalled,
    #[error("ocr engine exited with {status}: {stderr}")]
    Engine { status: String, stderr: String },
    #[error("ocr timed out after {0:?}")]
    Timeout(Duration),
    #[error("ocr i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub trait OcrEngine {
    fn recognize(&self, img: &GrayImage) -> Result<String, OcrError>;
}

/// Recognizer shelling out to the `tesseract` CLI with MRZ-tuned settings:
/// single-block page segmentation, a restricted character set and the
/// dictionary dawgs disabled.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: String,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The legacy (non-LSTM) recognizer. Often does better on the OCR-B
    /// typeface than the default engine.
    pub fn legacy() -> Self {
        Self::new().with_args(["--oem", "0"])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn run(&self, cmd: &mut Command) -> Result<Output, OcrError> {
        let Some(limit) = self.timeout else {
            return cmd.output().map_err(map_spawn_error);
        };
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(map_spawn_error)?;
        let start = Instant::now();
        loop {
            if child.try_wait()?.is_some() {
                return Ok(child.wait_with_output()?);
            }
            if start.elapsed() >= limit {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Timeout(limit));
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn recognize_file(&self, path: &std::path::Path) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(path)
            .arg("stdout")
            .args(["--psm", "6"])
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={MRZ_ALPHABET}"))
            .args(["-c", "load_system_dawg=F", "-c", "load_freq_dawg=F"])
            .args(&self.extra_args);
        debug!(?cmd, "invoking ocr engine");
        let output = self.run(&mut cmd)?;
        if !output.status.success() {
            return Err(OcrError::Engine {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn map_spawn_error(err: std::io::Error) -> OcrError {
    if err.kind() == ErrorKind::NotFound {
        OcrError::NotInstalled
    } else {
        OcrError::Io(err)
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, img: &GrayImage) -> Result<String, OcrError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = env::temp_dir().join(format!("mrzscan-{}-{stamp}.png", process::id()));
        img.save(&path)
            .map_err(|e| OcrError::Io(std::io::Error::other(e)))?;
        let result = self.recognize_file(&path);
        let _ = fs::remove_file(&path);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_reports_not_installed() {
        let engine = TesseractEngine::new().with_program("mrzscan-no-such-binary");
        let img = GrayImage::new(8, 8);
        assert!(matches!(engine.recognize(&img), Err(OcrError::NotInstalled)));
    }

    #[test]
    fn timeout_kills_the_child() {
        let engine = TesseractEngine::new().with_timeout(Duration::from_millis(100));
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let started = Instant::now();
        let result = engine.run(&mut cmd);
        assert!(matches!(result, Err(OcrError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
