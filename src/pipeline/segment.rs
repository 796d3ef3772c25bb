//! Text extraction from tall bitmaps.
//!
//! Long till receipts photographed top-to-bottom come out as images ten or
//! more times taller than they are wide. Recognisers downscale such images
//! until the print is unreadable, so anything taller than the configured
//! aspect ratio is cut into overlapping horizontal bands that are recognised
//! one at a time.
//!
//! ## Overlap dedup
//!
//! A text line that straddles a cut is recognised twice: once at the bottom
//! of band *n* and once at the top of band *n+1*. Before appending band
//! *n+1*, its leading lines are compared with the trailing lines of the last
//! band that produced text; the longest exact match (up to
//! `max_overlap_lines`) is dropped.
//!
//! Bands are processed strictly in order: each dedup decision depends on
//! the previous band's output.

use crate::config::SegmentationConfig;
use image::DynamicImage;
use std::ops::Range;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Label placed above recognised text when it is appended to a prompt.
pub const RECOGNIZED_TEXT_LABEL: &str = "Text recognised in the image:";

/// External text-recognition capability: bitmap in, ordered lines out.
///
/// `None` (or an empty list) means nothing was recognised. Implementations
/// must not panic on unreadable input.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Option<Vec<String>>;
}

/// Vertical pixel ranges to recognise for an image of the given size.
///
/// Returns a single full-height range unless the image is both taller than
/// `aspect_ratio_threshold` × width and taller than one segment.
pub fn plan_segments(width: u32, height: u32, config: &SegmentationConfig) -> Vec<Range<u32>> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let aspect = height as f64 / width as f64;
    if aspect <= config.aspect_ratio_threshold || height <= config.segment_height {
        return vec![0..height];
    }
    if config.segment_height == 0 {
        warn!("Segment height is 0; recognising the image whole");
        return vec![0..height];
    }

    let step = if config.overlap < config.segment_height {
        config.segment_height - config.overlap
    } else {
        let half = (config.segment_height / 2).max(1);
        warn!(
            "Segment overlap ({}) is not below segment height ({}); stepping by {half} px",
            config.overlap, config.segment_height
        );
        half
    };
    let mut ranges = Vec::new();
    let mut y = 0u32;
    while y < height {
        let end = y.saturating_add(config.segment_height).min(height);
        ranges.push(y..end);
        y = y.saturating_add(step);
    }
    ranges
}

/// Number of leading `current` lines that repeat the tail of `previous`.
///
/// Candidate sizes are tried from `max_lines` down to 1; the first exact
/// match wins. Returns 0 when nothing matches.
pub fn overlap_len(previous: &[String], current: &[String], max_lines: usize) -> usize {
    let upper = max_lines.min(previous.len()).min(current.len());
    (1..=upper)
        .rev()
        .find(|&n| previous[previous.len() - n..] == current[..n])
        .unwrap_or(0)
}

/// Segment-and-dedup text extraction over a [`TextRecognizer`].
pub struct TextExtractor<'a> {
    recognizer: &'a dyn TextRecognizer,
    config: SegmentationConfig,
}

impl<'a> TextExtractor<'a> {
    pub fn new(recognizer: &'a dyn TextRecognizer, config: SegmentationConfig) -> Self {
        Self { recognizer, config }
    }

    /// Recognise all text in `image`, or `None` when nothing was found.
    pub fn extract(&self, image: &DynamicImage) -> Option<String> {
        let (width, height) = (image.width(), image.height());
        let plan = plan_segments(width, height, &self.config);

        if plan.len() <= 1 {
            debug!("Recognising {}x{} image in one pass", width, height);
            let lines = self.recognizer.recognize(image).unwrap_or_default();
            return join_non_empty(&lines);
        }

        info!(
            "Image {}x{} (aspect {:.1}) split into {} segments",
            width,
            height,
            height as f64 / width as f64,
            plan.len()
        );

        let mut merged: Vec<String> = Vec::new();
        let mut previous: Option<Vec<String>> = None;

        for (idx, range) in plan.into_iter().enumerate() {
            let band_height = range.end - range.start;
            if band_height == 0 {
                warn!("Segment {}: empty band, skipped", idx);
                continue;
            }
            let band = image.crop_imm(0, range.start, width, band_height);

            let lines = match self.recognizer.recognize(&band) {
                Some(lines) if !lines.is_empty() => lines,
                _ => {
                    debug!("Segment {} ({:?}): no text", idx, range);
                    continue;
                }
            };

            let skip = previous
                .as_deref()
                .map_or(0, |prev| overlap_len(prev, &lines, self.config.max_overlap_lines));
            if skip > 0 {
                debug!("Segment {}: dropped {} overlapping lines", idx, skip);
            }

            merged.extend(lines[skip..].iter().cloned());
            previous = Some(lines);
        }

        join_non_empty(&merged)
    }

    /// Append recognised text to `prompt` as a labelled block.
    ///
    /// Returns `prompt` unchanged when nothing was recognised.
    pub fn extract_into_prompt(&self, image: &DynamicImage, prompt: &str) -> String {
        match self.extract(image) {
            Some(text) => augment_prompt(prompt, &text),
            None => prompt.to_string(),
        }
    }
}

/// `prompt` followed by a blank line and the labelled text block.
pub fn augment_prompt(prompt: &str, text: &str) -> String {
    format!("{prompt}\n\n{RECOGNIZED_TEXT_LABEL}\n{text}")
}

fn join_non_empty(lines: &[String]) -> Option<String> {
    let text = lines.join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// [`TextRecognizer`] backed by the `tesseract` command-line tool.
///
/// Each call writes the bitmap to a temporary PNG and reads recognised text
/// from stdout. Uses the LSTM engine (`--oem 1`) and single-column page
/// segmentation (`--psm 4`), which suit receipts.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    language: String,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// `true` when a `tesseract` binary can be started.
    pub fn is_available() -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, String> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--oem", "1", "--psm", "4"])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => Err(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err("tesseract not found (install tesseract-ocr)".to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("eng")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Option<Vec<String>> {
        let temp_dir = TempDir::new()
            .map_err(|e| warn!("Could not create temp dir for OCR: {}", e))
            .ok()?;
        let path = temp_dir.path().join("segment.png");
        if let Err(e) = image.save_with_format(&path, image::ImageFormat::Png) {
            warn!("Could not write OCR input: {}", e);
            return None;
        }

        match self.run_tesseract(&path) {
            Ok(stdout) => Some(split_lines(&stdout)),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

/// Trimmed, non-empty lines of recogniser output.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
