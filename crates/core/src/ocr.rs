//! Text reading with the `ocrs` engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;

use crate::detect::TextReader;
use crate::types::{Capture, TextHit};

pub const DETECTION_MODEL: &str = "text-detection.rten";
pub const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// `~/.cache/ocrs`, where the ocrs CLI keeps its downloaded models.
pub fn default_models_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache").join("ocrs"))
}

/// Load both models from `dir` and build an engine all workers can share.
pub fn load_engine(dir: &Path) -> Result<Arc<OcrEngine>> {
    let detection_path = dir.join(DETECTION_MODEL);
    let recognition_path = dir.join(RECOGNITION_MODEL);
    let detection_model = Model::load_file(&detection_path)
        .with_context(|| format!("load detection model {:?}", detection_path))?;
    let recognition_model = Model::load_file(&recognition_path)
        .with_context(|| format!("load recognition model {:?}", recognition_path))?;

    let engine = OcrEngine::new(OcrEngineParams {
        detection_model: Some(detection_model),
        recognition_model: Some(recognition_model),
        ..Default::default()
    })
    .context("create OCR engine")?;
    Ok(Arc::new(engine))
}

/// One hit per recognized text line.
pub struct OcrsReader {
    engine: Arc<OcrEngine>,
}

impl OcrsReader {
    pub fn new(engine: Arc<OcrEngine>) -> Self {
        Self { engine }
    }
}

impl TextReader for OcrsReader {
    fn read(&mut self, frame: &Capture) -> Result<Vec<TextHit>> {
        let rgb = frame.to_rgb();
        let (width, height) = rgb.dimensions();
        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))?;
        let input = self.engine.prepare_input(source)?;

        let word_rects = self.engine.detect_words(&input)?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        let lines = self.engine.recognize_text(&input, &line_rects)?;

        Ok(lines
            .iter()
            .filter_map(|line| line.as_ref())
            .map(|line| line.words().map(|w| w.to_string()).collect::<Vec<_>>().join(" "))
            .filter(|text| !text.trim().is_empty())
            .map(|text| {
                let confidence = legibility(&text);
                TextHit::new(text, confidence)
            })
            .collect())
    }
}

/// Score for a recognized line: the share of its non-space characters that
/// are letters, digits or ordinary punctuation. ocrs reports no
/// recognition score, and misread noise tends to come out as stray symbols.
pub fn legibility(text: &str) -> f32 {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let clean = chars
        .iter()
        .filter(|c| c.is_alphanumeric() || ".,:;!?'\"-()%/+".contains(**c))
        .count();
    clean as f32 / chars.len() as f32
}
