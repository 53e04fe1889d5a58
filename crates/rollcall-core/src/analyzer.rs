//! The face analysis seam: locate faces in a frame, embed a face crop.

use crate::detector::FaceLocator;
use crate::recognizer::FaceEmbedder;
use crate::types::{BoundingBox, Descriptor};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face locator plus descriptor extractor.
///
/// `embed` never fails loudly: an unloaded or failing extractor returns
/// `None`, which callers treat as an automatic rejection.
pub trait FaceAnalyzer {
    /// Whether the descriptor extractor is loaded.
    fn is_ready(&self) -> bool;

    /// Candidate face regions in `frame`, best first.
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Descriptor for an already-cropped face.
    fn embed(&mut self, crop: &RgbImage) -> Option<Descriptor>;
}

impl<T: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        (**self).locate(frame)
    }

    fn embed(&mut self, crop: &RgbImage) -> Option<Descriptor> {
        (**self).embed(crop)
    }
}

/// ONNX Runtime backed analyzer: SCRFD locator plus MobileFaceNet embedder.
pub struct OnnxAnalyzer {
    locator: FaceLocator,
    embedder: FaceEmbedder,
}

impl OnnxAnalyzer {
    /// Load both models. The locator is required; a missing or broken
    /// embedder leaves the analyzer running with `is_ready() == false`.
    pub fn load(locator_path: &str, embedder_path: &str) -> Result<Self, AnalyzerError> {
        let locator = FaceLocator::load(locator_path)?;
        let embedder = FaceEmbedder::load(embedder_path);
        Ok(Self { locator, embedder })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn is_ready(&self) -> bool {
        self.embedder.is_loaded()
    }

    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.locator.locate(frame)
    }

    fn embed(&mut self, crop: &RgbImage) -> Option<Descriptor> {
        self.embedder.embed(crop)
    }
}
