//! MobileFaceNet descriptor extractor via ONNX Runtime.
//!
//! Face crops are resized to 112x112 RGB, normalized to roughly [-1, 1]
//! and the network output is L2-normalized into a [`Descriptor`].

use crate::analyzer::AnalyzerError;
use crate::types::Descriptor;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const EMBEDDER_INPUT_SIZE: u32 = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_SCALE: f32 = 1.0 / 128.0;

/// Descriptor extractor. Holds no session when the model failed to load,
/// in which case every [`embed`](Self::embed) call yields `None`.
pub struct FaceEmbedder {
    session: Option<Session>,
}

impl FaceEmbedder {
    /// Load the model, logging instead of failing when it is unavailable.
    pub fn load(model_path: &str) -> Self {
        if !Path::new(model_path).exists() {
            tracing::error!(path = model_path, "embedder model not found; descriptors unavailable");
            return Self::unloaded();
        }

        match open_session(model_path) {
            Ok(session) => {
                tracing::info!(
                    path = model_path,
                    outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
                    "loaded MobileFaceNet embedder"
                );
                Self {
                    session: Some(session),
                }
            }
            Err(e) => {
                tracing::error!(path = model_path, error = %e, "embedder model failed to load");
                Self::unloaded()
            }
        }
    }

    pub fn unloaded() -> Self {
        Self { session: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn embed(&mut self, crop: &RgbImage) -> Option<Descriptor> {
        let session = self.session.as_mut()?;
        if crop.width() == 0 || crop.height() == 0 {
            return None;
        }

        let input = preprocess(crop);
        let tensor = TensorRef::from_array_view(input.view()).ok()?;
        let outputs = match session.run(ort::inputs![tensor]) {
            Ok(outputs) => outputs,
            Err(e) => {
                tracing::warn!(error = %e, "embedder inference failed");
                return None;
            }
        };
        let (_, raw) = outputs[0].try_extract_tensor::<f32>().ok()?;
        Descriptor::from_raw(raw.to_vec())
    }
}

fn open_session(model_path: &str) -> Result<Session, AnalyzerError> {
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?)
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(crop, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE, FilterType::Triangle);
    let size = EMBEDDER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - EMBEDDER_MEAN) * EMBEDDER_SCALE;
        }
    }
    tensor
}
