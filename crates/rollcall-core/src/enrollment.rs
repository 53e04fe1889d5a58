//! Multi-sample enrollment.
//!
//! Each analysis cycle offers the engine a frame and its located regions.
//! A sample is accepted only if the best aligned region passes the quality,
//! temporal and diversity gates. Once enough samples are held, every sample
//! is expanded through [`ENROLLMENT_AUGMENTATIONS`] and the observations are
//! averaged, weighted by sample quality, into one enrollment descriptor.
//!
//! ```text
//! Empty ──accept──▶ Collecting ──accept──▶ Collecting ──last sample──▶ Complete
//!                        │
//!                        └──finalization yields nothing──▶ Empty
//! ```

use crate::analyzer::FaceAnalyzer;
use crate::augment::{Augmentation, ENROLLMENT_AUGMENTATIONS};
use crate::quality::{select_candidate, AlignmentPolicy};
use crate::types::{BoundingBox, Descriptor};
use image::RgbImage;

#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    pub required_samples: usize,
    /// Minimum number of cycles between two accepted samples.
    pub frame_gap: u64,
    pub quality_floor: f32,
    /// Candidates at or above this similarity to the last accepted sample
    /// count as near-duplicates.
    pub diversity_threshold: f32,
    pub alignment: AlignmentPolicy,
    pub ideal_face_size: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            required_samples: 10,
            frame_gap: 15,
            quality_floor: 0.55,
            diversity_threshold: 0.95,
            alignment: AlignmentPolicy::default(),
            ideal_face_size: 120.0,
        }
    }
}

/// An accepted face crop with its quality and descriptor.
#[derive(Debug, Clone)]
pub struct EnrollmentSample {
    pub crop: RgbImage,
    pub quality: f32,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone)]
pub enum EnrollmentState {
    Empty,
    Collecting {
        samples: Vec<EnrollmentSample>,
        /// Cycle index of the most recent accepted sample.
        last_accepted_at: u64,
    },
    Complete(Descriptor),
}

/// What happened to the candidate offered in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    NoFace,
    /// Faces were found but none is centered, frontal and large enough.
    NotAligned,
    LowQuality(f32),
    /// Too few cycles since the last accepted sample.
    Waiting,
    /// The extractor returned no descriptor.
    DescriptorUnavailable,
    /// Too close to the previous sample; the subject must change pose.
    TooSimilar(f32),
    Accepted { collected: usize, required: usize },
    Completed(Descriptor),
    /// Finalization produced no usable observation; state is back to Empty.
    Failed,
    AlreadyComplete,
}

impl Observation {
    /// Short user-facing status line.
    pub fn status(&self) -> String {
        match self {
            Observation::NoFace => "Look at the camera".to_string(),
            Observation::NotAligned => "Center your face".to_string(),
            Observation::LowQuality(q) => format!("Low quality ({q:.2}), improve lighting"),
            Observation::Waiting => "Hold still".to_string(),
            Observation::DescriptorUnavailable => "Recognizer unavailable".to_string(),
            Observation::TooSimilar(_) => "Move your head slightly".to_string(),
            Observation::Accepted { collected, required } => format!("Captured {collected}/{required}"),
            Observation::Completed(_) => "Enrollment complete".to_string(),
            Observation::Failed => "Enrollment failed, press to retry".to_string(),
            Observation::AlreadyComplete => "Enrollment complete".to_string(),
        }
    }
}

pub struct EnrollmentEngine {
    config: EnrollmentConfig,
    state: EnrollmentState,
    cycle: u64,
}

impl EnrollmentEngine {
    pub fn new(config: EnrollmentConfig) -> Self {
        Self {
            config,
            state: EnrollmentState::Empty,
            cycle: 0,
        }
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    /// `(collected, required)` sample counts.
    pub fn progress(&self) -> (usize, usize) {
        let collected = match &self.state {
            EnrollmentState::Empty => 0,
            EnrollmentState::Collecting { samples, .. } => samples.len(),
            EnrollmentState::Complete(_) => self.config.required_samples,
        };
        (collected, self.config.required_samples)
    }

    /// Drop all samples and their quality bookkeeping.
    pub fn reset(&mut self) {
        self.state = EnrollmentState::Empty;
    }

    /// Run one cycle of the enrollment pipeline.
    pub fn observe<A: FaceAnalyzer + ?Sized>(
        &mut self,
        frame: &RgbImage,
        regions: &[BoundingBox],
        analyzer: &mut A,
    ) -> Observation {
        let cycle = self.cycle;
        self.cycle += 1;

        if matches!(self.state, EnrollmentState::Complete(_)) {
            return Observation::AlreadyComplete;
        }
        if regions.is_empty() {
            return Observation::NoFace;
        }

        let Some(candidate) = select_candidate(
            frame,
            regions,
            Some(&self.config.alignment),
            self.config.ideal_face_size,
        ) else {
            return Observation::NotAligned;
        };

        let quality = candidate.quality.overall;
        if !candidate.quality.meets(self.config.quality_floor) {
            return Observation::LowQuality(quality);
        }

        if let EnrollmentState::Collecting { last_accepted_at, .. } = &self.state {
            if cycle.saturating_sub(*last_accepted_at) < self.config.frame_gap {
                return Observation::Waiting;
            }
        }

        let Some(descriptor) = analyzer.embed(&candidate.crop) else {
            return Observation::DescriptorUnavailable;
        };

        if let EnrollmentState::Collecting { samples, .. } = &self.state {
            if let Some(last) = samples.last() {
                let sim = descriptor.similarity(&last.descriptor);
                if sim >= self.config.diversity_threshold {
                    return Observation::TooSimilar(sim);
                }
            }
        }

        let sample = EnrollmentSample {
            crop: candidate.crop,
            quality,
            descriptor,
        };
        let collected = match &mut self.state {
            EnrollmentState::Collecting {
                samples,
                last_accepted_at,
            } => {
                samples.push(sample);
                *last_accepted_at = cycle;
                samples.len()
            }
            _ => {
                self.state = EnrollmentState::Collecting {
                    samples: vec![sample],
                    last_accepted_at: cycle,
                };
                1
            }
        };
        tracing::info!(collected, required = self.config.required_samples, quality, "enrollment sample accepted");

        if collected < self.config.required_samples {
            return Observation::Accepted {
                collected,
                required: self.config.required_samples,
            };
        }

        self.finalize(analyzer)
    }

    fn finalize<A: FaceAnalyzer + ?Sized>(&mut self, analyzer: &mut A) -> Observation {
        let samples = match std::mem::replace(&mut self.state, EnrollmentState::Empty) {
            EnrollmentState::Collecting { samples, .. } => samples,
            other => {
                self.state = other;
                return Observation::Failed;
            }
        };

        let mut observations: Vec<(Descriptor, f32)> = Vec::new();
        for sample in &samples {
            for aug in ENROLLMENT_AUGMENTATIONS {
                let descriptor = match aug {
                    Augmentation::Original => Some(sample.descriptor.clone()),
                    other => analyzer.embed(&other.apply(&sample.crop)),
                };
                if let Some(d) = descriptor {
                    observations.push((d, sample.quality));
                }
            }
        }

        match weighted_mean(&observations) {
            Some(descriptor) => {
                tracing::info!(
                    samples = samples.len(),
                    observations = observations.len(),
                    "enrollment complete"
                );
                self.state = EnrollmentState::Complete(descriptor.clone());
                Observation::Completed(descriptor)
            }
            None => {
                tracing::warn!(samples = samples.len(), "enrollment produced no valid observations; resetting");
                self.state = EnrollmentState::Empty;
                Observation::Failed
            }
        }
    }
}

/// Quality-weighted mean of descriptors, re-normalized to unit length.
fn weighted_mean(observations: &[(Descriptor, f32)]) -> Option<Descriptor> {
    let dim = observations.first()?.0.len();
    let mut acc = vec![0.0f32; dim];
    let mut total = 0.0f32;
    for (descriptor, weight) in observations {
        if descriptor.len() != dim || *weight <= 0.0 {
            continue;
        }
        for (a, v) in acc.iter_mut().zip(descriptor.values()) {
            *a += v * weight;
        }
        total += weight;
    }
    if total <= 0.0 {
        return None;
    }
    Descriptor::from_raw(acc)
}
