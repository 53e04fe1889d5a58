//! rollcall-core: Face analysis, enrollment and identity matching.
//!
//! Faces are located with SCRFD and embedded with MobileFaceNet, both via
//! ONNX Runtime on the CPU. Everything above the [`FaceAnalyzer`] seam is
//! pure and runs without models.

pub mod analyzer;
pub mod augment;
pub mod detector;
pub mod enrollment;
pub mod matcher;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use enrollment::{EnrollmentConfig, EnrollmentEngine, EnrollmentState, Observation};
pub use matcher::{Classification, IdentityMatcher, MatchResult, RosterMatcher, StabilizerConfig, Verifier};
pub use quality::{select_candidate, AlignmentPolicy, Candidate, QualityScore};
pub use types::{BoundingBox, Descriptor, Identity};
