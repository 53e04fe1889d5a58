//! Enroll one synthetic identity end to end, then verify it against itself
//! and against an unrelated descriptor.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::analyzer::{AnalyzerError, FaceAnalyzer};
use rollcall_core::enrollment::{EnrollmentConfig, EnrollmentEngine, EnrollmentState, Observation};
use rollcall_core::matcher::{
    Classification, IdentityMatcher, RosterMatcher, StabilizerConfig, Verifier,
};
use rollcall_core::{BoundingBox, Descriptor, Identity};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DIM: usize = 128;
/// Norm of the per-crop deviation from the identity's base vector.
const JITTER: f32 = 0.35;

/// Every crop embeds to `base` plus a crop-dependent offset orthogonal to
/// it, so all crops look like one person with pose/lighting variation.
struct SyntheticFace {
    base: Vec<f32>,
}

impl SyntheticFace {
    fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self { base: raw.iter().map(|v| v / norm).collect() }
    }

    fn orthogonal_unit(&self, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let dot: f32 = v.iter().zip(&self.base).map(|(a, b)| a * b).sum();
        for (x, b) in v.iter_mut().zip(&self.base) {
            *x -= dot * b;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }
}

impl FaceAnalyzer for SyntheticFace {
    fn is_ready(&self) -> bool {
        true
    }

    fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(vec![face_region()])
    }

    fn embed(&mut self, crop: &RgbImage) -> Option<Descriptor> {
        let mut hasher = DefaultHasher::new();
        crop.as_raw().hash(&mut hasher);
        let offset = self.orthogonal_unit(hasher.finish());
        let raw = self.base.iter().zip(&offset).map(|(b, o)| b + JITTER * o).collect();
        Descriptor::from_raw(raw)
    }
}

fn face_region() -> BoundingBox {
    BoundingBox { x: 100.0, y: 60.0, width: 120.0, height: 120.0, confidence: 0.95 }
}

/// Random mid-gray texture: sharp, well exposed, high contrast.
fn frame(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(320, 240, |_, _| {
        let v = rng.gen_range(28u8..=228);
        Rgb([v, v, v])
    })
}

fn enroll(analyzer: &mut SyntheticFace) -> Descriptor {
    let mut engine = EnrollmentEngine::new(EnrollmentConfig::default());
    let regions = vec![face_region()];
    let mut accepted: Vec<Descriptor> = Vec::new();

    for cycle in 0..400u64 {
        let image = frame(1000 + cycle);
        match engine.observe(&image, &regions, analyzer) {
            Observation::Accepted { collected, .. } => {
                if let EnrollmentState::Collecting { samples, .. } = engine.state() {
                    let last = samples.last().unwrap();
                    assert!(last.quality >= 0.6, "quality {}", last.quality);
                    if let Some(prev) = accepted.last() {
                        assert!(prev.similarity(&last.descriptor) < 0.95);
                    }
                    accepted.push(last.descriptor.clone());
                }
                assert_eq!(collected, accepted.len());
            }
            Observation::Completed(descriptor) => {
                assert_eq!(accepted.len(), 9, "completion happens on the tenth sample");
                return descriptor;
            }
            Observation::Waiting => {}
            other => panic!("cycle {cycle}: unexpected {other:?}"),
        }
    }
    panic!("enrollment never completed");
}

#[test]
fn test_enroll_then_verify_same_and_other_identity() {
    let mut person = SyntheticFace::new(7);
    let enrolled = enroll(&mut person);

    let norm = enrolled.values().iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5, "norm {norm}");

    let owner = Identity { id: "owner".into(), name: "Owner".into(), descriptor: enrolled.clone() };
    let mut verifier = Verifier::new(owner.clone(), 0.90, StabilizerConfig::default());

    // Same person, fresh crops.
    let mut last = None;
    for cycle in 0..7u64 {
        let crop = face_region().crop(&frame(9000 + cycle)).unwrap();
        let probe = person.embed(&crop);
        last = Some(verifier.evaluate(probe.as_ref()));
    }
    let same = last.unwrap();
    assert!(same.stable);
    assert!(same.similarity >= 0.90, "similarity {}", same.similarity);
    assert!(same.is_match());

    // A different person at cosine 0.2 to the enrolled descriptor.
    let stranger_dir = person.orthogonal_unit(424242);
    let e = enrolled.values();
    let dot: f32 = stranger_dir.iter().zip(e).map(|(a, b)| a * b).sum();
    let perp: Vec<f32> = stranger_dir.iter().zip(e).map(|(a, b)| a - dot * b).collect();
    let perp_norm = perp.iter().map(|v| v * v).sum::<f32>().sqrt();
    let stranger = Descriptor::from_raw(
        e.iter()
            .zip(&perp)
            .map(|(a, p)| 0.2 * a + (1.0f32 - 0.04).sqrt() * p / perp_norm)
            .collect(),
    )
    .unwrap();
    assert!((stranger.similarity(&enrolled) - 0.2).abs() < 1e-4);

    verifier.reset();
    let mut last = None;
    for _ in 0..7 {
        last = Some(verifier.evaluate(Some(&stranger)));
    }
    let other = last.unwrap();
    assert!(other.stable);
    assert_eq!(other.classification, Classification::NoMatch);

    // The roster operating point accepts the owner and rejects the stranger.
    let mut roster = RosterMatcher::new(0.60, StabilizerConfig::default());
    roster.set_roster(Arc::new(vec![owner]));
    let mut last = None;
    for _ in 0..5 {
        last = Some(roster.evaluate(Some(&stranger)));
    }
    assert_eq!(last.unwrap().classification, Classification::NoMatch);
}
