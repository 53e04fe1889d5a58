//! Identity matching with temporal smoothing.
//!
//! A single frame's similarity jitters with pose and lighting, so every
//! matcher feeds its per-frame score through a [`Stabilizer`] and only
//! classifies once the window is settled.

use crate::types::{Descriptor, Identity};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Cosine similarity of two unit descriptors, clamped to [-1, 1].
pub fn similarity(a: &Descriptor, b: &Descriptor) -> f32 {
    a.similarity(b)
}

#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// Number of recent scores retained.
    pub window: usize,
    /// Scores required before the signal can be stable.
    pub min_samples: usize,
    /// Sample standard deviation below which the window is stable.
    pub max_std_dev: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            window: 7,
            min_samples: 5,
            max_std_dev: 0.05,
        }
    }
}

/// Summary of the current stabilizer window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Window mean, the effective similarity.
    pub mean: f32,
    pub std_dev: f32,
    pub samples: usize,
    pub stable: bool,
}

/// Rolling window over the last N similarity scores.
#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizerConfig,
    values: VecDeque<f32>,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        let capacity = config.window.max(1);
        Self {
            config,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f32) -> Reading {
        if self.values.len() == self.config.window.max(1) {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.reading()
    }

    pub fn reading(&self) -> Reading {
        let n = self.values.len();
        if n == 0 {
            return Reading {
                mean: 0.0,
                std_dev: 0.0,
                samples: 0,
                stable: false,
            };
        }
        let mean = self.values.iter().sum::<f32>() / n as f32;
        let std_dev = if n > 1 {
            let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1) as f32;
            var.sqrt()
        } else {
            0.0
        };
        Reading {
            mean,
            std_dev,
            samples: n,
            stable: n >= self.config.min_samples && std_dev < self.config.max_std_dev,
        }
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// Not enough settled evidence yet.
    Pending,
    Match { id: String, name: String },
    NoMatch,
    /// The live crop fell below the quality floor; the matcher was not consulted.
    InsufficientQuality,
    /// The extractor produced no descriptor.
    Unavailable,
}

/// Outcome of one matching cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Effective (window mean) similarity.
    pub similarity: f32,
    pub stable: bool,
    pub classification: Classification,
}

impl MatchResult {
    pub fn insufficient_quality() -> Self {
        Self {
            similarity: 0.0,
            stable: false,
            classification: Classification::InsufficientQuality,
        }
    }

    fn unavailable() -> Self {
        Self {
            similarity: 0.0,
            stable: false,
            classification: Classification::Unavailable,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.classification, Classification::Match { .. })
    }
}

/// Map a stabilizer reading onto a classification.
pub fn classify(reading: &Reading, threshold: f32, identity: Option<&Identity>) -> Classification {
    if !reading.stable {
        return Classification::Pending;
    }
    match identity {
        Some(id) if reading.mean >= threshold => Classification::Match {
            id: id.id.clone(),
            name: id.name.clone(),
        },
        _ => Classification::NoMatch,
    }
}

/// Strategy for turning a live descriptor into a smoothed classification.
pub trait IdentityMatcher {
    /// Score one cycle. `None` is an invalid descriptor and is rejected
    /// without touching the window.
    fn evaluate(&mut self, probe: Option<&Descriptor>) -> MatchResult;

    /// Forget the smoothing window (face lost, subject changed).
    fn reset(&mut self);
}

/// Single-owner verification against one enrolled descriptor.
pub struct Verifier {
    owner: Identity,
    threshold: f32,
    stabilizer: Stabilizer,
}

impl Verifier {
    pub fn new(owner: Identity, threshold: f32, config: StabilizerConfig) -> Self {
        Self {
            owner,
            threshold,
            stabilizer: Stabilizer::new(config),
        }
    }
}

impl IdentityMatcher for Verifier {
    fn evaluate(&mut self, probe: Option<&Descriptor>) -> MatchResult {
        let Some(probe) = probe else {
            return MatchResult::unavailable();
        };
        let reading = self.stabilizer.push(similarity(probe, &self.owner.descriptor));
        MatchResult {
            similarity: reading.mean,
            stable: reading.stable,
            classification: classify(&reading, self.threshold, Some(&self.owner)),
        }
    }

    fn reset(&mut self) {
        self.stabilizer.reset();
    }
}

/// Best match across a roster; the first identity wins ties.
pub fn best_match<'a>(probe: &Descriptor, roster: &'a [Identity]) -> Option<(&'a Identity, f32)> {
    best_index(probe, roster).map(|(i, score)| (&roster[i], score))
}

fn best_index(probe: &Descriptor, roster: &[Identity]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, identity) in roster.iter().enumerate() {
        let score = similarity(probe, &identity.descriptor);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best
}

/// Many-identity search over a shared roster snapshot.
///
/// The window holds the best score of each cycle. It restarts only when the
/// leader moves to an identity whose descriptor does not itself clear the
/// threshold against the previous leader, so near-duplicate entries of one
/// person share a window while different people are never averaged. A
/// match is labelled with the identity that led most often in the window.
pub struct RosterMatcher {
    roster: Arc<Vec<Identity>>,
    threshold: f32,
    stabilizer: Stabilizer,
    window: usize,
    /// Roster index of the leader for each score in the window, oldest first.
    leaders: VecDeque<usize>,
    label: Option<usize>,
}

impl RosterMatcher {
    pub fn new(threshold: f32, config: StabilizerConfig) -> Self {
        let window = config.window.max(1);
        Self {
            roster: Arc::new(Vec::new()),
            threshold,
            stabilizer: Stabilizer::new(config),
            window,
            leaders: VecDeque::with_capacity(window),
            label: None,
        }
    }

    /// Swap in a new roster snapshot. Same-snapshot updates keep the window.
    pub fn set_roster(&mut self, roster: Arc<Vec<Identity>>) {
        if !Arc::ptr_eq(&self.roster, &roster) {
            self.roster = roster;
            self.reset();
        }
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Unsmoothed argmax over the current snapshot.
    pub fn best_match(&self, probe: &Descriptor) -> Option<(&Identity, f32)> {
        best_match(probe, &self.roster)
    }

    fn same_subject(&self, a: usize, b: usize) -> bool {
        a == b || similarity(&self.roster[a].descriptor, &self.roster[b].descriptor) >= self.threshold
    }

    /// Most frequent leader in the window. Ties keep the current label.
    fn relabel(&mut self) -> usize {
        let count = |idx: usize| self.leaders.iter().filter(|&&l| l == idx).count();
        let mut label = match self.label {
            Some(current) if self.leaders.contains(&current) => current,
            _ => self.leaders.back().copied().unwrap_or_default(),
        };
        let mut best = count(label);
        for &candidate in &self.leaders {
            let n = count(candidate);
            if n > best {
                label = candidate;
                best = n;
            }
        }
        self.label = Some(label);
        label
    }
}

impl IdentityMatcher for RosterMatcher {
    fn evaluate(&mut self, probe: Option<&Descriptor>) -> MatchResult {
        let Some(probe) = probe else {
            return MatchResult::unavailable();
        };
        let Some((leader, score)) = best_index(probe, &self.roster) else {
            return MatchResult {
                similarity: 0.0,
                stable: false,
                classification: Classification::NoMatch,
            };
        };

        if let Some(&previous) = self.leaders.back() {
            if !self.same_subject(previous, leader) {
                self.reset();
            }
        }
        if self.leaders.len() == self.window {
            self.leaders.pop_front();
        }
        self.leaders.push_back(leader);
        let reading = self.stabilizer.push(score);
        let label = self.relabel();

        MatchResult {
            similarity: reading.mean,
            stable: reading.stable,
            classification: classify(&reading, self.threshold, self.roster.get(label)),
        }
    }

    fn reset(&mut self) {
        self.stabilizer.reset();
        self.leaders.clear();
        self.label = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(v: &[f32]) -> Descriptor {
        Descriptor::from_raw(v.to_vec()).unwrap()
    }

    fn identity(id: &str, v: &[f32]) -> Identity {
        Identity { id: id.into(), name: format!("name-{id}"), descriptor: desc(v) }
    }

    #[test]
    fn test_similarity_self_and_symmetry() {
        let a = desc(&[0.3, -1.2, 4.0, 0.5]);
        let b = desc(&[1.0, 0.2, -0.4, 2.0]);
        assert!((similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn test_stabilizer_constant_is_stable() {
        let mut s = Stabilizer::new(StabilizerConfig::default());
        for i in 0..4 {
            assert!(!s.push(0.8).stable, "unstable before 5 samples (i={i})");
        }
        let r = s.push(0.8);
        assert!(r.stable);
        assert!((r.mean - 0.8).abs() < 1e-6);
        assert_eq!(r.samples, 5);
    }

    #[test]
    fn test_stabilizer_alternating_is_unstable() {
        let mut s = Stabilizer::new(StabilizerConfig::default());
        for i in 0..20 {
            let r = s.push(if i % 2 == 0 { 0.95 } else { 0.3 });
            assert!(!r.stable);
        }
    }

    #[test]
    fn test_stabilizer_window_evicts_oldest() {
        let mut s = Stabilizer::new(StabilizerConfig::default());
        for _ in 0..7 {
            s.push(0.1);
        }
        for _ in 0..7 {
            s.push(0.9);
        }
        let r = s.reading();
        assert_eq!(r.samples, 7);
        assert!((r.mean - 0.9).abs() < 1e-6);
        assert!(r.stable);
    }

    #[test]
    fn test_verifier_match_after_settling() {
        let owner = identity("owner", &[1.0, 0.0, 0.0]);
        let mut v = Verifier::new(owner, 0.9, StabilizerConfig::default());
        let probe = desc(&[1.0, 0.1, 0.0]);
        let mut last = None;
        for _ in 0..5 {
            last = Some(v.evaluate(Some(&probe)));
        }
        let result = last.unwrap();
        assert!(result.stable);
        assert!(result.is_match(), "{result:?}");
    }

    #[test]
    fn test_verifier_invalid_probe_rejected() {
        let owner = identity("owner", &[1.0, 0.0]);
        let mut v = Verifier::new(owner, 0.9, StabilizerConfig::default());
        let r = v.evaluate(None);
        assert_eq!(r.classification, Classification::Unavailable);
        assert!(!r.stable);
    }

    #[test]
    fn test_best_match_tie_prefers_first() {
        let roster = vec![identity("a", &[1.0, 0.0]), identity("b", &[1.0, 0.0])];
        let (best, score) = best_match(&desc(&[1.0, 0.0]), &roster).unwrap();
        assert_eq!(best.id, "a");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_roster_matcher_below_threshold_is_no_match() {
        let mut m = RosterMatcher::new(0.6, StabilizerConfig::default());
        m.set_roster(Arc::new(vec![identity("a", &[1.0, 0.0]), identity("b", &[0.0, 1.0])]));
        let probe = desc(&[1.0, 1.0]); // 0.707 to both, first wins
        let probe_far = desc(&[1.0, 2.0]); // argmax is b at ~0.894
        for _ in 0..5 {
            m.evaluate(Some(&probe));
        }
        let r = m.evaluate(Some(&probe));
        assert!(r.is_match());
        if let Classification::Match { id, .. } = &r.classification {
            assert_eq!(id, "a");
        }

        // Switching candidate restarts the window.
        let r = m.evaluate(Some(&probe_far));
        assert_eq!(r.classification, Classification::Pending);

        let mut strict = RosterMatcher::new(0.95, StabilizerConfig::default());
        strict.set_roster(Arc::new(vec![identity("a", &[1.0, 0.0])]));
        let mut last = None;
        for _ in 0..5 {
            last = Some(strict.evaluate(Some(&probe)));
        }
        assert_eq!(last.unwrap().classification, Classification::NoMatch);
    }

    #[test]
    fn test_roster_matcher_near_duplicates_share_window() {
        let mut m = RosterMatcher::new(0.6, StabilizerConfig::default());
        m.set_roster(Arc::new(vec![identity("a", &[1.0, 0.02, 0.0]), identity("b", &[1.0, -0.02, 0.0])]));
        let up = desc(&[1.0, 0.01, 0.0]);
        let down = desc(&[1.0, -0.01, 0.0]);

        let mut matches = 0;
        for i in 0..200 {
            let probe = if i % 2 == 0 { &up } else { &down };
            let r = m.evaluate(Some(probe));
            if i >= 4 {
                assert!(r.stable, "cycle {i}: {r:?}");
                match &r.classification {
                    Classification::Match { id, .. } => assert!(id == "a" || id == "b"),
                    other => panic!("cycle {i}: {other:?}"),
                }
                matches += 1;
            }
        }
        assert_eq!(matches, 196);
    }

    #[test]
    fn test_roster_matcher_label_is_most_frequent_leader() {
        let mut m = RosterMatcher::new(0.6, StabilizerConfig::default());
        m.set_roster(Arc::new(vec![identity("a", &[1.0, 0.02, 0.0]), identity("b", &[1.0, -0.02, 0.0])]));
        let toward_a = desc(&[1.0, 0.01, 0.0]);
        let toward_b = desc(&[1.0, -0.01, 0.0]);
        for _ in 0..4 {
            m.evaluate(Some(&toward_b));
        }
        // One stray cycle toward `a` does not change the label.
        let r = m.evaluate(Some(&toward_a));
        assert_eq!(r.classification, Classification::Match { id: "b".into(), name: "name-b".into() });
    }

    #[test]
    fn test_roster_matcher_empty_roster() {
        let mut m = RosterMatcher::new(0.6, StabilizerConfig::default());
        let r = m.evaluate(Some(&desc(&[1.0, 0.0])));
        assert_eq!(r.classification, Classification::NoMatch);
        assert_eq!(m.roster_len(), 0);
        assert!(m.best_match(&desc(&[1.0, 0.0])).is_none());

        m.set_roster(Arc::new(vec![identity("a", &[0.0, 1.0]), identity("b", &[1.0, 0.0])]));
        let (best, _) = m.best_match(&desc(&[1.0, 0.1])).unwrap();
        assert_eq!(best.id, "b");
    }
}
