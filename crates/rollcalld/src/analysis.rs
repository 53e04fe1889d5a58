//! Analysis stage: one cycle per newest frame.
//!
//! Locates faces, then either feeds the running enrollment session or
//! matches the best live face, and publishes the whole result for the
//! display stage. Network side effects go to the job queue.

use crate::config::{Config, MatchMode};
use crate::debounce::RequestFlag;
use crate::jobs::{JobQueue, NetworkJob};
use crate::slot::LatestSlot;
use crate::state::{AnalysisOutput, EnrollmentProgress, RosterHandle, RunFlag, Severity, SharedOutput};
use rollcall_core::matcher::{Classification, MatchResult};
use rollcall_core::{
    select_candidate, BoundingBox, EnrollmentConfig, EnrollmentEngine, FaceAnalyzer, Identity, IdentityMatcher,
    Observation, RosterMatcher, StabilizerConfig, Verifier,
};
use rollcall_hw::Frame;
use std::sync::Arc;

/// Tunables for the analysis stage.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub enrollment: EnrollmentConfig,
    pub stabilizer: StabilizerConfig,
    pub mode: MatchMode,
    pub owner_threshold: f32,
    pub roster_threshold: f32,
}

impl AnalysisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enrollment: config.enrollment.engine_config(),
            stabilizer: config.matcher.stabilizer(),
            mode: config.matcher.mode,
            owner_threshold: config.matcher.owner_threshold,
            roster_threshold: config.matcher.roster_threshold,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Handles the stage shares with the other threads.
#[derive(Clone)]
pub struct AnalysisLinks {
    pub output: SharedOutput,
    pub roster: RosterHandle,
    pub jobs: Arc<JobQueue>,
    pub enroll_request: RequestFlag,
}

pub struct AnalysisStage<A> {
    analyzer: A,
    settings: AnalysisSettings,
    links: AnalysisLinks,
    /// Present while an enrollment session runs.
    session: Option<EnrollmentEngine>,
    roster_matcher: RosterMatcher,
    owner: Option<Verifier>,
}

impl<A: FaceAnalyzer> AnalysisStage<A> {
    pub fn new(analyzer: A, settings: AnalysisSettings, links: AnalysisLinks) -> Self {
        let roster_matcher = RosterMatcher::new(settings.roster_threshold, settings.stabilizer.clone());
        if !analyzer.is_ready() {
            tracing::warn!("descriptor extractor not loaded; matching and enrollment will be rejected");
        }
        Self {
            analyzer,
            settings,
            links,
            session: None,
            roster_matcher,
            owner: None,
        }
    }

    pub fn is_enrolling(&self) -> bool {
        self.session.is_some()
    }

    /// Consume frames from `slot` until shutdown.
    pub fn run(&mut self, slot: &LatestSlot<Frame>, running: &RunFlag) {
        tracing::info!(mode = ?self.settings.mode, "analysis thread started");
        while running.is_running() {
            let Some(frame) = slot.take() else {
                break;
            };
            self.process(&frame);
        }
        tracing::info!("analysis thread exiting");
    }

    /// Run one cycle and publish its output.
    pub fn process(&mut self, frame: &Frame) -> AnalysisOutput {
        if self.links.enroll_request.take() {
            self.start_enrollment();
        }

        let image = frame.image();
        let regions = match self.analyzer.locate(image) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::debug!(seq = frame.sequence(), error = %e, "face locator failed; skipping frame");
                Vec::new()
            }
        };

        let output = if self.session.is_some() {
            self.enroll_cycle(frame, regions)
        } else {
            self.match_cycle(frame, regions)
        };
        tracing::trace!(
            seq = frame.sequence(),
            latency_ms = frame.timestamp().elapsed().as_millis() as u64,
            status = %output.status,
            "analysis cycle"
        );
        self.links.output.publish(output.clone());
        output
    }

    fn start_enrollment(&mut self) {
        tracing::info!(required = self.settings.enrollment.required_samples, "enrollment session started");
        self.session = Some(EnrollmentEngine::new(self.settings.enrollment.clone()));
        self.roster_matcher.reset();
        if let Some(owner) = self.owner.as_mut() {
            owner.reset();
        }
    }

    fn enroll_cycle(&mut self, frame: &Frame, regions: Vec<BoundingBox>) -> AnalysisOutput {
        let Some(engine) = self.session.as_mut() else {
            return AnalysisOutput::default();
        };
        let observation = engine.observe(frame.image(), &regions, &mut self.analyzer);
        let (collected, required) = engine.progress();
        let status = observation.status();

        let severity = match &observation {
            Observation::NoFace | Observation::NotAligned | Observation::Waiting => Severity::Info,
            Observation::LowQuality(_) | Observation::TooSimilar(_) => Severity::Warning,
            Observation::Accepted { .. } => Severity::Progress,
            Observation::Completed(_) | Observation::AlreadyComplete => Severity::Success,
            Observation::DescriptorUnavailable | Observation::Failed => Severity::Error,
        };

        let mut enrollment = Some(EnrollmentProgress { collected, required });
        match observation {
            Observation::Completed(descriptor) => {
                self.links.jobs.push(NetworkJob::RegisterUser {
                    descriptor: descriptor.clone(),
                });
                let owner = Identity {
                    id: "owner".into(),
                    name: "Owner".into(),
                    descriptor,
                };
                self.owner = Some(Verifier::new(
                    owner,
                    self.settings.owner_threshold,
                    self.settings.stabilizer.clone(),
                ));
                self.session = None;
                enrollment = None;
            }
            Observation::Failed => {
                self.session = None;
                enrollment = None;
            }
            _ => {}
        }

        AnalysisOutput {
            face_present: !regions.is_empty(),
            regions,
            status,
            severity,
            enrollment,
        }
    }

    fn match_cycle(&mut self, frame: &Frame, regions: Vec<BoundingBox>) -> AnalysisOutput {
        let idle = |regions: Vec<BoundingBox>, status: &str, severity| AnalysisOutput {
            face_present: !regions.is_empty(),
            regions,
            status: status.to_string(),
            severity,
            enrollment: None,
        };

        if regions.is_empty() {
            self.roster_matcher.reset();
            if let Some(owner) = self.owner.as_mut() {
                owner.reset();
            }
            return idle(regions, "Ready", Severity::Idle);
        }

        let Some(candidate) = select_candidate(frame.image(), &regions, None, self.settings.enrollment.ideal_face_size)
        else {
            return idle(regions, "Ready", Severity::Idle);
        };

        let result = if !candidate.quality.meets(self.settings.enrollment.quality_floor) {
            MatchResult::insufficient_quality()
        } else {
            let probe = self.analyzer.embed(&candidate.crop);
            match self.settings.mode {
                MatchMode::Roster => {
                    self.roster_matcher.set_roster(self.links.roster.snapshot());
                    self.roster_matcher.evaluate(probe.as_ref())
                }
                MatchMode::Owner => match self.owner.as_mut() {
                    Some(verifier) => verifier.evaluate(probe.as_ref()),
                    None => return idle(regions, "No owner enrolled", Severity::Info),
                },
            }
        };

        let (status, severity) = match &result.classification {
            Classification::Pending => ("Verifying...".to_string(), Severity::Progress),
            Classification::Match { id, name } => {
                if self.settings.mode == MatchMode::Roster {
                    self.links.jobs.push(NetworkJob::LogAttendance {
                        id: id.clone(),
                        name: name.clone(),
                    });
                }
                let who = if name.is_empty() { id } else { name };
                (format!("Welcome {who} ({:.2})", result.similarity), Severity::Success)
            }
            Classification::NoMatch => (format!("Unknown ({:.2})", result.similarity), Severity::Error),
            Classification::InsufficientQuality => ("Low quality, face the camera".to_string(), Severity::Warning),
            Classification::Unavailable => ("Recognizer unavailable".to_string(), Severity::Error),
        };

        AnalysisOutput {
            face_present: true,
            regions,
            status,
            severity,
            enrollment: None,
        }
    }
}
