//! State shared between the worker threads.

use parking_lot::{Mutex, RwLock};
use rollcall_core::{BoundingBox, Identity};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide running flag, checked at every loop head.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Display color class of the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Idle,
    Info,
    Progress,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrollmentProgress {
    pub collected: usize,
    pub required: usize,
}

/// Externally visible result of one analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub regions: Vec<BoundingBox>,
    pub status: String,
    pub severity: Severity,
    pub face_present: bool,
    /// Set while an enrollment session is running.
    pub enrollment: Option<EnrollmentProgress>,
}

impl Default for AnalysisOutput {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            status: "Starting".into(),
            severity: Severity::Idle,
            face_present: false,
            enrollment: None,
        }
    }
}

/// The analysis output behind one lock. Readers and writers always move
/// the whole structure.
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<AnalysisOutput>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, output: AnalysisOutput) {
        *self.0.lock() = output;
    }

    pub fn snapshot(&self) -> AnalysisOutput {
        self.0.lock().clone()
    }
}

/// Current roster, replaced wholesale on every successful fetch.
#[derive(Clone, Default)]
pub struct RosterHandle(Arc<RwLock<Arc<Vec<Identity>>>>);

impl RosterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, identities: Vec<Identity>) {
        *self.0.write() = Arc::new(identities);
    }

    /// Cheap snapshot; the lock is held only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<Vec<Identity>> {
        Arc::clone(&self.0.read())
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Descriptor;
    use std::thread;

    #[test]
    fn test_run_flag_shared() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(other.is_running());
        flag.stop();
        assert!(!other.is_running());
    }

    #[test]
    fn test_shared_output_whole_replacement() {
        let shared = SharedOutput::new();
        let writer = shared.clone();
        let handle = thread::spawn(move || {
            for i in 0..500 {
                writer.publish(AnalysisOutput {
                    regions: Vec::new(),
                    status: format!("cycle {i}"),
                    severity: if i % 2 == 0 { Severity::Info } else { Severity::Warning },
                    face_present: i % 2 == 0,
                    enrollment: None,
                });
            }
        });
        for _ in 0..500 {
            let snap = shared.snapshot();
            // Fields written together are always observed together.
            if snap.severity != Severity::Idle {
                assert_eq!(snap.face_present, snap.severity == Severity::Info);
            }
        }
        handle.join().unwrap();
        assert_eq!(shared.snapshot().status, "cycle 499");
    }

    #[test]
    fn test_roster_snapshot_is_stable() {
        let roster = RosterHandle::new();
        let before = roster.snapshot();
        roster.replace(vec![Identity {
            id: "id_1".into(),
            name: "A".into(),
            descriptor: Descriptor::from_raw(vec![1.0, 0.0]).unwrap(),
        }]);
        assert!(before.is_empty());
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.snapshot()[0].id, "id_1");
    }
}
