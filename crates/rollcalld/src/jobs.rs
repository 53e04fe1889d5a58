//! Network job queue and its single dispatcher thread.
//!
//! The analysis thread enqueues and never waits; the dispatcher drains the
//! queue in FIFO order and performs each remote call serially. Failed jobs
//! are logged and dropped.

use crate::state::RosterHandle;
use crate::store::{AttendanceRecord, RemoteStore};
use parking_lot::{Condvar, Mutex};
use rollcall_core::Descriptor;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkJob {
    LoadRoster,
    LogAttendance { id: String, name: String },
    RegisterUser { descriptor: Descriptor },
}

impl NetworkJob {
    fn kind(&self) -> &'static str {
        match self {
            NetworkJob::LoadRoster => "load_roster",
            NetworkJob::LogAttendance { .. } => "log_attendance",
            NetworkJob::RegisterUser { .. } => "register_user",
        }
    }
}

struct QueueInner {
    jobs: VecDeque<NetworkJob>,
    closed: bool,
}

/// Unbounded blocking FIFO of network jobs.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue without blocking. Jobs pushed after `close` are dropped.
    pub fn push(&self, job: NetworkJob) {
        let mut inner = self.inner.lock();
        if inner.closed {
            tracing::debug!(job = job.kind(), "job queue closed; dropping job");
            return;
        }
        inner.jobs.push_back(job);
        drop(inner);
        self.available.notify_one();
    }

    /// Next job, blocking while the queue is empty. `None` once closed;
    /// jobs still queued at shutdown are abandoned.
    pub fn pop(&self) -> Option<NetworkJob> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(job) = inner.jobs.pop_front() {
                return Some(job);
            }
            self.available.wait(&mut inner);
        }
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Last accepted attendance time per identity id.
pub struct DebounceCache {
    cooldown: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl DebounceCache {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record in one critical section. `true` means the caller
    /// may log `id` now.
    pub fn try_acquire(&self, id: &str, now: Instant) -> bool {
        let mut last = self.last.lock();
        if let Some(prev) = last.get(id) {
            if now.saturating_duration_since(*prev) < self.cooldown {
                return false;
            }
        }
        last.insert(id.to_string(), now);
        true
    }
}

pub struct Dispatcher<S> {
    queue: Arc<JobQueue>,
    store: S,
    roster: RosterHandle,
    debounce: DebounceCache,
}

impl<S: RemoteStore> Dispatcher<S> {
    pub fn new(queue: Arc<JobQueue>, store: S, roster: RosterHandle, cooldown: Duration) -> Self {
        Self {
            queue,
            store,
            roster,
            debounce: DebounceCache::new(cooldown),
        }
    }

    /// Drain the queue until it is closed.
    pub fn run(&mut self) {
        tracing::info!("dispatcher started");
        while let Some(job) = self.queue.pop() {
            self.execute(job);
        }
        tracing::info!("dispatcher exiting");
    }

    fn execute(&mut self, job: NetworkJob) {
        match job {
            NetworkJob::LoadRoster => self.load_roster(),
            NetworkJob::LogAttendance { id, name } => {
                if !self.debounce.try_acquire(&id, Instant::now()) {
                    tracing::debug!(id, "attendance within cooldown; skipped");
                    return;
                }
                let record = AttendanceRecord::now(&id, &name);
                match self.store.log_attendance(&record) {
                    Ok(()) => tracing::info!(id, name, time = %record.time, "attendance logged"),
                    Err(e) => tracing::warn!(id, error = %e, "attendance log failed"),
                }
            }
            NetworkJob::RegisterUser { descriptor } => match self.store.register_user(&descriptor) {
                Ok(id) => {
                    tracing::info!(id, "user registered");
                    self.load_roster();
                }
                Err(e) => tracing::warn!(error = %e, "user registration failed"),
            },
        }
    }

    fn load_roster(&mut self) {
        match self.store.fetch_roster() {
            Ok(Some(identities)) => {
                tracing::info!(count = identities.len(), "roster loaded");
                self.roster.replace(identities);
            }
            Ok(None) => tracing::warn!("store has no users; keeping previous roster"),
            Err(e) => tracing::warn!(error = %e, "roster load failed; keeping previous roster"),
        }
    }
}

/// Run a [`Dispatcher`] on its own named thread.
pub fn spawn_dispatcher<S: RemoteStore + 'static>(
    queue: Arc<JobQueue>,
    store: S,
    roster: RosterHandle,
    cooldown: Duration,
) -> std::io::Result<JoinHandle<()>> {
    let mut dispatcher = Dispatcher::new(queue, store, roster, cooldown);
    std::thread::Builder::new()
        .name("rollcall-dispatch".into())
        .spawn(move || dispatcher.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::NaiveDate;
    use rollcall_core::Identity;
    use std::thread;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        roster: Arc<Mutex<Vec<Identity>>>,
        fail_register: bool,
        users_missing: bool,
    }

    impl RemoteStore for Recorder {
        fn fetch_roster(&self) -> Result<Option<Vec<Identity>>, StoreError> {
            self.calls.lock().push("fetch".into());
            if self.users_missing {
                return Ok(None);
            }
            Ok(Some(self.roster.lock().clone()))
        }

        fn register_user(&self, descriptor: &Descriptor) -> Result<String, StoreError> {
            self.calls.lock().push("register".into());
            if self.fail_register {
                return Err(StoreError::Status {
                    endpoint: "users.json".into(),
                    status: 500,
                    body: String::new(),
                });
            }
            let id = format!("id_{}", self.roster.lock().len());
            self.roster.lock().push(Identity {
                id: id.clone(),
                name: String::new(),
                descriptor: descriptor.clone(),
            });
            Ok(id)
        }

        fn log_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            self.calls.lock().push(format!("log:{}", record.id));
            Ok(())
        }

        fn attendance_on(&self, _: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn run_jobs(store: Recorder, jobs: Vec<NetworkJob>, cooldown: Duration) -> RosterHandle {
        let queue = Arc::new(JobQueue::new());
        let roster = RosterHandle::new();
        let mut dispatcher = Dispatcher::new(Arc::clone(&queue), store, roster.clone(), cooldown);
        for job in jobs {
            dispatcher.execute(job);
        }
        roster
    }

    #[test]
    fn test_queue_fifo() {
        let q = JobQueue::new();
        q.push(NetworkJob::LoadRoster);
        q.push(NetworkJob::LogAttendance { id: "a".into(), name: "A".into() });
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(NetworkJob::LoadRoster));
        assert!(matches!(q.pop(), Some(NetworkJob::LogAttendance { .. })));
    }

    #[test]
    fn test_close_wakes_pop() {
        let q = Arc::new(JobQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(30));
        q.close();
        assert_eq!(waiter.join().unwrap(), None);
        q.push(NetworkJob::LoadRoster);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_debounce_window() {
        let cache = DebounceCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(cache.try_acquire("a", t0));
        assert!(!cache.try_acquire("a", t0 + Duration::from_secs(10)));
        assert!(cache.try_acquire("b", t0 + Duration::from_secs(10)));
        assert!(cache.try_acquire("a", t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_debounce_is_atomic_across_threads() {
        let cache = Arc::new(DebounceCache::new(Duration::from_secs(30)));
        let now = Instant::now();
        let winners: usize = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.try_acquire("same", now))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_duplicate_logs_dispatch_once() {
        let store = Recorder::default();
        let calls = Arc::clone(&store.calls);
        run_jobs(
            store,
            vec![
                NetworkJob::LogAttendance { id: "id_1".into(), name: "A".into() },
                NetworkJob::LogAttendance { id: "id_1".into(), name: "A".into() },
                NetworkJob::LogAttendance { id: "id_2".into(), name: "B".into() },
            ],
            Duration::from_secs(30),
        );
        assert_eq!(*calls.lock(), vec!["log:id_1".to_string(), "log:id_2".to_string()]);
    }

    #[test]
    fn test_logs_beyond_window_both_dispatch() {
        let store = Recorder::default();
        let calls = Arc::clone(&store.calls);
        run_jobs(
            store,
            vec![
                NetworkJob::LogAttendance { id: "id_1".into(), name: "A".into() },
                NetworkJob::LogAttendance { id: "id_1".into(), name: "A".into() },
            ],
            Duration::ZERO,
        );
        assert_eq!(calls.lock().len(), 2);
    }

    #[test]
    fn test_register_triggers_roster_refresh() {
        let store = Recorder::default();
        let calls = Arc::clone(&store.calls);
        let descriptor = Descriptor::from_raw(vec![1.0, 0.0]).unwrap();
        let roster = run_jobs(store, vec![NetworkJob::RegisterUser { descriptor }], Duration::ZERO);
        assert_eq!(*calls.lock(), vec!["register".to_string(), "fetch".to_string()]);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_missing_users_keeps_previous_roster() {
        let store = Recorder { users_missing: true, ..Default::default() };
        let roster = RosterHandle::new();
        roster.replace(vec![Identity {
            id: "id_0".into(),
            name: "Ada".into(),
            descriptor: Descriptor::from_raw(vec![1.0, 0.0]).unwrap(),
        }]);
        let mut dispatcher = Dispatcher::new(Arc::new(JobQueue::new()), store, roster.clone(), Duration::ZERO);
        dispatcher.execute(NetworkJob::LoadRoster);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.snapshot()[0].id, "id_0");
    }

    #[test]
    fn test_failed_register_does_not_refresh() {
        let store = Recorder { fail_register: true, ..Default::default() };
        let calls = Arc::clone(&store.calls);
        let descriptor = Descriptor::from_raw(vec![1.0, 0.0]).unwrap();
        run_jobs(store, vec![NetworkJob::RegisterUser { descriptor }], Duration::ZERO);
        assert_eq!(*calls.lock(), vec!["register".to_string()]);
    }

    #[test]
    fn test_spawned_dispatcher_drains_then_exits() {
        let store = Recorder::default();
        let calls = Arc::clone(&store.calls);
        let queue = Arc::new(JobQueue::new());
        let handle = spawn_dispatcher(Arc::clone(&queue), store, RosterHandle::new(), Duration::ZERO).unwrap();
        queue.push(NetworkJob::LoadRoster);
        queue.push(NetworkJob::LogAttendance { id: "x".into(), name: "X".into() });
        for _ in 0..100 {
            if calls.lock().len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        queue.close();
        handle.join().unwrap();
        assert_eq!(*calls.lock(), vec!["fetch".to_string(), "log:x".to_string()]);
    }
}
