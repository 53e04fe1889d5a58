use crate::analysis::AnalysisLinks;
use crate::config::{BusKind, MatchMode};
use crate::jobs::NetworkJob;
use crate::store::{AttendanceRecord, SharedStore, StoreError};
use chrono::NaiveDate;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Kiosk1";
pub const OBJECT_PATH: &str = "/org/rollcall/Kiosk1";

/// D-Bus control surface for the kiosk daemon.
///
/// Bus name: org.rollcall.Kiosk1
/// Object path: /org/rollcall/Kiosk1
pub struct KioskService {
    links: AnalysisLinks,
    analyzer_ready: bool,
    mode: MatchMode,
    store: SharedStore,
}

impl KioskService {
    pub fn new(links: AnalysisLinks, analyzer_ready: bool, mode: MatchMode, store: SharedStore) -> Self {
        Self {
            links,
            analyzer_ready,
            mode,
            store,
        }
    }

    /// Run the blocking store query on its own thread so the bus executor
    /// stays responsive.
    async fn query_attendance(&self, date: NaiveDate) -> fdo::Result<Vec<AttendanceRecord>> {
        let store = self.store.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<Result<Vec<AttendanceRecord>, StoreError>>();
        std::thread::Builder::new()
            .name("rollcall-report".into())
            .spawn(move || {
                let _ = tx.send(store.attendance_on(date));
            })
            .map_err(|e| fdo::Error::Failed(format!("failed to spawn report thread: {e}")))?;
        rx.await
            .map_err(|_| fdo::Error::Failed("report thread exited".into()))?
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": self.mode,
            "analyzer_ready": self.analyzer_ready,
            "roster_size": self.links.roster.len(),
            "pending_jobs": self.links.jobs.len(),
            "enroll_pending": self.links.enroll_request.is_pending(),
            "output": self.links.output.snapshot(),
        })
    }
}

#[interface(name = "org.rollcall.Kiosk1")]
impl KioskService {
    /// Current analysis output, enrollment progress and roster size as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }

    /// Start an enrollment session on the next analysis cycle. Returns
    /// false if a request is already pending.
    async fn request_enroll(&self) -> zbus::fdo::Result<bool> {
        let raised = self.links.enroll_request.raise();
        tracing::info!(raised, "enroll requested over D-Bus");
        Ok(raised)
    }

    /// Refetch the roster from the remote store.
    async fn reload_roster(&self) -> zbus::fdo::Result<()> {
        tracing::info!("roster reload requested over D-Bus");
        self.links.jobs.push(NetworkJob::LoadRoster);
        Ok(())
    }

    /// Attendance records for `date` (`YYYY-MM-DD`) as a JSON array.
    async fn attendance(&self, date: String) -> zbus::fdo::Result<String> {
        let day = parse_day(&date)?;
        let records = self.query_attendance(day).await?;
        tracing::info!(%day, count = records.len(), "attendance report served");
        serde_json::to_string(&records).map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}

fn parse_day(date: &str) -> fdo::Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| fdo::Error::InvalidArgs(format!("bad date {date:?}: {e}")))
}

/// Claim the bus name and export the service.
pub async fn serve(service: KioskService, bus: BusKind) -> zbus::Result<zbus::Connection> {
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    builder.name(BUS_NAME)?.serve_at(OBJECT_PATH, service)?.build().await
}
