//! Remote identity store over HTTP/JSON.
//!
//! Layout (Firebase realtime database style):
//! - `GET   {base}/users.json`      → `{ id: { name, embedding: [f32] } }` or `null`
//! - `PATCH {base}/users.json`      ← `{ id: { name: "", embedding } }`
//! - `PATCH {base}/attendance.json` ← `{ id: { name, date, time } }`
//! - `GET   {base}/attendance.json?orderBy="date"&equalTo="YYYY-MM-DD"`

use crate::config::StoreConfig;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rollcall_core::{Descriptor, Identity};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One attendance event, stamped in local time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
}

impl AttendanceRecord {
    pub fn at<Tz: TimeZone>(id: &str, name: &str, when: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            date: when.format("%Y-%m-%d").to_string(),
            time: when.format("%H:%M:%S").to_string(),
        }
    }

    pub fn now(id: &str, name: &str) -> Self {
        Self::at(id, name, &Local::now())
    }
}

/// New identity ids are the registration time: `id_YYYY_MM_DD_HH_MM_SS`.
pub fn generate_user_id<Tz: TimeZone>(when: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    when.format("id_%Y_%m_%d_%H_%M_%S").to_string()
}

/// Store operations. Implementations block; callers keep them off the
/// real-time threads.
pub trait RemoteStore: Send {
    /// `None` when the store has no users node at all; callers keep
    /// whatever roster they already have.
    fn fetch_roster(&self) -> Result<Option<Vec<Identity>>, StoreError>;

    /// Upload a new identity with an empty display name. Returns its id.
    fn register_user(&self, descriptor: &Descriptor) -> Result<String, StoreError>;

    fn log_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Attendance records for one day, ordered by time.
    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Store shared between the dispatcher and the control surface.
pub type SharedStore = Arc<dyn RemoteStore + Sync>;

impl<T: RemoteStore + Sync + ?Sized> RemoteStore for Arc<T> {
    fn fetch_roster(&self) -> Result<Option<Vec<Identity>>, StoreError> {
        (**self).fetch_roster()
    }

    fn register_user(&self, descriptor: &Descriptor) -> Result<String, StoreError> {
        (**self).register_user(descriptor)
    }

    fn log_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        (**self).log_attendance(record)
    }

    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        (**self).attendance_on(date)
    }
}

/// The configured store: HTTP when a base URL is set, offline otherwise.
pub fn open(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    if config.base_url.is_empty() {
        tracing::warn!("no store URL configured; running offline");
        return Ok(Arc::new(OfflineStore));
    }
    let store = HttpStore::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;
    tracing::info!(url = %config.base_url, "remote store configured");
    Ok(Arc::new(store))
}

#[derive(Deserialize)]
struct RemoteUser {
    #[serde(default = "unknown_name")]
    name: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

/// Decode a `users.json` body. A `null` or empty body is `None`. Entries
/// without a usable embedding are skipped; ids come back in sorted order.
pub fn parse_roster(body: &str) -> Result<Option<Vec<Identity>>, StoreError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(users) = serde_json::from_str::<Option<BTreeMap<String, RemoteUser>>>(trimmed)? else {
        return Ok(None);
    };

    let mut identities = Vec::new();
    for (id, user) in users {
        let Some(raw) = user.embedding else {
            tracing::debug!(id, "skipping user without embedding");
            continue;
        };
        match Descriptor::from_raw(raw) {
            Some(descriptor) => identities.push(Identity {
                id,
                name: user.name,
                descriptor,
            }),
            None => tracing::warn!(id, "skipping user with invalid embedding"),
        }
    }
    Ok(Some(identities))
}

#[derive(Deserialize)]
struct RemoteAttendance {
    #[serde(default = "unknown_name")]
    name: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    time: String,
}

/// Decode an `attendance.json` query result, keeping only records of
/// `date`. A `null` or empty body means nobody attended.
pub fn parse_attendance(body: &str, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Option<BTreeMap<String, RemoteAttendance>> = serde_json::from_str(trimmed)?;
    let wanted = date.format("%Y-%m-%d").to_string();

    let mut records: Vec<AttendanceRecord> = entries
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, entry)| entry.date == wanted)
        .map(|(id, entry)| AttendanceRecord {
            id,
            name: entry.name,
            date: entry.date,
            time: entry.time,
        })
        .collect();
    records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    Ok(records)
}

/// Blocking `reqwest` client against the REST layout above.
pub struct HttpStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    fn patch(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        let response = self.client.patch(self.url(endpoint)).json(body).send()?;
        check_status(endpoint, response).map(|_| ())
    }
}

fn check_status(
    endpoint: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(StoreError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

impl RemoteStore for HttpStore {
    fn fetch_roster(&self) -> Result<Option<Vec<Identity>>, StoreError> {
        let response = self.client.get(self.url("users.json")).send()?;
        let body = check_status("users.json", response)?.text()?;
        parse_roster(&body)
    }

    fn register_user(&self, descriptor: &Descriptor) -> Result<String, StoreError> {
        let id = generate_user_id(&Local::now());
        let body = json!({ id.as_str(): { "name": "", "embedding": descriptor.values() } });
        self.patch("users.json", &body)?;
        Ok(id)
    }

    fn log_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let body = json!({
            record.id.as_str(): { "name": record.name, "date": record.date, "time": record.time }
        });
        self.patch("attendance.json", &body)
    }

    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let equal_to = format!("\"{}\"", date.format("%Y-%m-%d"));
        let response = self
            .client
            .get(self.url("attendance.json"))
            .query(&[("orderBy", "\"date\""), ("equalTo", equal_to.as_str())])
            .send()?;
        let body = check_status("attendance.json", response)?.text()?;
        parse_attendance(&body, date)
    }
}

/// Stand-in used when no store URL is configured: nothing leaves the
/// device and the roster stays empty.
pub struct OfflineStore;

impl RemoteStore for OfflineStore {
    fn fetch_roster(&self) -> Result<Option<Vec<Identity>>, StoreError> {
        Ok(Some(Vec::new()))
    }

    fn register_user(&self, _descriptor: &Descriptor) -> Result<String, StoreError> {
        let id = generate_user_id(&Local::now());
        tracing::info!(id, "offline: enrollment kept locally only");
        Ok(id)
    }

    fn log_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        tracing::info!(id = %record.id, name = %record.name, date = %record.date, time = %record.time, "offline attendance");
        Ok(())
    }

    fn attendance_on(&self, _date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(Vec::new())
    }
}
