use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::{Camera, CaptureSettings, FrameSource};
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Start an enrollment session on the kiosk
    Enroll,
    /// Refetch the roster from the remote store
    Reload,
    /// List attendance for one day
    Attendance {
        /// Day to report, YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Run camera diagnostics
    Test {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to capture for the throughput check
        #[arg(short, long, default_value_t = 30)]
        frames: usize,
    },
}

#[zbus::proxy(
    interface = "org.rollcall.Kiosk1",
    default_service = "org.rollcall.Kiosk1",
    default_path = "/org/rollcall/Kiosk1"
)]
trait Kiosk {
    async fn status(&self) -> zbus::Result<String>;
    async fn request_enroll(&self) -> zbus::Result<bool>;
    async fn reload_roster(&self) -> zbus::Result<()>;
    async fn attendance(&self, date: &str) -> zbus::Result<String>;
}

#[derive(Deserialize)]
struct AttendanceRow {
    id: String,
    name: String,
    time: String,
}

async fn connect(session: bool) -> Result<zbus::Connection> {
    tracing::debug!(session, "connecting to rollcalld");
    let builder = if session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    builder
        .method_timeout(Duration::from_secs(3))
        .build()
        .await
        .context("failed to connect to D-Bus")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let conn = connect(cli.session).await?;
            let proxy = KioskProxy::new(&conn).await?;
            let raw = proxy.status().await.context("is rollcalld running?")?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Enroll => {
            let conn = connect(cli.session).await?;
            let proxy = KioskProxy::new(&conn).await?;
            if proxy.request_enroll().await? {
                println!("Enrollment requested. Face the camera until the progress bar fills.");
            } else {
                println!("An enrollment request is already pending");
            }
        }
        Commands::Reload => {
            let conn = connect(cli.session).await?;
            let proxy = KioskProxy::new(&conn).await?;
            proxy.reload_roster().await?;
            println!("Roster reload queued");
        }
        Commands::Attendance { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            let conn = connect(cli.session).await?;
            let proxy = KioskProxy::new(&conn).await?;
            let raw = proxy.attendance(&date).await.context("is rollcalld running?")?;
            let rows: Vec<AttendanceRow> = serde_json::from_str(&raw)?;
            if rows.is_empty() {
                println!("No attendance on {date}");
            } else {
                println!("Attendance on {date}:");
                for row in &rows {
                    println!("  {}  {:<24} {}", row.time, row.name, row.id);
                }
                println!("{} present", rows.len());
            }
        }
        Commands::Test { device, frames } => {
            camera_test(&device, frames)?;
        }
    }

    Ok(())
}

fn camera_test(device: &str, frames: usize) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
    }
    for info in &devices {
        println!("{}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }
    println!();

    let camera = Camera::open(device, CaptureSettings::default())
        .with_context(|| format!("failed to open {device}"))?;
    println!("Opened {device} as {:?}", camera.pixel_format());

    let frame = camera.capture_frame()?;
    println!(
        "Single frame: {}x{}, avg brightness {:.1}",
        frame.width(),
        frame.height(),
        frame.avg_brightness()
    );

    if frames == 0 {
        return Ok(());
    }

    let mut stream = camera.into_stream(4)?;
    let start = Instant::now();
    let mut brightness = 0.0;
    let mut last_sequence = 0;
    for _ in 0..frames {
        let frame = stream.next_frame()?;
        brightness += frame.avg_brightness();
        last_sequence = frame.sequence();
    }
    let elapsed = start.elapsed().as_secs_f32();

    println!(
        "Captured {frames} frames in {elapsed:.2}s ({:.1} fps), mean brightness {:.1}, last sequence {last_sequence}",
        frames as f32 / elapsed.max(f32::EPSILON),
        brightness / frames as f32
    );
    Ok(())
}
