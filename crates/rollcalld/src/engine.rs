//! Engine bring-up: opens the devices, then runs the five worker threads
//! (capture, analysis, display, input, dispatch) until shutdown.

use crate::analysis::{AnalysisLinks, AnalysisSettings, AnalysisStage};
use crate::capture::run_capture;
use crate::channel::BoundedChannel;
use crate::config::Config;
use crate::debounce::{InputDebouncer, RequestFlag};
use crate::display::{load_font, DisplayStage};
use crate::jobs::{spawn_dispatcher, JobQueue, NetworkJob};
use crate::slot::LatestSlot;
use crate::state::{RosterHandle, RunFlag, SharedOutput};
use crate::store::{RemoteStore, SharedStore};
use ab_glyph::FontArc;
use rollcall_core::{FaceAnalyzer, OnnxAnalyzer};
use rollcall_hw::{
    Camera, CameraError, CaptureSettings, DigitalInput, DisplaySink, Frame, FrameSource, FramebufferDisplay,
    NullDisplay, SysfsInput,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] rollcall_core::AnalyzerError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Timing and sizing for the worker threads.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub analysis: AnalysisSettings,
    pub channel_capacity: usize,
    pub input_poll: Duration,
    pub input_settle: Duration,
    pub log_cooldown: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analysis: AnalysisSettings::from_config(config),
            channel_capacity: config.display.channel_capacity,
            input_poll: Duration::from_millis(config.input.poll_ms),
            input_settle: Duration::from_millis(config.input.settle_ms),
            log_cooldown: Duration::from_secs(config.store.log_cooldown_secs),
        }
    }
}

/// Everything the engine drives. `open_source` runs on the capture thread.
pub struct EngineParts<F, A, S> {
    pub open_source: F,
    pub analyzer: A,
    pub sink: Box<dyn DisplaySink>,
    pub font: Option<FontArc>,
    pub input: Option<Box<dyn DigitalInput>>,
    pub store: S,
}

/// Running engine. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the threads running.
pub struct EngineHandle {
    running: RunFlag,
    frames: Arc<BoundedChannel<Frame>>,
    latest: Arc<LatestSlot<Frame>>,
    links: AnalysisLinks,
    analyzer_ready: bool,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl EngineHandle {
    /// Shared handles for control surfaces.
    pub fn links(&self) -> &AnalysisLinks {
        &self.links
    }

    pub fn analyzer_ready(&self) -> bool {
        self.analyzer_ready
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Clear the running flag, wake every blocked wait and join all threads.
    pub fn shutdown(self) {
        tracing::info!("stopping engine");
        self.running.stop();
        self.frames.close();
        self.latest.close();
        self.links.jobs.close();
        for (name, handle) in self.threads {
            if handle.join().is_err() {
                tracing::error!(thread = name, "worker thread panicked");
            }
        }
        tracing::info!("engine stopped");
    }
}

/// Open the configured devices and models, then start the engine.
/// Fails fast if the camera or face locator is unavailable.
pub fn spawn_engine(config: &Config, store: SharedStore) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(
        &config.camera.device,
        CaptureSettings {
            width: config.camera.width,
            height: config.camera.height,
            fps: config.camera.fps,
        },
    )?;
    tracing::info!(
        device = %config.camera.device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    let warmup = config.camera.warmup_frames;
    let open_source = move || camera.into_stream(warmup);

    let analyzer = OnnxAnalyzer::load(&config.models.detector_path(), &config.models.embedder_path())?;

    let sink: Box<dyn DisplaySink> = if config.display.framebuffer.is_empty() {
        tracing::info!("no framebuffer configured; running headless");
        Box::new(NullDisplay::default())
    } else {
        match FramebufferDisplay::open(&config.display.framebuffer, config.display.width, config.display.height) {
            Ok(fb) => Box::new(fb),
            Err(e) => {
                tracing::warn!(error = %e, "framebuffer unavailable; running headless");
                Box::new(NullDisplay::default())
            }
        }
    };
    let font = load_font(&config.display.font_path);

    let input: Option<Box<dyn DigitalInput>> = match SysfsInput::open(config.input.gpio, config.input.active_low) {
        Ok(input) => Some(Box::new(input)),
        Err(e) => {
            tracing::warn!(error = %e, "enroll button unavailable; enrollment only via D-Bus");
            None
        }
    };

    let settings = EngineSettings::from_config(config);
    start(EngineParts { open_source, analyzer, sink, font, input, store }, settings)
}

/// Start the worker threads over already-opened parts.
pub fn start<F, Src, A, S>(parts: EngineParts<F, A, S>, settings: EngineSettings) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<Src, CameraError> + Send + 'static,
    Src: FrameSource,
    A: FaceAnalyzer + Send + 'static,
    S: RemoteStore + 'static,
{
    let running = RunFlag::new();
    let frames = Arc::new(BoundedChannel::new(settings.channel_capacity));
    let latest = Arc::new(LatestSlot::new());
    let links = AnalysisLinks {
        output: SharedOutput::new(),
        roster: RosterHandle::new(),
        jobs: Arc::new(JobQueue::new()),
        enroll_request: RequestFlag::new(),
    };
    let analyzer_ready = parts.analyzer.is_ready();
    let mut threads = Vec::with_capacity(5);

    threads.push((
        "dispatch",
        spawn_dispatcher(Arc::clone(&links.jobs), parts.store, links.roster.clone(), settings.log_cooldown)?,
    ));
    links.jobs.push(NetworkJob::LoadRoster);

    {
        let mut stage = AnalysisStage::new(parts.analyzer, settings.analysis.clone(), links.clone());
        let latest = Arc::clone(&latest);
        let running = running.clone();
        threads.push((
            "analysis",
            std::thread::Builder::new()
                .name("rollcall-analysis".into())
                .spawn(move || stage.run(&latest, &running))?,
        ));
    }

    {
        let mut stage = DisplayStage::new(parts.sink, parts.font, links.output.clone());
        let frames = Arc::clone(&frames);
        let running = running.clone();
        threads.push((
            "display",
            std::thread::Builder::new()
                .name("rollcall-display".into())
                .spawn(move || stage.run(&frames, &running))?,
        ));
    }

    if let Some(input) = parts.input {
        let mut debouncer = InputDebouncer::new(input, links.enroll_request.clone(), settings.input_settle);
        let running = running.clone();
        let period = settings.input_poll;
        threads.push((
            "input",
            std::thread::Builder::new()
                .name("rollcall-input".into())
                .spawn(move || debouncer.run(&running, period))?,
        ));
    }

    {
        let open_source = parts.open_source;
        let frames = Arc::clone(&frames);
        let latest = Arc::clone(&latest);
        let running = running.clone();
        threads.push((
            "capture",
            std::thread::Builder::new()
                .name("rollcall-capture".into())
                .spawn(move || match open_source() {
                    Ok(mut source) => run_capture(&mut source, &frames, &latest, &running),
                    Err(e) => tracing::error!(error = %e, "camera stream failed to start; no frames will arrive"),
                })?,
        ));
    }

    tracing::info!(threads = threads.len(), "engine started");
    Ok(EngineHandle {
        running,
        frames,
        latest,
        links,
        analyzer_ready,
        threads,
    })
}
