//! Daemon configuration: a TOML file with every key defaulted, then
//! `ROLLCALL_*` environment overrides.

use rollcall_core::{AlignmentPolicy, EnrollmentConfig, StabilizerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub display: DisplayConfig,
    pub models: ModelsConfig,
    pub enrollment: EnrollmentSection,
    pub matcher: MatcherConfig,
    pub store: StoreConfig,
    pub input: InputConfig,
    pub dbus: DbusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames discarded at startup while exposure settles.
    pub warmup_frames: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 320,
            height: 240,
            fps: 60,
            warmup_frames: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Framebuffer device. Empty runs headless.
    pub framebuffer: String,
    pub width: u32,
    pub height: u32,
    pub channel_capacity: usize,
    pub font_path: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            framebuffer: "/dev/fb1".into(),
            width: 320,
            height: 240,
            channel_capacity: 2,
            font_path: "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub detector: String,
    pub embedder: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/usr/share/rollcall/models"),
            detector: "det_500m.onnx".into(),
            embedder: "mobilefacenet.onnx".into(),
        }
    }
}

impl ModelsConfig {
    pub fn detector_path(&self) -> String {
        self.dir.join(&self.detector).to_string_lossy().into_owned()
    }

    pub fn embedder_path(&self) -> String {
        self.dir.join(&self.embedder).to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentSection {
    pub required_samples: usize,
    pub frame_gap: u64,
    pub quality_floor: f32,
    pub diversity_threshold: f32,
    pub min_face_area: f32,
    pub border_margin: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub ideal_face_size: f32,
}

impl Default for EnrollmentSection {
    fn default() -> Self {
        let engine = EnrollmentConfig::default();
        Self {
            required_samples: engine.required_samples,
            frame_gap: engine.frame_gap,
            quality_floor: engine.quality_floor,
            diversity_threshold: engine.diversity_threshold,
            min_face_area: engine.alignment.min_area,
            border_margin: engine.alignment.border_margin,
            min_aspect: engine.alignment.min_aspect,
            max_aspect: engine.alignment.max_aspect,
            ideal_face_size: engine.ideal_face_size,
        }
    }
}

impl EnrollmentSection {
    pub fn engine_config(&self) -> EnrollmentConfig {
        EnrollmentConfig {
            required_samples: self.required_samples,
            frame_gap: self.frame_gap,
            quality_floor: self.quality_floor,
            diversity_threshold: self.diversity_threshold,
            alignment: AlignmentPolicy {
                min_aspect: self.min_aspect,
                max_aspect: self.max_aspect,
                min_area: self.min_face_area,
                border_margin: self.border_margin,
            },
            ideal_face_size: self.ideal_face_size,
        }
    }
}

/// Which operating point the live matcher runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Search the remote roster and log attendance.
    Roster,
    /// Verify against the locally enrolled owner only.
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub mode: MatchMode,
    pub window: usize,
    pub min_samples: usize,
    pub max_std_dev: f32,
    pub owner_threshold: f32,
    pub roster_threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        let stabilizer = StabilizerConfig::default();
        Self {
            mode: MatchMode::Roster,
            window: stabilizer.window,
            min_samples: stabilizer.min_samples,
            max_std_dev: stabilizer.max_std_dev,
            owner_threshold: 0.90,
            roster_threshold: 0.60,
        }
    }
}

impl MatcherConfig {
    pub fn stabilizer(&self) -> StabilizerConfig {
        StabilizerConfig {
            window: self.window,
            min_samples: self.min_samples,
            max_std_dev: self.max_std_dev,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// REST root, e.g. `https://kiosk-1234.firebaseio.com`. Empty disables sync.
    pub base_url: String,
    pub timeout_secs: u64,
    pub log_cooldown_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 10,
            log_cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// sysfs GPIO line number of the enroll button.
    pub gpio: u32,
    pub active_low: bool,
    pub poll_ms: u64,
    pub settle_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            gpio: 17,
            active_low: true,
            poll_ms: 20,
            settle_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbusConfig {
    pub bus: BusKind,
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` or the default path, apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            tracing::warn!(path, "config file not found; using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Some(device) = env_string("ROLLCALL_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(url) = env_string("ROLLCALL_STORE_URL") {
            self.store.base_url = url;
        }
        if let Some(dir) = env_string("ROLLCALL_MODEL_DIR") {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(fb) = env_string("ROLLCALL_FRAMEBUFFER") {
            self.display.framebuffer = fb;
        }
        match env_string("ROLLCALL_MATCH_MODE").as_deref() {
            Some("owner") => self.matcher.mode = MatchMode::Owner,
            Some("roster") => self.matcher.mode = MatchMode::Roster,
            Some(other) => tracing::warn!(value = other, "ignoring unknown ROLLCALL_MATCH_MODE"),
            None => {}
        }
        self.matcher.owner_threshold = env_f32("ROLLCALL_OWNER_THRESHOLD", self.matcher.owner_threshold);
        self.matcher.roster_threshold = env_f32("ROLLCALL_ROSTER_THRESHOLD", self.matcher.roster_threshold);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let e = &self.enrollment;
        let m = &self.matcher;

        if self.display.channel_capacity == 0 {
            return invalid("display.channel_capacity must be at least 1".into());
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera resolution must be non-zero".into());
        }
        if e.required_samples == 0 {
            return invalid("enrollment.required_samples must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&e.quality_floor) {
            return invalid(format!("enrollment.quality_floor {} outside [0, 1]", e.quality_floor));
        }
        if !(-1.0..=1.0).contains(&e.diversity_threshold) {
            return invalid(format!(
                "enrollment.diversity_threshold {} outside [-1, 1]",
                e.diversity_threshold
            ));
        }
        if e.min_aspect <= 0.0 || e.min_aspect > e.max_aspect {
            return invalid(format!("enrollment aspect range [{}, {}] is empty", e.min_aspect, e.max_aspect));
        }
        if e.ideal_face_size <= 0.0 {
            return invalid("enrollment.ideal_face_size must be positive".into());
        }
        for (name, t) in [("owner_threshold", m.owner_threshold), ("roster_threshold", m.roster_threshold)] {
            if !(-1.0..=1.0).contains(&t) {
                return invalid(format!("matcher.{name} {t} outside [-1, 1]"));
            }
        }
        if m.min_samples == 0 || m.window < m.min_samples {
            return invalid(format!(
                "matcher.window {} must be >= min_samples {} >= 1",
                m.window, m.min_samples
            ));
        }
        if m.max_std_dev <= 0.0 {
            return invalid("matcher.max_std_dev must be positive".into());
        }
        if self.input.poll_ms == 0 {
            return invalid("input.poll_ms must be at least 1".into());
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        let c = Config::parse("").unwrap();
        assert_eq!(c.camera.device, "/dev/video0");
        assert_eq!(c.display.channel_capacity, 2);
        assert_eq!(c.enrollment.required_samples, 10);
        assert_eq!(c.matcher.mode, MatchMode::Roster);
        assert_eq!(c.store.log_cooldown_secs, 30);
        assert_eq!(c.dbus.bus, BusKind::System);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_section() {
        let c = Config::parse(
            r#"
            [matcher]
            mode = "owner"
            owner_threshold = 0.85

            [store]
            base_url = "https://example.test"
            "#,
        )
        .unwrap();
        assert_eq!(c.matcher.mode, MatchMode::Owner);
        assert!((c.matcher.owner_threshold - 0.85).abs() < 1e-6);
        assert!((c.matcher.roster_threshold - 0.60).abs() < 1e-6);
        assert_eq!(c.matcher.window, 7);
        assert_eq!(c.store.timeout_secs, 10);
    }

    #[test]
    fn test_models_paths() {
        let c = Config::default();
        assert_eq!(c.models.detector_path(), "/usr/share/rollcall/models/det_500m.onnx");
        assert_eq!(c.models.embedder_path(), "/usr/share/rollcall/models/mobilefacenet.onnx");
    }

    #[test]
    fn test_engine_config_roundtrip() {
        let c = Config::default();
        let e = c.enrollment.engine_config();
        assert_eq!(e.required_samples, 10);
        assert_eq!(e.frame_gap, 15);
        assert!((e.alignment.min_area - 3600.0).abs() < 1e-6);
        assert_eq!(c.matcher.stabilizer().min_samples, 5);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut c = Config::default();
        c.matcher.roster_threshold = 1.5;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));

        let mut c = Config::default();
        c.display.channel_capacity = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.matcher.window = 3;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.enrollment.required_samples = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(Config::parse("[camera\nwidth = "), Err(ConfigError::Parse(_))));
        assert!(Config::parse("[matcher]\nmode = \"crowd\"").is_err());
    }
}
