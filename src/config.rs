use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AttendanceConfig {
    pub camera: CameraConfig,
    pub acquisition: AcquisitionConfig,
    pub scanner: ScannerConfig,
    pub ledger: LedgerConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Frame source: "gstreamer" (V4L2 camera) or "images" (image directory)
    #[serde(default = "default_camera_source")]
    pub source: String,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Directory of still images used by the "images" source
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    /// Maximum wait for a single frame before the read counts as failed
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AcquisitionConfig {
    /// Delay between reads on the acquisition thread
    #[serde(default = "default_yield_delay_ms")]
    pub yield_delay_ms: u64,

    /// Consecutive read failures tolerated before the stream is declared dead
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// How long stop() waits for the acquisition thread to exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Consumer poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Same-identity re-trigger suppression window
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Publish detected symbol polygons for overlay rendering
    #[serde(default = "default_publish_overlays")]
    pub publish_overlays: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    /// Explicit ledger workbook; when unset the first workbook in active_dir is used
    #[serde(default)]
    pub path: Option<String>,

    /// Folder scanned for ledger workbooks
    #[serde(default = "default_active_dir")]
    pub active_dir: String,

    /// Row holding day-of-month numbers (1-indexed)
    #[serde(default = "default_day_header_row")]
    pub day_header_row: u32,

    /// Row holding the day label under each day number
    #[serde(default = "default_day_label_row")]
    pub day_label_row: u32,

    /// First roster row
    #[serde(default = "default_first_data_row")]
    pub first_data_row: u32,

    /// Column holding the learner's external identifier
    #[serde(default = "default_external_id_column")]
    pub external_id_column: u32,

    /// Column holding the identity string
    #[serde(default = "default_identity_column")]
    pub identity_column: u32,

    /// Cell content that marks presence
    #[serde(default = "default_present_glyph")]
    pub present_glyph: String,

    /// IANA timezone used to decide which day is "today"; local time when unset
    #[serde(default)]
    pub timezone: Option<String>,

    /// Header and boilerplate fragments that can never be an identity
    #[serde(default = "default_excluded_keywords")]
    pub excluded_keywords: Vec<String>,

    /// Attempt a container repair when the workbook fails to open
    #[serde(default = "default_repair")]
    pub repair: bool,

    /// Copy the workbook to <path>.backup before repairing it
    #[serde(default = "default_backup_before_repair")]
    pub backup_before_repair: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

pub const CAMERA_SOURCES: [&str; 2] = ["gstreamer", "images"];

impl AttendanceConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("attendcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.source", default_camera_source())?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.image_dir", default_image_dir())?
            .set_default("camera.read_timeout_ms", default_read_timeout_ms())?
            .set_default("acquisition.yield_delay_ms", default_yield_delay_ms())?
            .set_default(
                "acquisition.max_consecutive_failures",
                default_max_consecutive_failures(),
            )?
            .set_default("acquisition.stop_timeout_ms", default_stop_timeout_ms())?
            .set_default("scanner.poll_interval_ms", default_poll_interval_ms())?
            .set_default("scanner.cooldown_ms", default_cooldown_ms())?
            .set_default("scanner.publish_overlays", default_publish_overlays())?
            .set_default("ledger.active_dir", default_active_dir())?
            .set_default("ledger.day_header_row", default_day_header_row())?
            .set_default("ledger.day_label_row", default_day_label_row())?
            .set_default("ledger.first_data_row", default_first_data_row())?
            .set_default("ledger.external_id_column", default_external_id_column())?
            .set_default("ledger.identity_column", default_identity_column())?
            .set_default("ledger.present_glyph", default_present_glyph())?
            .set_default("ledger.excluded_keywords", default_excluded_keywords())?
            .set_default("ledger.repair", default_repair())?
            .set_default(
                "ledger.backup_before_repair",
                default_backup_before_repair(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // ATTENDANCE__LEDGER__PATH=... style overrides
            .add_source(Environment::with_prefix("ATTENDANCE").separator("__"))
            .build()?;

        let config: AttendanceConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !CAMERA_SOURCES.contains(&self.camera.source.as_str()) {
            return Err(ConfigError::Message(format!(
                "Unknown camera source '{}' (expected one of: {})",
                self.camera.source,
                CAMERA_SOURCES.join(", ")
            )));
        }

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.acquisition.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(
                "Acquisition max_consecutive_failures must be greater than 0".to_string(),
            ));
        }

        if self.scanner.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Scanner poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.scanner.cooldown_ms == 0 {
            return Err(ConfigError::Message(
                "Scanner cooldown_ms must be greater than 0".to_string(),
            ));
        }

        let ledger = &self.ledger;
        if ledger.day_header_row == 0
            || ledger.day_label_row == 0
            || ledger.first_data_row == 0
            || ledger.external_id_column == 0
            || ledger.identity_column == 0
        {
            return Err(ConfigError::Message(
                "Ledger rows and columns are 1-indexed and must be greater than 0".to_string(),
            ));
        }

        if ledger.first_data_row <= ledger.day_header_row.max(ledger.day_label_row) {
            return Err(ConfigError::Message(
                "Ledger first_data_row must be below the day header rows".to_string(),
            ));
        }

        if ledger.present_glyph.trim().is_empty() {
            return Err(ConfigError::Message(
                "Ledger present_glyph must not be empty".to_string(),
            ));
        }

        if let Some(tz) = &ledger.timezone {
            tz.parse::<chrono_tz::Tz>().map_err(|_| {
                ConfigError::Message(format!("Unknown ledger timezone '{}'", tz))
            })?;
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl AcquisitionConfig {
    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl LedgerConfig {
    /// Parsed timezone, if one is configured and valid
    pub fn tz(&self) -> Option<chrono_tz::Tz> {
        self.timezone.as_deref().and_then(|tz| tz.parse().ok())
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            acquisition: AcquisitionConfig::default(),
            scanner: ScannerConfig::default(),
            ledger: LedgerConfig::default(),
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            index: default_camera_index(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            image_dir: default_image_dir(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            yield_delay_ms: default_yield_delay_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            publish_overlays: default_publish_overlays(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            active_dir: default_active_dir(),
            day_header_row: default_day_header_row(),
            day_label_row: default_day_label_row(),
            first_data_row: default_first_data_row(),
            external_id_column: default_external_id_column(),
            identity_column: default_identity_column(),
            present_glyph: default_present_glyph(),
            timezone: None,
            excluded_keywords: default_excluded_keywords(),
            repair: default_repair(),
            backup_before_repair: default_backup_before_repair(),
        }
    }
}

// Default value functions
fn default_camera_source() -> String {
    if cfg!(all(feature = "camera", target_os = "linux")) {
        "gstreamer".to_string()
    } else {
        "images".to_string()
    }
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_image_dir() -> String {
    "./frames".to_string()
}
fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_yield_delay_ms() -> u64 {
    10
}
fn default_max_consecutive_failures() -> u32 {
    30
}
fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    10
}
fn default_cooldown_ms() -> u64 {
    1000
}
fn default_publish_overlays() -> bool {
    true
}

fn default_active_dir() -> String {
    "./Active".to_string()
}
fn default_day_header_row() -> u32 {
    11
}
fn default_day_label_row() -> u32 {
    12
}
fn default_first_data_row() -> u32 {
    13
}
fn default_external_id_column() -> u32 {
    1
}
fn default_identity_column() -> u32 {
    2
}
fn default_present_glyph() -> String {
    "✓".to_string()
}
fn default_excluded_keywords() -> Vec<String> {
    [
        "SCHOOL FORM",
        "DAILY ATTENDANCE",
        "LEARNER'S NAME",
        "LAST NAME",
        "FIRST NAME",
        "MIDDLE NAME",
        "TOTAL",
        "SUMMARY",
        "PERCENTAGE OF",
        "AVERAGE DAILY",
        "SUM(",
        "COUNTIF",
        "PREPARED BY",
        "SIGNATURE",
        "N/A",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_repair() -> bool {
    true
}
fn default_backup_before_repair() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AttendanceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.day_header_row, 11);
        assert_eq!(config.ledger.first_data_row, 13);
        assert_eq!(config.ledger.present_glyph, "✓");
        assert_eq!(config.scanner.cooldown(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AttendanceConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.ledger.first_data_row = 11;
        assert!(config.validate().is_err());
        config.ledger.first_data_row = 13;

        config.ledger.timezone = Some("Mars/Olympus_Mons".to_string());
        assert!(config.validate().is_err());

        config.ledger.timezone = Some("Asia/Manila".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.tz(), Some(chrono_tz::Asia::Manila));

        config.camera.source = "webcam".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
source = "images"
image_dir = "/tmp/frames"

[scanner]
cooldown_ms = 2500

[ledger]
path = "/srv/ledgers/grade5.xlsx"
timezone = "UTC"
"#
        )
        .unwrap();

        let config = AttendanceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.image_dir, "/tmp/frames");
        assert_eq!(config.scanner.cooldown_ms, 2500);
        assert_eq!(
            config.ledger.path.as_deref(),
            Some("/srv/ledgers/grade5.xlsx")
        );
        // untouched keys keep their defaults
        assert_eq!(config.ledger.identity_column, 2);
        assert_eq!(config.acquisition.max_consecutive_failures, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AttendanceConfig::load_from_file("/nonexistent/attendcam.toml").unwrap();
        assert_eq!(config.camera.resolution, (640, 480));
        assert!(!config.ledger.excluded_keywords.is_empty());
    }
}
