use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{window::TimeWindow, Result, TimelapseError};

pub const DEFAULT_NAME: &str = "Mjpeg Timelapse Camera";
pub const MIN_FETCH_INTERVAL_SECS: f64 = 1.0;
/// One week.
pub const MAX_FETCH_INTERVAL_SECS: f64 = 604_800.0;
/// Playback rates outside this range give unusable frame delays.
pub const MIN_FRAMERATE: f64 = 1.0 / 3600.0;
pub const MAX_FRAMERATE: f64 = 1000.0;
/// Ten years of retention.
pub const MAX_DURATION_MINUTES: u64 = 10 * 365 * 24 * 60;
/// Upper bound for a single snapshot request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

fn default_name() -> String {
    DEFAULT_NAME.into()
}

fn default_fetch_interval() -> f64 {
    60.0
}

fn default_framerate() -> f64 {
    2.0
}

fn default_max_frames() -> usize {
    100
}

fn default_quality() -> u32 {
    75
}

fn default_true() -> bool {
    true
}

/// Per-camera capture settings. Replaced as a whole on reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub image_url: String,
    #[serde(default = "default_name")]
    pub name: String,
    /// Seconds between capture attempts.
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: f64,
    /// Playback frames per second for the synthetic stream.
    #[serde(default = "default_framerate")]
    pub framerate: f64,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// Frames older than this many minutes are evicted after each capture.
    #[serde(default)]
    pub max_duration_minutes: Option<u64>,
    #[serde(default = "default_true", rename = "loop")]
    pub loop_frames: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub enabling_entity_id: Option<String>,
}

impl SourceConfig {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            name: default_name(),
            fetch_interval: default_fetch_interval(),
            framerate: default_framerate(),
            max_frames: default_max_frames(),
            quality: default_quality(),
            max_duration_minutes: None,
            loop_frames: true,
            headers: BTreeMap::new(),
            username: None,
            password: None,
            start_time: None,
            end_time: None,
            enabling_entity_id: None,
        }
    }

    /// Clamped to the validated range, so an unvalidated config never panics.
    pub fn fetch_interval(&self) -> Duration {
        let secs = self
            .fetch_interval
            .clamp(MIN_FETCH_INTERVAL_SECS, MAX_FETCH_INTERVAL_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(60))
    }

    /// Delay between frames of the synthetic MJPEG stream, never zero.
    pub fn frame_interval(&self) -> Duration {
        let rate = self.framerate.clamp(MIN_FRAMERATE, MAX_FRAMERATE);
        Duration::try_from_secs_f64(1.0 / rate)
            .unwrap_or(Duration::from_millis(500))
            .max(Duration::from_millis(1))
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_duration_minutes.map(|minutes| {
            minutes
                .checked_mul(60)
                .map(Duration::from_secs)
                .unwrap_or(Duration::MAX)
        })
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.quality.clamp(1, 100) as u8
    }

    pub fn time_window(&self) -> Result<TimeWindow> {
        TimeWindow::parse(self.start_time.as_deref(), self.end_time.as_deref())
    }

    /// Enabling entity id, ignoring blank values left behind by form input.
    pub fn enabling_entity(&self) -> Option<&str> {
        self.enabling_entity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Basic credentials; a password without a username is never sent.
    pub fn credentials(&self) -> Option<(&str, Option<&str>)> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.is_empty());
        Some((username, password))
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.image_url).map_err(|err| {
            TimelapseError::invalid_field("image_url", format!("'{}': {err}", self.image_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(TimelapseError::invalid_field(
                "image_url",
                "must be an http(s) URL with a host",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(TimelapseError::invalid_field("name", "must not be empty"));
        }
        if !(MIN_FETCH_INTERVAL_SECS..=MAX_FETCH_INTERVAL_SECS).contains(&self.fetch_interval) {
            return Err(TimelapseError::invalid_field(
                "fetch_interval",
                format!(
                    "must be between {MIN_FETCH_INTERVAL_SECS} and {MAX_FETCH_INTERVAL_SECS} seconds"
                ),
            ));
        }
        if !(MIN_FRAMERATE..=MAX_FRAMERATE).contains(&self.framerate) {
            return Err(TimelapseError::invalid_field(
                "framerate",
                format!("must be between one frame per hour and {MAX_FRAMERATE} per second"),
            ));
        }
        if self.max_frames == 0 {
            return Err(TimelapseError::invalid_field(
                "max_frames",
                "must be greater than zero",
            ));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(TimelapseError::invalid_field(
                "quality",
                "must be between 1 and 100",
            ));
        }
        if self
            .max_duration_minutes
            .is_some_and(|minutes| !(1..=MAX_DURATION_MINUTES).contains(&minutes))
        {
            return Err(TimelapseError::invalid_field(
                "max_duration_minutes",
                format!("must be between 1 and {MAX_DURATION_MINUTES} minutes"),
            ));
        }
        if self.password.as_deref().is_some_and(|p| !p.is_empty())
            && self.username.as_deref().map_or(true, str::is_empty)
        {
            return Err(TimelapseError::invalid_field(
                "username",
                "required when a password is set",
            ));
        }
        self.time_window()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root under which each source gets its own frame directory.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/mjpeg_timelapse".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8123,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelapseConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ops: OpsConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl TimelapseConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            TimelapseError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            TimelapseError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(TimelapseError::invalid_field(
                "server.port",
                "must be a valid port (>0)",
            ));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(TimelapseError::invalid_field(
                "storage.data_dir",
                "must not be empty",
            ));
        }

        let mut urls = HashSet::new();
        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !urls.insert(source.image_url.as_str()) {
                return Err(TimelapseError::invalid_field(
                    "image_url",
                    format!("'{}' is already configured", source.image_url),
                ));
            }
            if !names.insert(source.name.as_str()) {
                return Err(TimelapseError::invalid_field(
                    "name",
                    format!("'{}' is already configured", source.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig::new("http://camera.local/snapshot.jpg")
    }

    #[test]
    fn load_timelapse_config_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("timelapse.toml");
        let doc = r#"
            [storage]
            data_dir = "/var/lib/timelapse"

            [[sources]]
            image_url = "http://camera.local/snapshot.jpg"
            name = "Garden"
            fetch_interval = 30
            loop = false
            start_time = "07:00"
            end_time = "19:30"
            enabling_entity_id = "binary_sensor.daylight"

            [sources.headers]
            X-Api-Key = "secret"
        "#;
        fs::write(&path, doc).expect("write temp config");

        let loaded = TimelapseConfig::from_file(&path).expect("load config");
        assert_eq!(loaded.storage.data_dir, "/var/lib/timelapse");
        assert_eq!(loaded.server.port, 8123);
        assert_eq!(loaded.ops.log_level, "info");
        let garden = &loaded.sources[0];
        assert_eq!(garden.name, "Garden");
        assert_eq!(garden.fetch_interval(), Duration::from_secs(30));
        assert!(!garden.loop_frames);
        assert_eq!(garden.max_frames, 100);
        assert_eq!(garden.quality, 75);
        assert_eq!(garden.enabling_entity(), Some("binary_sensor.daylight"));
        assert_eq!(garden.headers.get("X-Api-Key").map(String::as_str), Some("secret"));
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn validate_source_rules() {
        let mut config = source();
        config.image_url = "not a url".into();
        assert_eq!(config.validate().unwrap_err().field(), Some("image_url"));
        config.image_url = "ftp://camera.local/snap.jpg".into();
        assert_eq!(config.validate().unwrap_err().field(), Some("image_url"));
        config.image_url = "http://camera.local/snap.jpg".into();

        config.quality = 0;
        assert_eq!(config.validate().unwrap_err().field(), Some("quality"));
        config.quality = 101;
        assert_eq!(config.validate().unwrap_err().field(), Some("quality"));
        config.quality = 100;

        config.fetch_interval = 0.0;
        assert_eq!(config.validate().unwrap_err().field(), Some("fetch_interval"));
        config.fetch_interval = 1.5;

        config.framerate = -1.0;
        assert_eq!(config.validate().unwrap_err().field(), Some("framerate"));
        config.framerate = 0.5;

        config.max_frames = 0;
        assert_eq!(config.validate().unwrap_err().field(), Some("max_frames"));
        config.max_frames = 1;

        config.max_duration_minutes = Some(0);
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("max_duration_minutes")
        );
        config.max_duration_minutes = Some(5);

        config.password = Some("hunter2".into());
        assert_eq!(config.validate().unwrap_err().field(), Some("username"));
        config.username = Some("admin".into());

        config.start_time = Some("7am".into());
        assert_eq!(config.validate().unwrap_err().field(), Some("start_time"));
        config.start_time = Some("07:00:00".into());

        assert!(config.validate().is_ok());
        assert_eq!(config.credentials(), Some(("admin", Some("hunter2"))));
        assert_eq!(config.max_age(), Some(Duration::from_secs(300)));
        assert_eq!(config.frame_interval(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_duplicate_sources() {
        let mut config = TimelapseConfig::default();
        let mut first = source();
        first.name = "front".into();
        let mut second = source();
        second.name = "back".into();
        config.sources = vec![first.clone(), second];
        assert_eq!(config.validate().unwrap_err().field(), Some("image_url"));

        let mut renamed = first.clone();
        renamed.image_url = "http://other.local/snap.jpg".into();
        config.sources = vec![first, renamed];
        assert_eq!(config.validate().unwrap_err().field(), Some("name"));
    }

    #[test]
    fn rejects_out_of_range_timings() {
        let mut config = source();
        config.fetch_interval = 1e20;
        assert_eq!(config.validate().unwrap_err().field(), Some("fetch_interval"));
        config.fetch_interval = f64::NAN;
        assert_eq!(config.validate().unwrap_err().field(), Some("fetch_interval"));
        config.fetch_interval = 60.0;

        config.framerate = 1e-300;
        assert_eq!(config.validate().unwrap_err().field(), Some("framerate"));
        config.framerate = 1e10;
        assert_eq!(config.validate().unwrap_err().field(), Some("framerate"));
        config.framerate = MAX_FRAMERATE;
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_millis(1));

        config.max_duration_minutes = Some(u64::MAX);
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("max_duration_minutes")
        );
        config.max_duration_minutes = Some(MAX_DURATION_MINUTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accessors_survive_unvalidated_values() {
        let mut config = source();
        config.fetch_interval = 1e20;
        config.framerate = 1e10;
        config.max_duration_minutes = Some(u64::MAX);
        assert_eq!(
            config.fetch_interval(),
            Duration::from_secs_f64(MAX_FETCH_INTERVAL_SECS)
        );
        assert!(config.frame_interval() >= Duration::from_millis(1));
        assert_eq!(config.max_age(), Some(Duration::MAX));

        config.framerate = 1e-300;
        let slowest = config.frame_interval();
        assert!(slowest > Duration::from_secs(3599) && slowest < Duration::from_secs(3601));
        config.fetch_interval = f64::NAN;
        assert!(config.fetch_interval() > Duration::ZERO);
    }

    #[test]
    fn blank_enabling_entity_is_ignored() {
        let mut config = source();
        config.enabling_entity_id = Some("  ".into());
        assert_eq!(config.enabling_entity(), None);
    }
}
