//! Deployment configuration loading
//!
//! One YAML file (`curator.yaml`) describes a room installation: broker
//! addresses, scene directory, button identity, and watchdog ceilings.
//! Every field has a sensible default so a minimal file only needs
//! `room_id` and the broker host.

mod error;

pub use error::{ConfigError, ConfigResult};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

/// Top-level deployment configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Room identity; namespaces topics and names the default scene path
    pub room_id: String,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub scenes: ScenesConfig,

    #[serde(default)]
    pub button: ButtonConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Tracing filter directive, e.g. `info` or `curator_engine=debug`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

/// Broker connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    #[serde(default = "default_broker_host")]
    pub primary_host: String,

    /// Secondary broker tried after sustained primary failure
    #[serde(default = "default_fallback_host")]
    pub fallback_host: Option<String>,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_initial_secs")]
    pub reconnect_initial_secs: u64,

    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    /// Consecutive failed attempts before alternating to the fallback
    #[serde(default = "default_fallback_after")]
    pub fallback_after: u32,
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            primary_host: default_broker_host(),
            fallback_host: default_fallback_host(),
            port: default_broker_port(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_initial_secs: default_reconnect_initial_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            fallback_after: default_fallback_after(),
        }
    }
}

/// Scene file locations
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenesConfig {
    /// Directory holding per-room scene files
    #[serde(default = "default_scenes_dir")]
    pub directory: PathBuf,

    /// File started by the room's button or `START` command
    #[serde(default = "default_scene_file")]
    pub default_scene: String,
}

impl ScenesConfig {
    /// Path of the default scene for a room: `<directory>/<room>/<file>`
    pub fn default_scene_path(&self, room_id: &str) -> PathBuf {
        self.directory.join(room_id).join(&self.default_scene)
    }

    /// Path of a named scene for a room
    pub fn scene_path(&self, room_id: &str, name: &str) -> PathBuf {
        self.directory.join(room_id).join(name)
    }
}

impl Default for ScenesConfig {
    fn default() -> Self {
        Self {
            directory: default_scenes_dir(),
            default_scene: default_scene_file(),
        }
    }
}

/// Physical button settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonConfig {
    /// Identifier matched against `button` transitions
    #[serde(default = "default_button_id")]
    pub id: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl ButtonConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            id: default_button_id(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Media playback collaborator settings
///
/// Player commands are argv templates; `{file}` is replaced with the
/// resolved media path and `{volume}` with the volume from the command,
/// when present. The spawned player is expected to exit when the track
/// ends and to accept control lines (`pause`, `seek <secs>`) on stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,

    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,

    #[serde(default = "default_audio_player")]
    pub audio_player: Vec<String>,

    #[serde(default = "default_video_player")]
    pub video_player: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            video_dir: default_video_dir(),
            audio_player: default_audio_player(),
            video_player: default_video_player(),
        }
    }
}

/// Watchdog thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Heartbeat age that counts as a hang while a scene is running
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseYaml { source, .. } => ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(path = %path.display(), room_id = %config.room_id, "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> ConfigResult<Config> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: PathBuf::from("<inline>"),
                source: e,
            })?;

        if config.room_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "room_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if config.mqtt.primary_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "mqtt.primary_host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if config.mqtt.reconnect_initial_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mqtt.reconnect_initial_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    /// Client identity announced to the broker
    pub fn client_id(&self) -> String {
        format!("curator-{}", self.room_id)
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_fallback_host() -> Option<String> {
    Some("localhost".to_string())
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_initial_secs() -> u64 {
    1
}

fn default_reconnect_max_secs() -> u64 {
    60
}

fn default_fallback_after() -> u32 {
    3
}

fn default_scenes_dir() -> PathBuf {
    PathBuf::from("scenes")
}

fn default_scene_file() -> String {
    "scene.json".to_string()
}

fn default_button_id() -> String {
    "panel".to_string()
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

fn default_video_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_audio_player() -> Vec<String> {
    vec!["mpg123".to_string(), "-q".to_string(), "{file}".to_string()]
}

fn default_video_player() -> Vec<String> {
    vec![
        "mpv".to_string(),
        "--fullscreen".to_string(),
        "--no-terminal".to_string(),
        "{file}".to_string(),
    ]
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_heartbeat_timeout_secs() -> u64 {
    300
}

fn default_max_memory_mb() -> u64 {
    300
}

fn default_max_cpu_percent() -> f64 {
    80.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml("room_id: room1\n").unwrap();
        assert_eq!(config.room_id, "room1");
        assert_eq!(config.mqtt.primary_host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.scenes.default_scene, "scene.json");
        assert_eq!(config.button.id, "panel");
        assert_eq!(config.media.audio_dir, PathBuf::from("audio"));
        assert_eq!(config.media.audio_player[0], "mpg123");
        assert_eq!(config.monitor.max_memory_mb, 300);
        assert_eq!(config.client_id(), "curator-room1");
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
room_id: room2
mqtt:
  primary_host: 10.0.0.2
  fallback_host: localhost
  port: 1884
  keep_alive_secs: 15
  reconnect_initial_secs: 2
  reconnect_max_secs: 120
  fallback_after: 5
scenes:
  directory: /opt/curator/scenes
  default_scene: main.json
button:
  id: lobby
  debounce_ms: 250
media:
  audio_dir: /opt/curator/audio
  video_dir: /opt/curator/videos
  audio_player: ["mpg123", "-q", "{file}"]
  video_player: ["mpv", "--fullscreen", "{file}"]
monitor:
  check_interval_secs: 30
  heartbeat_timeout_secs: 600
  max_memory_mb: 512
  max_cpu_percent: 70.0
log_filter: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.mqtt.primary_host, "10.0.0.2");
        assert_eq!(config.mqtt.fallback_after, 5);
        assert_eq!(
            config.scenes.default_scene_path("room2"),
            PathBuf::from("/opt/curator/scenes/room2/main.json")
        );
        assert_eq!(config.button.debounce(), Duration::from_millis(250));
        assert_eq!(config.media.video_dir, PathBuf::from("/opt/curator/videos"));
        assert_eq!(config.monitor.heartbeat_timeout(), Duration::from_secs(600));
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn empty_room_id_rejected() {
        let err = Config::from_yaml("room_id: \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "room_id"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = Config::from_yaml("room_id: room1\ntypo_key: true\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { .. }));
    }

    #[test]
    fn load_from_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("curator.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"room_id: room1\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.room_id, "room1");

        let err = Config::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
