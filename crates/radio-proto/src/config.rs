use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "PIRATE_RADIO_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fixed seed for every random choice (stations, favorites, animation
    /// variants).  Unset means entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub identify: IdentifyConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Animation frames, `<name><variant>_<frame>.<ext>`.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_favorites_file")]
    pub favorites_file: PathBuf,
    /// One search language per line, `#` comments allowed.
    #[serde(default = "default_languages_file")]
    pub languages_file: PathBuf,
    /// Where the identification sample is encoded.
    #[serde(default = "default_sample_file")]
    pub sample_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Linux framebuffer device, RGB565.
    Framebuffer,
    /// Headless: frames are only logged.
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_driver")]
    pub driver: DriverKind,
    #[serde(default = "default_framebuffer")]
    pub framebuffer: PathBuf,
    #[serde(default = "default_panel_size")]
    pub width: u32,
    #[serde(default = "default_panel_size")]
    pub height: u32,
    /// How long transient statuses (error, added, ...) stay on screen.
    #[serde(default = "default_transient_secs")]
    pub transient_secs: u64,
    /// Pixel size of generated QR codes.
    #[serde(default = "default_panel_size")]
    pub code_size: u32,
    /// How long the fallback search code stays on screen.
    #[serde(default = "default_code_secs")]
    pub code_secs: u64,
    /// Fallback search page encoded into the code image when a track
    /// cannot be saved: `<web_search_url>?<web_search_param>=<title artist>`.
    #[serde(default = "default_web_search_url")]
    pub web_search_url: String,
    #[serde(default = "default_web_search_param")]
    pub web_search_param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_stall_secs")]
    pub stall_secs: u64,
    #[serde(default = "default_stall_poll_secs")]
    pub stall_poll_secs: u64,
    /// Continuous silence after which a station is abandoned.
    #[serde(default = "default_max_silence_secs")]
    pub max_silence_secs: u64,
    /// ffmpeg `silencedetect` noise floor, dB.
    #[serde(default = "default_silence_noise_db")]
    pub silence_noise_db: i32,
    /// ffmpeg `silencedetect` minimum duration before `silence_start`.
    #[serde(default = "default_silence_detect_secs")]
    pub silence_detect_secs: u64,
    /// Delay before the first automatic retry after a dead start, doubled
    /// on each consecutive failure.  Zero retries immediately.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    /// Press: random station.  Hold: identify song.
    #[serde(default = "default_random_pin")]
    pub random_pin: u32,
    /// Press: random favorite.  Hold: save favorite.
    #[serde(default = "default_favorite_pin")]
    pub favorite_pin: u32,
    #[serde(default = "default_mute_pin")]
    pub mute_pin: Option<u32>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_sort_fields")]
    pub sort_fields: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_languages_per_search")]
    pub languages_per_search: usize,
    /// How many searches a single request may run before giving up on
    /// finding a station other than the current one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyConfig {
    /// audd.io API token.  Falls back to `token_file`.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_auddio_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_gateway")]
    pub gateway: String,
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Spotify refresh token.  Falls back to `token_file`.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_spotify_token_file")]
    pub token_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            favorites_file: default_favorites_file(),
            languages_file: default_languages_file(),
            sample_file: default_sample_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            framebuffer: default_framebuffer(),
            width: default_panel_size(),
            height: default_panel_size(),
            transient_secs: default_transient_secs(),
            code_size: default_panel_size(),
            code_secs: default_code_secs(),
            web_search_url: default_web_search_url(),
            web_search_param: default_web_search_param(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout_secs(),
            stall_secs: default_stall_secs(),
            stall_poll_secs: default_stall_poll_secs(),
            max_silence_secs: default_max_silence_secs(),
            silence_noise_db: default_silence_noise_db(),
            silence_detect_secs: default_silence_detect_secs(),
            retry_backoff_ms: 0,
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            gpio_root: default_gpio_root(),
            random_pin: default_random_pin(),
            favorite_pin: default_favorite_pin(),
            mute_pin: default_mute_pin(),
            debounce_ms: default_debounce_ms(),
            hold_ms: default_hold_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            sort_fields: default_sort_fields(),
            limit: default_limit(),
            languages_per_search: default_languages_per_search(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            token_file: default_auddio_token_file(),
            gateway: default_gateway(),
            sample_secs: default_sample_secs(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            token_file: default_spotify_token_file(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

fn default_assets_dir() -> PathBuf {
    platform::exe_dir().join("gifs")
}

fn default_favorites_file() -> PathBuf {
    platform::data_dir().join("favstations.json")
}

fn default_languages_file() -> PathBuf {
    platform::exe_dir().join("languages.txt")
}

fn default_sample_file() -> PathBuf {
    platform::data_dir().join("clip-recording.mp3")
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("pirate-radio.log")
}

fn default_driver() -> DriverKind {
    DriverKind::Framebuffer
}

fn default_framebuffer() -> PathBuf {
    PathBuf::from("/dev/fb1")
}

fn default_panel_size() -> u32 {
    240
}

fn default_transient_secs() -> u64 {
    5
}

fn default_code_secs() -> u64 {
    60
}

fn default_web_search_url() -> String {
    "https://www.youtube.com/results".to_string()
}

fn default_web_search_param() -> String {
    "search_query".to_string()
}

fn default_start_timeout_secs() -> u64 {
    30
}

fn default_stall_secs() -> u64 {
    15
}

fn default_stall_poll_secs() -> u64 {
    5
}

fn default_max_silence_secs() -> u64 {
    60
}

fn default_silence_noise_db() -> i32 {
    -30
}

fn default_silence_detect_secs() -> u64 {
    20
}

fn default_retry_backoff_max_ms() -> u64 {
    60_000
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_random_pin() -> u32 {
    16
}

fn default_favorite_pin() -> u32 {
    24
}

fn default_mute_pin() -> Option<u32> {
    Some(6)
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_hold_ms() -> u64 {
    500
}

fn default_poll_ms() -> u64 {
    50
}

fn default_servers() -> Vec<String> {
    [
        "de1.api.radio-browser.info",
        "at1.api.radio-browser.info",
        "nl1.api.radio-browser.info",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sort_fields() -> Vec<String> {
    ["clickcount", "votes", "clicktrend", "random"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_limit() -> u32 {
    10
}

fn default_languages_per_search() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_auddio_token_file() -> PathBuf {
    platform::exe_dir().join("auddio_token.txt")
}

fn default_gateway() -> String {
    "https://api.audd.io/".to_string()
}

fn default_sample_secs() -> u64 {
    5
}

fn default_spotify_token_file() -> PathBuf {
    platform::exe_dir().join("spotify_token.txt")
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u16 {
    2
}

impl StreamConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }

    pub fn stall_poll(&self) -> Duration {
        Duration::from_secs(self.stall_poll_secs.max(1))
    }

    pub fn max_silence(&self) -> Duration {
        Duration::from_secs(self.max_silence_secs)
    }

    /// Backoff before retry number `failures` (1-based).  `None` when
    /// backoff is disabled.
    pub fn retry_delay(&self, failures: u32) -> Option<Duration> {
        if self.retry_backoff_ms == 0 || failures == 0 {
            return None;
        }
        let factor = 1u64 << (failures - 1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.retry_backoff_max_ms);
        Some(Duration::from_millis(ms))
    }
}

impl InputConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn hold_sample(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

impl IdentifyConfig {
    /// The configured token, or the contents of the token file when it
    /// looks like one.  `None` disables identification.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = self.api_token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(token.trim().to_string());
        }
        let content = std::fs::read_to_string(&self.token_file).ok()?;
        let token = content.trim();
        if token.len() > 4 {
            Some(token.to_string())
        } else {
            None
        }
    }
}

impl LibraryConfig {
    pub fn resolve_refresh_token(&self) -> Option<String> {
        if let Some(token) = self.refresh_token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(token.trim().to_string());
        }
        let content = std::fs::read_to_string(&self.token_file).ok()?;
        let token = content.trim();
        if token.len() > 4 {
            Some(token.to_string())
        } else {
            None
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing the defaults there first when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => platform::config_dir().join("config.toml"),
        }
    }
}

/// Parse a languages list: one per line, blank lines and `#` comments
/// skipped.
pub fn parse_languages(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_languages(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let languages = parse_languages(&content);
    if languages.is_empty() {
        anyhow::bail!("no languages found in {}", path.display());
    }
    Ok(languages)
}
