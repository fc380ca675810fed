//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument; when the
//! file is missing or malformed the built-in defaults are used. Defaults
//! match the appliance's stock wiring (BOARD pin numbering, RC522 on SPI0).

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// GPIO pin numbering convention used in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Physical header position (1-40).
    Board,
    /// Broadcom GPIO number.
    Bcm,
}

/// Interrupt edge for a button input. Only rising or falling is supported;
/// anything else fails at config parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    Falling,
}

/// MIFARE authentication key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    A,
    B,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplianceConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_volume_step")]
    pub volume_step_percent: u8,
    /// Interval for the repeated "ready" prompt; 0 disables it.
    #[serde(default)]
    pub ready_repeat_secs: f64,
    #[serde(default = "default_true")]
    pub use_offline: bool,
    #[serde(default = "default_offline_dir")]
    pub offline_dir: String,
    #[serde(default = "default_offline_port")]
    pub offline_port: u16,
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: String,
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_volume_step() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

fn default_offline_dir() -> String {
    "/automnt/offlineBooks".to_string()
}

fn default_offline_port() -> u16 {
    8081
}

fn default_sounds_dir() -> String {
    "sounds".to_string()
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            volume_step_percent: default_volume_step(),
            ready_repeat_secs: 0.0,
            use_offline: true,
            offline_dir: default_offline_dir(),
            offline_port: default_offline_port(),
            sounds_dir: default_sounds_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RfidConfig {
    /// Six-byte sector authentication key.
    #[serde(default = "default_rfid_key")]
    pub key: Vec<u8>,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
    #[serde(default)]
    pub spi_bus: u8,
    #[serde(default)]
    pub spi_slave: u8,
    #[serde(default = "default_spi_clock")]
    pub spi_clock_hz: u32,
    #[serde(default = "default_rst_pin")]
    pub rst_pin: u8,
    #[serde(default = "default_irq_pin")]
    pub irq_pin: u8,
}

fn default_rfid_key() -> Vec<u8> {
    vec![0xFF; 6]
}

fn default_key_type() -> KeyType {
    KeyType::A
}

fn default_spi_clock() -> u32 {
    1_000_000
}

fn default_rst_pin() -> u8 {
    15
}

fn default_irq_pin() -> u8 {
    13
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self {
            key: default_rfid_key(),
            key_type: KeyType::A,
            spi_bus: 0,
            spi_slave: 0,
            spi_clock_hz: default_spi_clock(),
            rst_pin: default_rst_pin(),
            irq_pin: default_irq_pin(),
        }
    }
}

/// A debounced press/hold button input. `pin = 0` disables the button.
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonPinConfig {
    #[serde(default)]
    pub pin: u8,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_edge")]
    pub edge: Edge,
    #[serde(default = "default_true")]
    pub pullup: bool,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_edge() -> Edge {
    Edge::Falling
}

impl ButtonPinConfig {
    fn disabled() -> Self {
        Self { pin: 0, debounce_ms: default_debounce_ms(), edge: Edge::Falling, pullup: true }
    }

    pub fn enabled(&self) -> bool {
        self.pin > 0
    }
}

impl Default for ButtonPinConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinsConfig {
    #[serde(default = "default_numbering")]
    pub numbering: PinNumbering,
    #[serde(default = "default_status_led")]
    pub status_led: u8,
    /// Shutdown hold button; `pin = 0` disables it.
    #[serde(default = "default_shutdown_pin")]
    pub shutdown: u8,
    #[serde(default = "default_shutdown_hold_ms")]
    pub shutdown_hold_ms: u64,
    #[serde(default = "default_edge")]
    pub shutdown_edge: Edge,
    #[serde(default = "default_play_pause")]
    pub play_pause: ButtonPinConfig,
    #[serde(default = "default_rewind")]
    pub rewind: ButtonPinConfig,
    #[serde(default = "default_forward")]
    pub forward: ButtonPinConfig,
    /// Rotary encoder lines; 0 on either disables volume control.
    #[serde(default = "default_volume_clk")]
    pub volume_clk: u8,
    #[serde(default = "default_volume_dt")]
    pub volume_dt: u8,
}

fn default_numbering() -> PinNumbering {
    PinNumbering::Board
}

fn default_status_led() -> u8 {
    18
}

fn default_shutdown_pin() -> u8 {
    40
}

fn default_shutdown_hold_ms() -> u64 {
    1000
}

fn default_play_pause() -> ButtonPinConfig {
    ButtonPinConfig { pin: 16, ..ButtonPinConfig::disabled() }
}

fn default_rewind() -> ButtonPinConfig {
    ButtonPinConfig { pin: 7, ..ButtonPinConfig::disabled() }
}

fn default_forward() -> ButtonPinConfig {
    ButtonPinConfig { pin: 22, ..ButtonPinConfig::disabled() }
}

fn default_volume_clk() -> u8 {
    11
}

fn default_volume_dt() -> u8 {
    12
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            numbering: PinNumbering::Board,
            status_led: default_status_led(),
            shutdown: default_shutdown_pin(),
            shutdown_hold_ms: default_shutdown_hold_ms(),
            shutdown_edge: Edge::Falling,
            play_pause: default_play_pause(),
            rewind: default_rewind(),
            forward: default_forward(),
            volume_clk: default_volume_clk(),
            volume_dt: default_volume_dt(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Interval for the browser-process liveness check; 0 disables it.
    #[serde(default = "default_browser_check")]
    pub check_secs: f64,
    #[serde(default = "default_display")]
    pub display: u8,
    /// Interval for asking a connected browser for its status; 0 disables it.
    #[serde(default = "default_browser_recheck")]
    pub recheck_secs: f64,
}

fn default_browser_check() -> f64 {
    20.0
}

fn default_display() -> u8 {
    1
}

fn default_browser_recheck() -> f64 {
    150.0
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            check_secs: default_browser_check(),
            display: default_display(),
            recheck_secs: default_browser_recheck(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_readout_retry_secs")]
    pub readout_retry_secs: f64,
    #[serde(default = "default_readout_retries")]
    pub readout_retries: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1025
}

fn default_readout_retry_secs() -> f64 {
    1.0
}

fn default_readout_retries() -> u32 {
    5
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            readout_retry_secs: default_readout_retry_secs(),
            readout_retries: default_readout_retries(),
        }
    }
}

/// A fire-and-forget repeated shell command.
#[derive(Debug, Clone, Deserialize)]
pub struct RepeatCommandConfig {
    pub name: String,
    pub command: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub repeat_on_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub appliance: ApplianceConfig,
    #[serde(default)]
    pub rfid: RfidConfig,
    #[serde(default)]
    pub pins: PinsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub command: Vec<RepeatCommandConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    appliance: ApplianceConfig,
    rfid: RfidConfig,
    pins: PinsConfig,
    browser: BrowserConfig,
    transport: TransportConfig,
    commands: Vec<RepeatCommandConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml: TomlConfig, file: &str) -> Self {
        Self {
            appliance: toml.appliance,
            rfid: toml.rfid,
            pins: toml.pins,
            browser: toml.browser,
            transport: toml.transport,
            commands: toml.command,
            config_file: file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.rfid.key.len() != 6 {
            anyhow::bail!("rfid.key must be exactly 6 bytes, got {}", toml_config.rfid.key.len());
        }

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn language(&self) -> &str {
        &self.appliance.language
    }

    pub fn volume_step_percent(&self) -> u8 {
        self.appliance.volume_step_percent
    }

    pub fn ready_repeat_secs(&self) -> f64 {
        self.appliance.ready_repeat_secs
    }

    pub fn use_offline(&self) -> bool {
        self.appliance.use_offline
    }

    pub fn offline_dir(&self) -> &Path {
        Path::new(&self.appliance.offline_dir)
    }

    pub fn offline_port(&self) -> u16 {
        self.appliance.offline_port
    }

    /// Path of a prompt sound for the configured language.
    pub fn sound_file(&self, name: &str) -> PathBuf {
        Path::new(&self.appliance.sounds_dir)
            .join(&self.appliance.language)
            .join(format!("{name}.wav"))
    }

    pub fn rfid_key(&self) -> [u8; 6] {
        let mut key = [0u8; 6];
        key.copy_from_slice(&self.rfid.key[..6]);
        key
    }

    pub fn rfid_key_type(&self) -> KeyType {
        self.rfid.key_type
    }

    pub fn rfid(&self) -> &RfidConfig {
        &self.rfid
    }

    pub fn pins(&self) -> &PinsConfig {
        &self.pins
    }

    pub fn browser_check_secs(&self) -> f64 {
        self.browser.check_secs
    }

    pub fn browser_display(&self) -> u8 {
        self.browser.display
    }

    pub fn browser_recheck_secs(&self) -> f64 {
        self.browser.recheck_secs
    }

    pub fn transport_host(&self) -> &str {
        &self.transport.host
    }

    pub fn transport_port(&self) -> u16 {
        self.transport.port
    }

    pub fn readout_retry_secs(&self) -> f64 {
        self.transport.readout_retry_secs
    }

    pub fn readout_retries(&self) -> u32 {
        self.transport.readout_retries
    }

    pub fn commands(&self) -> &[RepeatCommandConfig] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_wiring() {
        let config = Config::default();
        assert_eq!(config.language(), "en-US");
        assert_eq!(config.rfid_key(), [0xFF; 6]);
        assert_eq!(config.rfid_key_type(), KeyType::A);
        assert_eq!(config.pins().status_led, 18);
        assert_eq!(config.pins().play_pause.pin, 16);
        assert_eq!(config.transport_port(), 1025);
        assert_eq!(config.readout_retries(), 5);
        assert!(config.use_offline());
    }

    #[test]
    fn test_sound_file_path() {
        let config = Config::default();
        assert_eq!(config.sound_file("ready"), PathBuf::from("sounds/en-US/ready.wav"));
    }

    #[test]
    fn test_button_disabled_by_zero_pin() {
        let cfg = ButtonPinConfig { pin: 0, ..ButtonPinConfig::default() };
        assert!(!cfg.enabled());
    }
}
