use crate::domain::aggregation::DEFAULT_DEBOUNCE_MS;
use crate::domain::reference::DEFAULT_REFERENCE_KEYWORD;
use crate::infrastructure::bluetooth::protocol::{
    self, DescriptorRule, DescriptorScope, HEART_RATE_MEASUREMENT_UUID,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "gatt_recorder".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// One entry of the descriptor-write table, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorWriteSetting {
    pub characteristic: String,
    #[serde(default)]
    pub scope: DescriptorScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Aggregation
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// No timeout on the connecting state unless set
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    // Storage
    /// Root of external storage; the home directory when unset
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    #[serde(default = "default_record_file_name")]
    pub record_file_name: String,
    #[serde(default = "default_reference_keyword")]
    pub reference_keyword: String,
    #[serde(default = "default_reference_dirs")]
    pub reference_dirs: Vec<String>,

    // GATT profile
    #[serde(default = "default_heart_rate_uuid")]
    pub heart_rate_uuid: String,
    #[serde(default = "default_descriptor_writes")]
    pub descriptor_writes: Vec<DescriptorWriteSetting>,

    // Devices
    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            debounce_ms: default_debounce_ms(),
            connect_timeout_ms: None,
            storage_root: None,
            record_file_name: default_record_file_name(),
            reference_keyword: default_reference_keyword(),
            reference_dirs: default_reference_dirs(),
            heart_rate_uuid: default_heart_rate_uuid(),
            descriptor_writes: default_descriptor_writes(),
            known_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_record_file_name() -> String {
    "ble_asci.txt".to_string()
}
fn default_reference_keyword() -> String {
    DEFAULT_REFERENCE_KEYWORD.to_string()
}
fn default_reference_dirs() -> Vec<String> {
    vec![String::new(), "Downloads".to_string()]
}
fn default_heart_rate_uuid() -> String {
    HEART_RATE_MEASUREMENT_UUID.to_string()
}
fn default_descriptor_writes() -> Vec<DescriptorWriteSetting> {
    protocol::default_descriptor_rules()
        .into_iter()
        .map(|rule| DescriptorWriteSetting {
            characteristic: rule.characteristic.to_string(),
            scope: rule.scope,
        })
        .collect()
}

/// Validated runtime configuration of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub debounce: Duration,
    pub connect_timeout: Option<Duration>,
    pub heart_rate_uuid: Uuid,
    pub descriptor_rules: Vec<DescriptorRule>,
    pub record_file_name: String,
    pub reference_keyword: String,
    pub reference_dirs: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            connect_timeout: None,
            heart_rate_uuid: HEART_RATE_MEASUREMENT_UUID,
            descriptor_rules: protocol::default_descriptor_rules(),
            record_file_name: default_record_file_name(),
            reference_keyword: default_reference_keyword(),
            reference_dirs: default_reference_dirs(),
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let heart_rate_uuid = protocol::parse_uuid(&self.heart_rate_uuid)
            .with_context(|| format!("Invalid heart rate UUID {}", self.heart_rate_uuid))?;

        let descriptor_rules = self
            .descriptor_writes
            .iter()
            .map(|entry| {
                let characteristic = protocol::parse_uuid(&entry.characteristic)
                    .with_context(|| {
                        format!("Invalid descriptor-write UUID {}", entry.characteristic)
                    })?;
                Ok(DescriptorRule {
                    characteristic,
                    scope: entry.scope,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(SessionConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            heart_rate_uuid,
            descriptor_rules,
            record_file_name: self.record_file_name.clone(),
            reference_keyword: self.reference_keyword.clone(),
            reference_dirs: self.reference_dirs.clone(),
        })
    }

    /// Copy with per-run overrides applied; the stored settings are left as they are
    pub fn with_overrides(&self, storage_root: Option<PathBuf>, debounce_ms: Option<u64>) -> Self {
        let mut settings = self.clone();
        if let Some(root) = storage_root {
            settings.storage_root = Some(root);
        }
        if let Some(debounce_ms) = debounce_ms {
            settings.debounce_ms = debounce_ms;
        }
        settings
    }

    pub fn storage_root(&self) -> anyhow::Result<PathBuf> {
        match &self.storage_root {
            Some(root) => Ok(root.clone()),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load settings from `settings_path`, falling back to defaults
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GattRecorder");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_address(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.settings.known_addresses.iter().any(|a| a == address) {
            self.settings.known_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}
