use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "ApiConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ApiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:5000".to_string()
    }

    fn default_timeout_secs() -> u64 {
        300
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "SearchConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SearchConfig {
    fn default_history_limit() -> usize {
        10
    }

    fn default_debounce_ms() -> u64 {
        300
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            history_limit: Self::default_history_limit(),
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

/// How the "popular" view discounts old sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PopularityDecay {
    /// `messages * max(0, window - days)`
    Linear { window_days: f64 },
    /// `messages * 0.5^(days / half_life_days)`
    Exponential { half_life_days: f64 },
}

impl Default for PopularityDecay {
    fn default() -> Self {
        PopularityDecay::Linear { window_days: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "RankingConfig::default_recent_window_days")]
    pub recent_window_days: i64,
    #[serde(default = "RankingConfig::default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default = "RankingConfig::default_popular_limit")]
    pub popular_limit: usize,
    #[serde(default)]
    pub popular_decay: PopularityDecay,
}

impl RankingConfig {
    fn default_recent_window_days() -> i64 {
        7
    }

    fn default_recent_limit() -> usize {
        10
    }

    fn default_popular_limit() -> usize {
        8
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            recent_window_days: Self::default_recent_window_days(),
            recent_limit: Self::default_recent_limit(),
            popular_limit: Self::default_popular_limit(),
            popular_decay: PopularityDecay::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "UploadConfig::default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "UploadConfig::default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "UploadConfig::default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

impl UploadConfig {
    fn default_max_file_size_mb() -> u64 {
        100
    }

    fn default_allowed_extensions() -> Vec<String> {
        ["wav", "mp3", "flac", "ogg", "m4a", "aac", "webm"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn default_allowed_mime_types() -> Vec<String> {
        [
            "audio/wav",
            "audio/x-wav",
            "audio/mpeg",
            "audio/mp3",
            "audio/flac",
            "audio/x-flac",
            "audio/ogg",
            "audio/mp4",
            "audio/x-m4a",
            "audio/aac",
            "audio/webm",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: Self::default_max_file_size_mb(),
            allowed_extensions: Self::default_allowed_extensions(),
            allowed_mime_types: Self::default_allowed_mime_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("audio-chat");

        Self::load_from(&config_dir.join("config.yaml"))
    }

    /// Read the YAML file at `config_path`, writing defaults there first if it is missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)?;
            serde_yaml::from_str(&config_content)?
        } else {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let default_config = Self::default();
            let config_content = serde_yaml::to_string(&default_config)?;
            fs::write(config_path, config_content)?;
            default_config
        };

        Ok(config)
    }

    pub fn get_data_dir(&self) -> Result<PathBuf> {
        if let Some(data_dir) = &self.storage.data_dir {
            return Ok(data_dir.clone());
        }

        let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("Could not find data directory"))?;
        Ok(data_dir.join("audio-chat"))
    }
}

// Global config instance
use once_cell::sync::OnceCell;
static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| Config::load().unwrap_or_default())
}
