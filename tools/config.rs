use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const APP_DIR_NAME: &str = "tagcat";
const DEFAULT_BATCH_SIZE: usize = library::DEFAULT_BATCH_SIZE;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub version: u32,
    pub music_root: String,
    pub catalog_path: String,
    pub scan_batch_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: default_music_root(),
            catalog_path: default_catalog_path(),
            scan_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("TAGCAT_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(APP_DIR_NAME).join("config.yaml"),
        None => PathBuf::from("config.yaml"),
    }
}

fn default_music_root() -> String {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("Music"))
        .to_string_lossy()
        .into_owned()
}

fn default_catalog_path() -> String {
    library::default_store_path()
        .unwrap_or_else(|| PathBuf::from("catalog.redb"))
        .to_string_lossy()
        .into_owned()
}

/// Loads the config at `path`, writing a default one first if none exists.
/// The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(CatalogConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CatalogConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.music_root.trim().is_empty() {
            config.music_root = default_music_root();
        }
        if config.catalog_path.trim().is_empty() {
            config.catalog_path = default_catalog_path();
        }
        if config.scan_batch_size == 0 {
            config.scan_batch_size = DEFAULT_BATCH_SIZE;
        }
        return Ok((config, false));
    }

    let config = CatalogConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CatalogConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// `MUSIC_ROOT` and `CATALOG_PATH` win over the file.
pub fn apply_env_overrides(config: &mut CatalogConfig) {
    apply_overrides(
        config,
        env::var("MUSIC_ROOT").ok(),
        env::var("CATALOG_PATH").ok(),
    );
}

fn apply_overrides(
    config: &mut CatalogConfig,
    music_root: Option<String>,
    catalog_path: Option<String>,
) {
    if let Some(value) = music_root.filter(|value| !value.trim().is_empty()) {
        config.music_root = value;
    }
    if let Some(value) = catalog_path.filter(|value| !value.trim().is_empty()) {
        config.catalog_path = value;
    }
}

/// Relative paths in the config are taken relative to the config file.
pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value.trim());
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
