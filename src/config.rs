use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::update::process::ManagedApp;

const APP_DIR: &str = "build-updater";

/// When the version record is written relative to the install.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordPolicy {
    /// Commit the new build id only once the archive has been extracted.
    #[default]
    AfterInstall,
    /// Mark the latest build id as seen right after the comparison, before
    /// anything is installed.
    BeforeInstall,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base of the build API, e.g. `https://dev.azure.com/<org>/<project>/_apis/build`
    pub server_url: String,
    pub api_version: String,
    pub artifact_name: String,

    pub process_name: String,
    pub launch_command: PathBuf,
    pub launch_args: Vec<String>,

    pub install_dir: PathBuf,
    /// Archive entries are extracted relative to this directory
    pub extract_root: PathBuf,
    /// Where downloaded archives are written (and left behind)
    pub download_dir: PathBuf,
    pub state_file: PathBuf,

    pub record_policy: RecordPolicy,

    /// No timeout unless set: a hung server hangs the agent
    pub request_timeout_secs: Option<u64>,

    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "https://dev.azure.com/allanmercou/sharey/_apis/build".to_string(),
            api_version: "4.1".to_string(),
            artifact_name: "sharey".to_string(),
            process_name: "ShareY".to_string(),
            launch_command: PathBuf::from("./sharey/ShareY/ShareY"),
            launch_args: Vec::new(),
            install_dir: PathBuf::from("./sharey"),
            extract_root: PathBuf::from("."),
            download_dir: PathBuf::from("."),
            state_file: default_state_file(),
            record_policy: RecordPolicy::default(),
            request_timeout_secs: None,
            show_progress: true,
        }
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("state.toml")
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path(),
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config {}", config_path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn managed_app(&self) -> ManagedApp {
        ManagedApp {
            name: self.process_name.clone(),
            command: self.launch_command.clone(),
            args: self.launch_args.clone(),
        }
    }
}
