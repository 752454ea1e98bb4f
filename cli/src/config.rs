use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::poller::{PollSettings, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::types::{GenerationRequest, MAX_BATCH_SIZE, MIN_BATCH_SIZE};

const CONFIG_FILE_NAME: &str = "config.toml";
const LOG_FILE_NAME: &str = "studio.log";
const ENV_CONFIG_PATH: &str = "STUDIO_CONFIG_PATH";
const ENV_SERVICE_URL: &str = "STUDIO_SERVICE_URL";
const ENV_DEFAULT_MODEL: &str = "STUDIO_DEFAULT_MODEL";
const ENV_DEFAULT_DURATION: &str = "STUDIO_DEFAULT_DURATION";
const ENV_POLL_INTERVAL_MS: &str = "STUDIO_POLL_INTERVAL_MS";
const ENV_MAX_POLL_ATTEMPTS: &str = "STUDIO_MAX_POLL_ATTEMPTS";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    service_url: Option<String>,
    default_model: Option<String>,
    default_duration_seconds: f32,
    default_batch_size: u8,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
    request_timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => Some(path),
            None => Self::default_config_path().ok(),
        };
        if let Some(path) = path {
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial)?;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn service_url(&self) -> Option<&str> {
        self.service_url.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings { interval: self.poll_interval, max_attempts: self.max_poll_attempts }
    }

    /// Starting values for the generator form.
    pub fn initial_request(&self) -> GenerationRequest {
        GenerationRequest {
            model: self.default_model.clone().unwrap_or_default(),
            duration: self.default_duration_seconds,
            batch_size: self.default_batch_size,
            ..GenerationRequest::default()
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn log_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        let dir = dirs.data_local_dir();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(dir.join(LOG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) -> Result<()> {
        if let Some(url) = partial.service_url {
            self.service_url = Some(url);
        }
        if let Some(model) = partial.default_model {
            self.default_model = Some(model);
        }
        if let Some(duration) = partial.default_duration_seconds {
            self.default_duration_seconds = check_duration(duration)?;
        }
        if let Some(batch) = partial.default_batch_size {
            self.default_batch_size = check_batch(batch)?;
        }
        if let Some(ms) = partial.poll_interval_ms {
            self.poll_interval = check_interval(ms)?;
        }
        if let Some(attempts) = partial.max_poll_attempts {
            self.max_poll_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some(secs) = partial.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs.max(1));
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_SERVICE_URL) {
            if value.trim().is_empty() {
                self.service_url = None;
            } else {
                self.service_url = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_DEFAULT_MODEL) {
            if !value.trim().is_empty() {
                self.default_model = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_DEFAULT_DURATION) {
            if !value.trim().is_empty() {
                let parsed = value
                    .trim()
                    .parse::<f32>()
                    .context("STUDIO_DEFAULT_DURATION must be a number of seconds")?;
                self.default_duration_seconds = check_duration(parsed)?;
            }
        }
        if let Ok(value) = env::var(ENV_POLL_INTERVAL_MS) {
            if !value.trim().is_empty() {
                let parsed = value
                    .trim()
                    .parse::<u64>()
                    .context("STUDIO_POLL_INTERVAL_MS must be an integer")?;
                self.poll_interval = check_interval(parsed)?;
            }
        }
        if let Ok(value) = env::var(ENV_MAX_POLL_ATTEMPTS) {
            if !value.trim().is_empty() {
                let parsed = value
                    .trim()
                    .parse::<u32>()
                    .context("STUDIO_MAX_POLL_ATTEMPTS must be an integer (0 disables the cap)")?;
                self.max_poll_attempts = (parsed > 0).then_some(parsed);
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            default_model: None,
            default_duration_seconds: 10.0,
            default_batch_size: 2,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
            request_timeout: Duration::from_secs(60),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "Studio", "Studio")
        .ok_or_else(|| anyhow!("unable to determine config directory"))
}

fn check_duration(value: f32) -> Result<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(anyhow!("default duration must be positive, got {value}"))
    }
}

fn check_batch(value: u8) -> Result<u8> {
    if (MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&value) {
        Ok(value)
    } else {
        Err(anyhow!("default batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}"))
    }
}

fn check_interval(ms: u64) -> Result<Duration> {
    if ms == 0 {
        return Err(anyhow!("poll interval must be at least 1 ms"));
    }
    Ok(Duration::from_millis(ms))
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_partial(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_partial(contents: &str) -> Result<PartialConfig> {
    Ok(toml::from_str(contents)?)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    service_url: Option<String>,
    default_model: Option<String>,
    default_duration_seconds: Option<f32>,
    default_batch_size: Option<u8>,
    poll_interval_ms: Option<u64>,
    max_poll_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
}
