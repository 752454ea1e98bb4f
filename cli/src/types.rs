use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::WorkflowError;

pub const MIN_BATCH_SIZE: u8 = 1;
pub const MAX_BATCH_SIZE: u8 = 4;
pub const RANDOM_SEED: i64 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    #[serde(rename = "text2music")]
    TextToMusic,
    Cover,
    Repaint,
    Extract,
    Lego,
    Complete,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        Self::TextToMusic,
        Self::Cover,
        Self::Repaint,
        Self::Extract,
        Self::Lego,
        Self::Complete,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::TextToMusic => "text2music",
            Self::Cover => "cover",
            Self::Repaint => "repaint",
            Self::Extract => "extract",
            Self::Lego => "lego",
            Self::Complete => "complete",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|task| *task == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// Parameters of one generation job, serialized as the `/release_task` body.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub lyrics: String,
    pub model: String,
    pub duration: f32,
    pub batch_size: u8,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: i64,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub thinking: Option<bool>,
    #[serde(default)]
    pub lm_temperature: Option<f32>,
    #[serde(default)]
    pub lm_cfg_scale: Option<f32>,
    #[serde(default)]
    pub lora: Option<String>,
}

impl GenerationRequest {
    pub fn use_random_seed(&self) -> bool {
        self.seed == RANDOM_SEED
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(WorkflowError::InvalidRequest(format!(
                "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(WorkflowError::InvalidRequest(format!(
                "duration must be a positive number of seconds, got {}",
                self.duration
            )));
        }
        if self.inference_steps == 0 {
            return Err(WorkflowError::InvalidRequest(
                "inference steps must be positive".to_string(),
            ));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(WorkflowError::InvalidRequest(format!(
                "guidance scale must be positive, got {}",
                self.guidance_scale
            )));
        }
        if self.seed < RANDOM_SEED {
            return Err(WorkflowError::InvalidRequest(format!(
                "seed must be -1 (random) or non-negative, got {}",
                self.seed
            )));
        }
        Ok(())
    }
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            lyrics: String::new(),
            model: String::new(),
            duration: 10.0,
            batch_size: 2,
            inference_steps: 50,
            guidance_scale: 7.0,
            seed: RANDOM_SEED,
            task_type: TaskType::TextToMusic,
            thinking: None,
            lm_temperature: None,
            lm_cfg_scale: None,
            lora: None,
        }
    }
}

// `use_random_seed` is derived from `seed`, so the wire shape is written by hand.
impl Serialize for GenerationRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            prompt: &'a str,
            lyrics: &'a str,
            model: &'a str,
            duration: f32,
            batch_size: u8,
            inference_steps: u32,
            guidance_scale: f32,
            seed: i64,
            task_type: TaskType,
            use_random_seed: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            thinking: Option<bool>,
            #[serde(skip_serializing_if = "Option::is_none")]
            lm_temperature: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            lm_cfg_scale: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            lora: Option<&'a str>,
        }

        Wire {
            prompt: &self.prompt,
            lyrics: &self.lyrics,
            model: &self.model,
            duration: self.duration,
            batch_size: self.batch_size,
            inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
            task_type: self.task_type,
            use_random_seed: self.use_random_seed(),
            thinking: self.thinking,
            lm_temperature: self.lm_temperature,
            lm_cfg_scale: self.lm_cfg_scale,
            lora: self.lora.as_deref(),
        }
        .serialize(serializer)
    }
}

/// Opaque task identifier handed out by `/release_task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    /// Raw `result` string; a JSON-encoded array of tracks.
    Succeeded(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTrack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl GeneratedTrack {
    pub fn location(&self) -> Option<&str> {
        self.audio_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackMeta {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One entry of the history library.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LibraryTrack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds", skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub meta: TrackMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl LibraryTrack {
    pub fn location(&self) -> Option<&str> {
        self.audio_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.caption
            .as_deref()
            .filter(|caption| !caption.trim().is_empty())
            .or(self.filename.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn display_date(&self) -> Option<&str> {
        self.date.as_deref().and_then(|date| date.split(' ').next()).filter(|d| !d.is_empty())
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().trim_end_matches('s').parse::<f64>().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RandomSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds", skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl RandomSample {
    pub fn text(&self) -> &str {
        self.description
            .as_deref()
            .filter(|text| !text.is_empty())
            .or(self.prompt.as_deref())
            .unwrap_or_default()
    }
}

/// Prompt/lyrics returned by `/format_input`; either may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormattedInput {
    #[serde(default, alias = "caption", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoraInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl LoraInfo {
    pub fn reference(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}
