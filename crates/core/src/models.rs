use serde::{Deserialize, Serialize};

use crate::error::CheckError;

pub const TEMPERATURE_MIN: f64 = 0.01;
pub const TEMPERATURE_MAX: f64 = 5.0;
pub const TOP_P_MIN: f64 = 0.01;
pub const TOP_P_MAX: f64 = 1.0;
pub const MAX_LENGTH_MIN: u32 = 32;
pub const MAX_LENGTH_MAX: u32 = 512;
pub const REPETITION_PENALTY: f64 = 1.0;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MAX_LENGTH: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMethod {
    #[default]
    Upload,
    Paste,
}

impl InputMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "upload" | "upload a document" | "file" => Some(Self::Upload),
            "paste" | "paste in text" | "text" => Some(Self::Paste),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Upload => "Upload a document",
            Self::Paste => "Paste in text",
        }
    }
}

/// One document handed in for checking. Created per check and dropped
/// once the response stream is drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSubmission {
    pub text: String,
    pub input_method: InputMethod,
    pub file_name: Option<String>,
}

impl PlanSubmission {
    pub fn pasted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_method: InputMethod::Paste,
            file_name: None,
        }
    }

    /// Uploaded bytes are forwarded without parsing; invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn uploaded(file_name: Option<String>, bytes: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
            input_method: InputMethod::Upload,
            file_name,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelChoice {
    #[default]
    #[serde(rename = "Llama2-7B")]
    Llama2_7B,
    #[serde(rename = "Llama2-13B")]
    Llama2_13B,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 2] = [Self::Llama2_7B, Self::Llama2_13B];

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|model| {
            model.label().eq_ignore_ascii_case(value) || model.identifier() == value
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Llama2_7B => "Llama2-7B",
            Self::Llama2_13B => "Llama2-13B",
        }
    }

    /// Full `owner/name:version` identifier of the hosted model.
    pub fn identifier(self) -> &'static str {
        match self {
            Self::Llama2_7B => "a16z-infra/llama7b-v2-chat:4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea",
            Self::Llama2_13B => "a16z-infra/llama13b-v2-chat:df7690f1994d94e96ad9d568eac121aecf50684a0b0963b25a41cc40061269e5",
        }
    }

    pub fn version(self) -> &'static str {
        self.identifier()
            .split_once(':')
            .map(|(_, version)| version)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub model: ModelChoice,
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: u32,
    pub repetition_penalty: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            model: ModelChoice::default(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_length: DEFAULT_MAX_LENGTH,
            repetition_penalty: REPETITION_PENALTY,
        }
    }
}

impl SamplingConfig {
    pub fn new(
        model: ModelChoice,
        temperature: f64,
        top_p: f64,
        max_length: u32,
    ) -> Result<Self, CheckError> {
        if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature) {
            return Err(CheckError::InvalidParameter {
                name: "temperature",
                message: format!("must be between {TEMPERATURE_MIN} and {TEMPERATURE_MAX}"),
            });
        }
        if !(TOP_P_MIN..=TOP_P_MAX).contains(&top_p) {
            return Err(CheckError::InvalidParameter {
                name: "top_p",
                message: format!("must be between {TOP_P_MIN} and {TOP_P_MAX}"),
            });
        }
        if !(MAX_LENGTH_MIN..=MAX_LENGTH_MAX).contains(&max_length) {
            return Err(CheckError::InvalidParameter {
                name: "max_length",
                message: format!("must be between {MAX_LENGTH_MIN} and {MAX_LENGTH_MAX}"),
            });
        }

        Ok(Self {
            model,
            temperature,
            top_p,
            max_length,
            repetition_penalty: REPETITION_PENALTY,
        })
    }

    /// Fills unset values from the defaults, then checks bounds.
    pub fn from_optional(
        model: Option<ModelChoice>,
        temperature: Option<f64>,
        top_p: Option<f64>,
        max_length: Option<u32>,
    ) -> Result<Self, CheckError> {
        let defaults = Self::default();
        Self::new(
            model.unwrap_or(defaults.model),
            temperature.unwrap_or(defaults.temperature),
            top_p.unwrap_or(defaults.top_p),
            max_length.unwrap_or(defaults.max_length),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceInput {
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: u32,
    pub repetition_penalty: f64,
}

/// Payload sent to the inference endpoint for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub input: InferenceInput,
}

impl InferenceRequest {
    pub fn new(prompt: String, config: &SamplingConfig) -> Self {
        Self {
            model: config.model.identifier().to_string(),
            input: InferenceInput {
                prompt,
                temperature: config.temperature,
                top_p: config.top_p,
                max_length: config.max_length,
                repetition_penalty: config.repetition_penalty,
            },
        }
    }
}
