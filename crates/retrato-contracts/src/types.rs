use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Output sizes accepted by the remote image-edit model. Anything else is a
/// caller-side validation error, never a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSize {
    Square256,
    Square512,
    #[default]
    Square1024,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Square256 => "256x256",
            OutputSize::Square512 => "512x512",
            OutputSize::Square1024 => "1024x1024",
        }
    }
}

impl fmt::Display for OutputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "256x256" => Ok(OutputSize::Square256),
            "512x512" => Ok(OutputSize::Square512),
            "1024x1024" => Ok(OutputSize::Square1024),
            other => Err(format!(
                "size must be one of 256x256, 512x512 or 1024x1024 (got '{other}')"
            )),
        }
    }
}

/// Input for one evaluation call. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub image_path: PathBuf,
    pub prompt: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl EvaluationRequest {
    pub fn new(image_path: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            prompt: prompt.into(),
            model: None,
            endpoint: None,
        }
    }
}

/// Structured verdict extracted from the remote agent's reply.
///
/// `overall_score` is always within [0, 100] regardless of what the remote
/// model returned; `criteria_scores` entries are always integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub overall_score: i64,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, i64>,
    pub safe: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
}

/// Outcome of one evaluation call. Callers never see a raised error, only
/// this value: exactly one of result or error is present.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResponse {
    Success(EvaluationResult),
    Failure { error: String },
}

impl EvaluationResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        EvaluationResponse::Failure {
            error: error.into(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, EvaluationResponse::Success(_))
    }

    pub fn result(&self) -> Option<&EvaluationResult> {
        match self {
            EvaluationResponse::Success(result) => Some(result),
            EvaluationResponse::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            EvaluationResponse::Success(_) => None,
            EvaluationResponse::Failure { error } => Some(error.as_str()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            EvaluationResponse::Success(result) => json!({
                "success": true,
                "result": result,
            }),
            EvaluationResponse::Failure { error } => json!({
                "success": false,
                "error": error,
            }),
        }
    }
}

/// Input for one improvement call. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ImprovementJob {
    pub image_path: PathBuf,
    pub notes: Option<String>,
    pub criteria_scores: BTreeMap<String, i64>,
    pub prompt_override: Option<String>,
    pub size: OutputSize,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
}

impl ImprovementJob {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            notes: None,
            criteria_scores: BTreeMap::new(),
            prompt_override: None,
            size: OutputSize::default(),
            endpoint: None,
            api_version: None,
        }
    }
}

/// Successful improvement output. `applied_fixes` is never empty when the
/// prompt was derived automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct ImprovementResult {
    pub filename: String,
    pub content_type: String,
    pub image_bytes: Vec<u8>,
    pub prompt: String,
    pub applied_fixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImprovementResponse {
    Success(ImprovementResult),
    Failure {
        error: String,
        details: Option<Value>,
    },
}

impl ImprovementResponse {
    pub fn failure(error: impl Into<String>, details: Option<Value>) -> Self {
        ImprovementResponse::Failure {
            error: error.into(),
            details,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ImprovementResponse::Success(_))
    }

    pub fn result(&self) -> Option<&ImprovementResult> {
        match self {
            ImprovementResponse::Success(result) => Some(result),
            ImprovementResponse::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ImprovementResponse::Success(_) => None,
            ImprovementResponse::Failure { error, .. } => Some(error.as_str()),
        }
    }
}
