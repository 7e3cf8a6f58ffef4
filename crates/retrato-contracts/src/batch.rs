use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One per-image row of `evaluations.json`, the durable interchange file
/// between the offline evaluation stage and the improvement stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub filename: String,
    pub success: bool,
    #[serde(default)]
    pub overall_score: Option<i64>,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, i64>,
    #[serde(default)]
    pub safe: Option<bool>,
    #[serde(default)]
    pub notes: String,
}

/// One per-image row of `improvements_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementRecord {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_fixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn write_evaluations(path: &Path, records: &[EvaluationRecord]) -> anyhow::Result<()> {
    write_pretty_json(path, records)
}

/// Loads an evaluations file leniently: a missing file or a payload that is
/// not an array of records yields an empty list rather than an error, so a
/// partial batch never blocks the improvement stage.
pub fn load_evaluations(path: &Path) -> Vec<EvaluationRecord> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

pub fn write_improvements(path: &Path, records: &[ImprovementRecord]) -> anyhow::Result<()> {
    write_pretty_json(path, records)
}

fn write_pretty_json<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(records)?)?;
    Ok(())
}
