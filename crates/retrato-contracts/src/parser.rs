use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::EvaluationResult;

/// Failure modes of the evaluation stage that map to an unsuccessful
/// response. Structural failure (the reply cannot be parsed at all) is
/// fatal to the request; content failure (one bad field) is recovered by
/// clamping or dropping and never reaches this enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("agent response was not valid JSON")]
    InvalidResponseFormat,
    #[error("agent did not return any text message (run status: {run_status})")]
    NoResponse { run_status: String },
}

/// Parses the raw text returned by the evaluation agent into a structured
/// verdict.
///
/// The remote output is untrusted, so extraction is total: decode failure
/// is the only fatal outcome, every field failure degrades to a default.
/// `overall_score` is clamped to [0, 100]; criteria entries that cannot be
/// coerced to an integer are dropped individually; `notes` falls back to
/// the `explanation` alias before defaulting to empty.
pub fn parse_agent_verdict(raw_text: &str) -> Result<EvaluationResult, EvaluationError> {
    let trimmed = raw_text.trim();
    let parsed: Value =
        serde_json::from_str(trimmed).map_err(|_| EvaluationError::InvalidResponseFormat)?;
    let Some(object) = parsed.as_object() else {
        return Err(EvaluationError::InvalidResponseFormat);
    };

    let overall_score = coerce_int(object.get("overall_score"))
        .unwrap_or(0)
        .clamp(0, 100);

    let criteria_scores: BTreeMap<String, i64> = object
        .get("criteria_scores")
        .and_then(Value::as_object)
        .map(|scores| {
            scores
                .iter()
                .filter_map(|(key, value)| coerce_int(Some(value)).map(|n| (key.clone(), n)))
                .collect()
        })
        .unwrap_or_default();

    let safe = object.get("safe").and_then(Value::as_bool).unwrap_or(false);

    let notes = non_empty_str(object.get("notes"))
        .or_else(|| non_empty_str(object.get("explanation")))
        .unwrap_or_default();

    let mut raw = Map::new();
    raw.insert(
        "agent_text".to_string(),
        Value::String(trimmed.to_string()),
    );
    raw.insert("parsed".to_string(), parsed.clone());

    Ok(EvaluationResult {
        overall_score,
        criteria_scores,
        safe,
        notes,
        raw,
        agent_id: None,
        thread_id: None,
        run_status: None,
    })
}

fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|float| float as i64))
        }
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
