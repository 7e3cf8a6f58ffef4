use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Milestones the batch pipeline reports while it runs. Each variant is one
/// JSONL line, self-describing via its snake_case `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    EvaluationStarted {
        assets_dir: String,
        images: usize,
        rubric: String,
    },
    EvaluationFinished {
        filename: String,
        success: bool,
        overall_score: Option<i64>,
    },
    ImprovementFinished {
        filename: String,
        success: bool,
        output_path: Option<String>,
    },
}

/// Append-only JSONL milestone log for one batch job. The file is opened
/// once at creation; every line carries the job id and an RFC3339
/// timestamp in addition to the event's own fields.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    job_id: String,
    file: Mutex<File>,
}

impl EventLog {
    pub fn create(path: impl Into<PathBuf>, job_id: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            job_id: job_id.into(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn emit(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_value(event)?;
        let fields = line
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("event did not serialize to an object"))?;
        fields.insert("job_id".to_string(), Value::String(self.job_id.clone()));
        fields.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        serde_json::to_writer(&mut *file, &line)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emits_one_tagged_object_per_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::create(&path, "job-7")?;

        log.emit(&PipelineEvent::EvaluationStarted {
            assets_dir: "fotos".to_string(),
            images: 3,
            rubric: "document-photo".to_string(),
        })?;
        log.emit(&PipelineEvent::EvaluationFinished {
            filename: "foto.jpg".to_string(),
            success: true,
            overall_score: Some(87),
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["type"], json!("evaluation_started"));
        assert_eq!(first["job_id"], json!("job-7"));
        assert_eq!(first["images"], json!(3));
        DateTime::parse_from_rfc3339(first["ts"].as_str().unwrap_or(""))?;

        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["type"], json!("evaluation_finished"));
        assert_eq!(second["overall_score"], json!(87));
        Ok(())
    }

    #[test]
    fn failed_improvement_event_keeps_null_output_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::create(&path, "job-7")?;

        log.emit(&PipelineEvent::ImprovementFinished {
            filename: "roto.png".to_string(),
            success: false,
            output_path: None,
        })?;

        let content = fs::read_to_string(&path)?;
        let line: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(line["type"], json!("improvement_finished"));
        assert_eq!(line["success"], json!(false));
        assert_eq!(line["output_path"], Value::Null);
        Ok(())
    }
}
