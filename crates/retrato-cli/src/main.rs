use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use retrato_contracts::batch::{
    load_evaluations, write_evaluations, write_improvements, EvaluationRecord, ImprovementRecord,
};
use retrato_contracts::events::{EventLog, PipelineEvent};
use retrato_contracts::rubric::{builtin_rubric, Rubric};
use retrato_contracts::types::{EvaluationRequest, EvaluationResponse, ImprovementJob, OutputSize};
use retrato_engine::normalize::{normalize_file, EdgeMatteSegmenter, NormalizeOptions};
use retrato_engine::{
    evaluate, improve, AgentHttpEvaluator, ImageEditHttpBackend, NotesPlanner, NotesPlannerHttp,
    RemoteConfig,
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

const DEFAULT_PROMPT: &str =
    "Evalúa si esta fotografía cumple los requisitos de una foto tipo documento.";

#[derive(Debug, Parser)]
#[command(name = "retrato", version, about = "Document-photo evaluation and improvement pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score every image in a directory against a rubric.
    Evaluate(EvaluateArgs),
    /// Generate edited replacements for previously evaluated images.
    Improve(ImproveArgs),
    /// Normalize a single image without calling any remote service.
    Normalize(NormalizeArgs),
}

#[derive(Debug, Parser)]
struct EvaluateArgs {
    /// Directory holding the images to score.
    #[arg(long)]
    assets_dir: PathBuf,
    /// Where the per-image records are written. Defaults to
    /// evaluations.json inside the assets directory.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
    #[arg(long, default_value = "document-photo")]
    rubric: String,
    /// Optional JSONL event log.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
    /// Skip the background-removal pass during normalization.
    #[arg(long)]
    keep_background: bool,
    /// Print one JSON response envelope per image instead of text lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ImproveArgs {
    /// Records produced by the evaluate subcommand. Defaults to
    /// evaluations.json inside the assets directory.
    #[arg(long)]
    evaluations: Option<PathBuf>,
    /// Directory holding the original images.
    #[arg(long)]
    assets_dir: PathBuf,
    /// Directory the edited images are written to. Defaults to
    /// improved/ inside the assets directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Write improvements_summary.json next to the evaluations file.
    #[arg(long)]
    summary: bool,
    #[arg(long, default_value = "document-photo")]
    rubric: String,
    /// Only records scoring below this are improved.
    #[arg(long, default_value_t = 100)]
    min_score: i64,
    #[arg(long, default_value = "1024x1024")]
    size: String,
    /// Let a remote planner turn evaluator notes into the edit prompt.
    #[arg(long)]
    use_planner: bool,
    /// Optional JSONL event log.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    api_version: Option<String>,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Skip the background-removal pass.
    #[arg(long)]
    keep_background: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Evaluate(args) => cmd_evaluate(args),
        Command::Improve(args) => cmd_improve(args),
        Command::Normalize(args) => cmd_normalize(args),
    }
}

fn resolve_rubric(name: &str) -> Result<&'static Rubric> {
    builtin_rubric(name).with_context(|| format!("unknown rubric '{name}'"))
}

fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read assets directory {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    let lowered = ext.to_ascii_lowercase();
                    IMAGE_EXTENSIONS.contains(&lowered.as_str())
                })
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn open_event_log(path: Option<PathBuf>) -> Result<Option<EventLog>> {
    path.map(|path| EventLog::create(path, Uuid::new_v4().to_string()))
        .transpose()
}

/// The per-image JSON line for `--json` output: the response envelope
/// (exactly one of `result` or `error`) plus the filename it belongs to.
fn evaluation_json_line(filename: &str, response: &EvaluationResponse) -> Value {
    let mut line = response.to_json();
    if let Some(fields) = line.as_object_mut() {
        fields.insert("filename".to_string(), Value::String(filename.to_string()));
    }
    line
}

fn cmd_evaluate(args: EvaluateArgs) -> Result<i32> {
    let mut config = RemoteConfig::from_env();
    if args.keep_background {
        config.disable_background_removal = true;
    }
    let rubric = resolve_rubric(&args.rubric)?;
    let images = collect_images(&args.assets_dir)?;
    if images.is_empty() {
        bail!("no images found under {}", args.assets_dir.display());
    }

    let backend =
        AgentHttpEvaluator::from_config(&config, args.endpoint.as_deref(), args.model.as_deref());
    let events = open_event_log(args.events)?;
    if let Some(events) = &events {
        events.emit(&PipelineEvent::EvaluationStarted {
            assets_dir: args.assets_dir.display().to_string(),
            images: images.len(),
            rubric: rubric.name.to_string(),
        })?;
    }

    let mut records = Vec::with_capacity(images.len());
    let mut failures = 0usize;
    for path in &images {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut request = EvaluationRequest::new(path, &args.prompt);
        request.model = args.model.clone();
        request.endpoint = args.endpoint.clone();

        let response = evaluate(&config, rubric, &backend, &request);
        if args.json {
            println!("{}", evaluation_json_line(&filename, &response));
        }
        let record = match response.result() {
            Some(result) => {
                if !args.json {
                    println!(
                        "{filename}: {} ({})",
                        result.overall_score,
                        if result.safe { "safe" } else { "unsafe" }
                    );
                }
                EvaluationRecord {
                    filename: filename.clone(),
                    success: true,
                    overall_score: Some(result.overall_score),
                    criteria_scores: result.criteria_scores.clone(),
                    safe: Some(result.safe),
                    notes: result.notes.clone(),
                }
            }
            None => {
                let error = response.error().unwrap_or("unknown error");
                if !args.json {
                    eprintln!("{filename}: evaluation failed: {error}");
                }
                failures += 1;
                EvaluationRecord {
                    filename: filename.clone(),
                    success: false,
                    overall_score: None,
                    criteria_scores: Default::default(),
                    safe: None,
                    notes: error.to_string(),
                }
            }
        };

        if let Some(events) = &events {
            events.emit(&PipelineEvent::EvaluationFinished {
                filename: filename.clone(),
                success: record.success,
                overall_score: record.overall_score,
            })?;
        }
        records.push(record);
    }

    let out = args
        .out
        .unwrap_or_else(|| args.assets_dir.join("evaluations.json"));
    write_evaluations(&out, &records)?;
    println!("wrote {} records to {}", records.len(), out.display());
    Ok(if failures > 0 { 1 } else { 0 })
}

fn should_improve(record: &EvaluationRecord, min_score: i64) -> bool {
    record.success && record.overall_score.unwrap_or(0) < min_score
}

fn cmd_improve(args: ImproveArgs) -> Result<i32> {
    let config = RemoteConfig::from_env();
    let rubric = resolve_rubric(&args.rubric)?;
    let size: OutputSize = args.size.parse().map_err(anyhow::Error::msg)?;

    let evaluations = args
        .evaluations
        .unwrap_or_else(|| args.assets_dir.join("evaluations.json"));
    let records = load_evaluations(&evaluations);
    if records.is_empty() {
        bail!("no evaluation records found at {}", evaluations.display());
    }

    let editor = ImageEditHttpBackend::from_config(&config);
    let planner = args
        .use_planner
        .then(|| NotesPlannerHttp::from_config(&config, args.endpoint.as_deref()));
    let planner_ref = planner.as_ref().map(|p| p as &dyn NotesPlanner);
    let events = open_event_log(args.events)?;

    let out_dir = args
        .out_dir
        .unwrap_or_else(|| args.assets_dir.join("improved"));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut summary = Vec::with_capacity(records.len());
    let mut failures = 0usize;
    for record in &records {
        if !should_improve(record, args.min_score) {
            println!("{}: skipped", record.filename);
            continue;
        }

        let mut job = ImprovementJob::new(args.assets_dir.join(&record.filename));
        job.notes = Some(record.notes.clone()).filter(|notes| !notes.trim().is_empty());
        job.criteria_scores = record.criteria_scores.clone();
        job.size = size;
        job.endpoint = args.endpoint.clone();
        job.api_version = args.api_version.clone();

        let response = improve(&config, rubric, &editor, planner_ref, &job);
        let row = match response.result() {
            Some(result) => {
                let out_path = out_dir.join(&result.filename);
                fs::write(&out_path, &result.image_bytes)
                    .with_context(|| format!("failed to write {}", out_path.display()))?;
                println!("{}: wrote {}", record.filename, out_path.display());
                ImprovementRecord {
                    filename: record.filename.clone(),
                    output_path: Some(out_path.display().to_string()),
                    applied_fixes: result.applied_fixes.clone(),
                    error: None,
                }
            }
            None => {
                let error = response.error().unwrap_or("unknown error");
                eprintln!("{}: improvement failed: {error}", record.filename);
                failures += 1;
                ImprovementRecord {
                    filename: record.filename.clone(),
                    output_path: None,
                    applied_fixes: Vec::new(),
                    error: Some(error.to_string()),
                }
            }
        };

        if let Some(events) = &events {
            events.emit(&PipelineEvent::ImprovementFinished {
                filename: row.filename.clone(),
                success: row.error.is_none(),
                output_path: row.output_path.clone(),
            })?;
        }
        summary.push(row);
    }

    if args.summary {
        let path = evaluations
            .parent()
            .unwrap_or(Path::new("."))
            .join("improvements_summary.json");
        write_improvements(&path, &summary)?;
        println!("wrote summary to {}", path.display());
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn cmd_normalize(args: NormalizeArgs) -> Result<i32> {
    let config = RemoteConfig::from_env();
    let options = NormalizeOptions {
        remove_background: !args.keep_background && !config.disable_background_removal,
    };
    let segmenter = EdgeMatteSegmenter::default();
    let bytes = normalize_file(&args.input, &options, Some(&segmenter))
        .with_context(|| format!("failed to normalize {}", args.input.display()))?;
    if let Some(parent) = args.output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.output, &bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("wrote {}", args.output.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn collect_images_filters_and_sorts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.webp", "README"] {
            fs::write(dir.path().join(name), b"x")?;
        }
        let paths = collect_images(dir.path())?;
        let names: Vec<_> = paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
        Ok(())
    }

    #[test]
    fn should_improve_skips_failed_and_high_scoring_records() {
        let base = EvaluationRecord {
            filename: "a.png".to_string(),
            success: true,
            overall_score: Some(70),
            criteria_scores: BTreeMap::new(),
            safe: Some(true),
            notes: String::new(),
        };
        assert!(should_improve(&base, 100));
        assert!(!should_improve(&base, 70));

        let failed = EvaluationRecord {
            success: false,
            ..base.clone()
        };
        assert!(!should_improve(&failed, 100));

        let unscored = EvaluationRecord {
            overall_score: None,
            ..base
        };
        assert!(should_improve(&unscored, 100));
    }

    #[test]
    fn json_lines_carry_the_envelope_plus_filename() {
        let line = evaluation_json_line("a.png", &EvaluationResponse::failure("boom"));
        assert_eq!(line["filename"], serde_json::json!("a.png"));
        assert_eq!(line["success"], serde_json::json!(false));
        assert_eq!(line["error"], serde_json::json!("boom"));
        assert!(line.get("result").is_none());
    }
}
