use std::fs;
use std::path::Path;

use serde_json::json;

use retrato_contracts::fixes::{derive_fixes, split_fix_candidates};
use retrato_contracts::parser::{parse_agent_verdict, EvaluationError};
use retrato_contracts::rubric::Rubric;
use retrato_contracts::types::{
    EvaluationRequest, EvaluationResponse, ImprovementJob, ImprovementResponse, ImprovementResult,
};

use crate::backends::{EvaluatorBackend, ImageEditBackend, NotesPlanner};
use crate::config::RemoteConfig;
use crate::http::mime_for_name;
use crate::normalize::{normalize_file, EdgeMatteSegmenter, NormalizeError, NormalizeOptions};

fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string())
}

/// Runs one image through normalization and the remote evaluator against
/// the given rubric. Never returns an error: every failure mode is folded
/// into [`EvaluationResponse::Failure`].
///
/// A missing input image is a hard failure. Any other normalization
/// problem degrades to submitting the original bytes, since a verdict on
/// an unnormalized photo beats no verdict at all.
pub fn evaluate(
    config: &RemoteConfig,
    rubric: &Rubric,
    backend: &dyn EvaluatorBackend,
    request: &EvaluationRequest,
) -> EvaluationResponse {
    if config.endpoint_for(request.endpoint.as_deref()).is_none() {
        return EvaluationResponse::failure(
            "evaluation endpoint is not configured; set RETRATO_ENDPOINT or pass one per request",
        );
    }
    if config.model_for(request.model.as_deref()).is_none() {
        return EvaluationResponse::failure(
            "evaluation model is not configured; set RETRATO_MODEL or pass one per request",
        );
    }

    let options = NormalizeOptions {
        remove_background: !config.disable_background_removal,
    };
    let segmenter = EdgeMatteSegmenter::default();
    let bytes = match normalize_file(&request.image_path, &options, Some(&segmenter)) {
        Ok(bytes) => bytes,
        Err(NormalizeError::NotFound(path)) => {
            return EvaluationResponse::failure(format!("image not found: {}", path.display()));
        }
        Err(_) => match fs::read(&request.image_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return EvaluationResponse::failure(format!(
                    "failed to read {}: {err}",
                    request.image_path.display()
                ));
            }
        },
    };

    let name = image_name(&request.image_path);
    let prompt = rubric.user_prompt(&request.prompt);
    let reply = match backend.submit_for_evaluation(
        &bytes,
        &name,
        &prompt,
        rubric.agent_instructions,
    ) {
        Ok(reply) => reply,
        Err(err) => return EvaluationResponse::failure(format!("evaluation failed: {err:#}")),
    };

    let text = reply
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let Some(text) = text else {
        let error = EvaluationError::NoResponse {
            run_status: reply.run_status,
        };
        return EvaluationResponse::failure(error.to_string());
    };

    match parse_agent_verdict(text) {
        Ok(mut result) => {
            result.agent_id = reply.agent_id;
            result.thread_id = reply.thread_id;
            result.run_status = Some(reply.run_status);
            EvaluationResponse::Success(result)
        }
        Err(err) => EvaluationResponse::failure(err.to_string()),
    }
}

/// Chooses the edit instruction for an improvement job.
///
/// An explicit `prompt_override` wins and is passed through verbatim. When
/// evaluator notes exist and a planner is available, the planner's line is
/// preferred; a planner error or empty plan falls back to local rule
/// derivation, so the returned fix list is never empty.
pub fn resolve_prompt(
    rubric: &Rubric,
    planner: Option<&dyn NotesPlanner>,
    image_name: &str,
    job: &ImprovementJob,
) -> (String, Vec<String>) {
    if let Some(prompt) = job
        .prompt_override
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
    {
        return (prompt.to_string(), split_fix_candidates(prompt));
    }

    let notes = job.notes.as_deref().map(str::trim).unwrap_or("");
    if !notes.is_empty() {
        if let Some(planner) = planner {
            if let Ok(Some(plan)) = planner.plan_from_notes(image_name, notes) {
                let candidates = split_fix_candidates(&plan);
                return (plan, candidates);
            }
        }
    }

    derive_fixes(rubric, &job.criteria_scores, notes)
}

/// Generates an edited replacement for one image. Never returns an error:
/// every failure mode is folded into [`ImprovementResponse::Failure`],
/// with `details` carrying machine-readable context.
pub fn improve(
    config: &RemoteConfig,
    rubric: &Rubric,
    editor: &dyn ImageEditBackend,
    planner: Option<&dyn NotesPlanner>,
    job: &ImprovementJob,
) -> ImprovementResponse {
    if !job.image_path.exists() {
        return ImprovementResponse::failure(
            "image not found",
            Some(json!({ "path": job.image_path.display().to_string() })),
        );
    }
    if config.endpoint_for(job.endpoint.as_deref()).is_none() {
        return ImprovementResponse::failure(
            "image edit endpoint is not configured; set RETRATO_ENDPOINT or pass one per job",
            None,
        );
    }
    if config.image_model.is_none() {
        return ImprovementResponse::failure(
            "image edit model is not configured; set RETRATO_IMAGE_MODEL",
            None,
        );
    }

    let name = image_name(&job.image_path);
    let (prompt, applied_fixes) = resolve_prompt(rubric, planner, &name, job);

    let bytes = match fs::read(&job.image_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return ImprovementResponse::failure(
                "failed to read image",
                Some(json!({
                    "path": job.image_path.display().to_string(),
                    "error": err.to_string(),
                })),
            );
        }
    };

    match editor.submit_for_edit(job, &bytes, &name, &prompt) {
        Ok(image_bytes) => {
            let stem = Path::new(&name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let filename = format!("improved_{stem}.png");
            let content_type = mime_for_name(&filename).to_string();
            ImprovementResponse::Success(ImprovementResult {
                filename,
                content_type,
                image_bytes,
                prompt,
                applied_fixes,
            })
        }
        Err(err) => ImprovementResponse::failure(
            format!("image edit failed: {err:#}"),
            Some(json!({ "prompt": prompt })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use anyhow::{bail, Result};
    use image::{Rgb, RgbImage};
    use retrato_contracts::rubric::builtin_rubric;

    use crate::backends::AgentReply;

    use super::*;

    fn rubric() -> &'static Rubric {
        builtin_rubric("document-photo").unwrap()
    }

    fn remote_config() -> RemoteConfig {
        RemoteConfig {
            endpoint: Some("https://example.invalid/v1".to_string()),
            model: Some("vision-1".to_string()),
            image_model: Some("image-edit-1".to_string()),
            ..RemoteConfig::default()
        }
    }

    fn write_test_photo(dir: &Path) -> PathBuf {
        let mut img = RgbImage::from_pixel(60, 80, Rgb([240, 240, 240]));
        img.put_pixel(30, 40, Rgb([10, 20, 30]));
        let path = dir.join("subject.png");
        img.save(&path).unwrap();
        path
    }

    struct ScriptedEvaluator {
        reply: AgentReply,
    }

    impl EvaluatorBackend for ScriptedEvaluator {
        fn submit_for_evaluation(
            &self,
            _image: &[u8],
            _image_name: &str,
            _prompt: &str,
            _rubric_instructions: &str,
        ) -> Result<AgentReply> {
            Ok(self.reply.clone())
        }
    }

    struct FailingEvaluator;

    impl EvaluatorBackend for FailingEvaluator {
        fn submit_for_evaluation(
            &self,
            _image: &[u8],
            _image_name: &str,
            _prompt: &str,
            _rubric_instructions: &str,
        ) -> Result<AgentReply> {
            bail!("connection refused")
        }
    }

    struct OkEditor;

    impl ImageEditBackend for OkEditor {
        fn submit_for_edit(
            &self,
            _job: &ImprovementJob,
            _image: &[u8],
            _image_name: &str,
            _instruction: &str,
        ) -> Result<Vec<u8>> {
            Ok(b"edited-png".to_vec())
        }
    }

    struct RecordingEditor {
        seen: std::cell::RefCell<Option<(Option<String>, Option<String>)>>,
    }

    impl ImageEditBackend for RecordingEditor {
        fn submit_for_edit(
            &self,
            job: &ImprovementJob,
            _image: &[u8],
            _image_name: &str,
            _instruction: &str,
        ) -> Result<Vec<u8>> {
            self.seen
                .replace(Some((job.endpoint.clone(), job.api_version.clone())));
            Ok(b"edited-png".to_vec())
        }
    }

    struct FailingEditor;

    impl ImageEditBackend for FailingEditor {
        fn submit_for_edit(
            &self,
            _job: &ImprovementJob,
            _image: &[u8],
            _image_name: &str,
            _instruction: &str,
        ) -> Result<Vec<u8>> {
            bail!("HTTP 503 from image edit")
        }
    }

    struct FailingPlanner;

    impl NotesPlanner for FailingPlanner {
        fn plan_from_notes(&self, _image_name: &str, _notes: &str) -> Result<Option<String>> {
            bail!("planner run failed")
        }
    }

    struct ScriptedPlanner(&'static str);

    impl NotesPlanner for ScriptedPlanner {
        fn plan_from_notes(&self, _image_name: &str, _notes: &str) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[test]
    fn evaluate_reports_missing_endpoint_as_failure() {
        let config = RemoteConfig::default();
        let request = EvaluationRequest::new("/tmp/nope.png", "Evalúa esta foto");
        let response = evaluate(&config, rubric(), &FailingEvaluator, &request);
        let error = response.error().unwrap();
        assert!(error.contains("endpoint"), "unexpected error: {error}");
    }

    #[test]
    fn evaluate_reports_missing_image_as_failure() {
        let request = EvaluationRequest::new("/definitely/not/here.png", "Evalúa esta foto");
        let response = evaluate(&remote_config(), rubric(), &FailingEvaluator, &request);
        let error = response.error().unwrap();
        assert!(error.contains("image not found"), "unexpected error: {error}");
    }

    #[test]
    fn evaluate_wraps_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let request = EvaluationRequest::new(path, "Evalúa esta foto");
        let response = evaluate(&remote_config(), rubric(), &FailingEvaluator, &request);
        let error = response.error().unwrap();
        assert!(error.contains("connection refused"), "unexpected error: {error}");
    }

    #[test]
    fn evaluate_maps_empty_reply_to_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let request = EvaluationRequest::new(path, "Evalúa esta foto");
        let backend = ScriptedEvaluator {
            reply: AgentReply {
                text: Some("   ".to_string()),
                run_status: "failed".to_string(),
                ..AgentReply::default()
            },
        };
        let response = evaluate(&remote_config(), rubric(), &backend, &request);
        let error = response.error().unwrap();
        assert!(error.contains("did not return any text message"));
        assert!(error.contains("failed"));
    }

    #[test]
    fn evaluate_fills_correlation_ids_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let request = EvaluationRequest::new(path, "Evalúa esta foto");
        let backend = ScriptedEvaluator {
            reply: AgentReply {
                text: Some(
                    r#"{"overall_score": 88, "criteria_scores": {"fondo_blanco": 20}, "safe": true, "notes": "fondo con sombras"}"#
                        .to_string(),
                ),
                agent_id: Some("agent-1".to_string()),
                thread_id: Some("thread-1".to_string()),
                run_status: "completed".to_string(),
            },
        };
        let response = evaluate(&remote_config(), rubric(), &backend, &request);
        let result = response.result().expect("expected success");
        assert_eq!(result.overall_score, 88);
        assert_eq!(result.criteria_scores.get("fondo_blanco"), Some(&20));
        assert!(result.safe);
        assert_eq!(result.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(result.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(result.run_status.as_deref(), Some("completed"));
    }

    #[test]
    fn evaluate_rejects_unparseable_reply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let request = EvaluationRequest::new(path, "Evalúa esta foto");
        let backend = ScriptedEvaluator {
            reply: AgentReply {
                text: Some("not json at all".to_string()),
                run_status: "completed".to_string(),
                ..AgentReply::default()
            },
        };
        let response = evaluate(&remote_config(), rubric(), &backend, &request);
        assert!(response.error().unwrap().contains("not valid JSON"));
    }

    #[test]
    fn prompt_override_is_used_verbatim() {
        let mut job = ImprovementJob::new("subject.png");
        job.prompt_override = Some("Recorta a 3:4; aclara el fondo".to_string());
        job.criteria_scores = BTreeMap::from([("fondo_blanco".to_string(), 0)]);
        let (prompt, fixes) = resolve_prompt(rubric(), Some(&FailingPlanner), "subject.png", &job);
        assert_eq!(prompt, "Recorta a 3:4; aclara el fondo");
        assert_eq!(fixes, vec!["Recorta a 3:4", "aclara el fondo"]);
    }

    #[test]
    fn planner_plan_wins_over_rule_derivation() {
        let mut job = ImprovementJob::new("subject.png");
        job.notes = Some("el fondo presenta sombras".to_string());
        let planner = ScriptedPlanner("Uniformiza el fondo; sube la exposición");
        let (prompt, fixes) = resolve_prompt(rubric(), Some(&planner), "subject.png", &job);
        assert_eq!(prompt, "Uniformiza el fondo; sube la exposición");
        assert_eq!(fixes.len(), 2);
    }

    #[test]
    fn planner_failure_falls_back_to_derivation() {
        let mut job = ImprovementJob::new("subject.png");
        job.notes = Some("el fondo no es blanco".to_string());
        let (prompt, fixes) = resolve_prompt(rubric(), Some(&FailingPlanner), "subject.png", &job);
        assert_eq!(fixes.len(), 1);
        assert!(prompt.contains("fondo a blanco puro"));
    }

    #[test]
    fn resolved_fixes_are_never_empty() {
        let job = ImprovementJob::new("subject.png");
        let (prompt, fixes) = resolve_prompt(rubric(), None, "subject.png", &job);
        assert_eq!(fixes, vec![rubric().generic_fix.to_string()]);
        assert!(prompt.contains(rubric().generic_fix));
    }

    #[test]
    fn improve_reports_missing_image_with_details() {
        let job = ImprovementJob::new("/definitely/not/here.png");
        let response = improve(&remote_config(), rubric(), &OkEditor, None, &job);
        assert_eq!(response.error(), Some("image not found"));
        match response {
            ImprovementResponse::Failure { details, .. } => {
                assert_eq!(
                    details.unwrap()["path"],
                    json!("/definitely/not/here.png")
                );
            }
            ImprovementResponse::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn improve_happy_path_names_output_and_keeps_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let mut job = ImprovementJob::new(&path);
        job.criteria_scores = BTreeMap::from([
            ("tamaño_3x4".to_string(), 25),
            ("fondo_blanco".to_string(), 10),
            ("mirada_frontal_rostro_homogeneo".to_string(), 20),
            ("sin_dientes_visibles".to_string(), 5),
            ("identificable_sin_obstrucciones".to_string(), 20),
        ]);
        let response = improve(&remote_config(), rubric(), &OkEditor, None, &job);
        let result = response.result().expect("expected success");
        assert_eq!(result.filename, "improved_subject.png");
        assert_eq!(result.content_type, "image/png");
        assert_eq!(result.image_bytes, b"edited-png");
        assert_eq!(result.applied_fixes.len(), 2);
        assert!(result.prompt.contains("fondo a blanco puro"));
    }

    #[test]
    fn improve_hands_job_scoped_overrides_to_the_editor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let mut job = ImprovementJob::new(&path);
        job.endpoint = Some("https://other.invalid/v1".to_string());
        job.api_version = Some("2025-04-01-preview".to_string());
        let editor = RecordingEditor {
            seen: std::cell::RefCell::new(None),
        };
        let response = improve(&remote_config(), rubric(), &editor, None, &job);
        assert!(response.success());
        let seen = editor.seen.borrow().clone().expect("editor was called");
        assert_eq!(seen.0.as_deref(), Some("https://other.invalid/v1"));
        assert_eq!(seen.1.as_deref(), Some("2025-04-01-preview"));
    }

    #[test]
    fn improve_wraps_editor_errors_with_prompt_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_photo(dir.path());
        let mut job = ImprovementJob::new(&path);
        job.prompt_override = Some("Aclara el fondo".to_string());
        let response = improve(&remote_config(), rubric(), &FailingEditor, None, &job);
        let error = response.error().unwrap();
        assert!(error.contains("image edit failed"));
        assert!(error.contains("HTTP 503"));
        match response {
            ImprovementResponse::Failure { details, .. } => {
                assert_eq!(details.unwrap()["prompt"], json!("Aclara el fondo"));
            }
            ImprovementResponse::Success(_) => panic!("expected failure"),
        }
    }
}
