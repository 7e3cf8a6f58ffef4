use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde_json::{json, Value};

use crate::backends::{AgentReply, EvaluatorBackend};
use crate::config::RemoteConfig;
use crate::http::{mime_for_name, response_json_or_error, with_api_version};

const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin client for an OpenAI-compatible agents/threads surface. Shared by
/// the evaluator and the notes planner; Azure-style deployments are reached
/// through the optional `api-version` query parameter.
#[derive(Debug, Clone)]
pub(crate) struct AgentsClient {
    http: HttpClient,
    base: String,
    api_key: Option<String>,
    api_version: Option<String>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl AgentsClient {
    pub(crate) fn new(base: String, api_key: Option<String>, api_version: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base,
            api_key,
            api_version,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    fn url(&self, path: &str) -> String {
        with_api_version(
            format!("{}/{}", self.base, path.trim_start_matches('/')),
            self.api_version.as_deref(),
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .authorized(self.http.post(&url))
            .json(payload)
            .send()
            .with_context(|| format!("agents request failed ({url})"))?;
        response_json_or_error("agents", response)
    }

    fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .with_context(|| format!("agents request failed ({url})"))?;
        response_json_or_error("agents", response)
    }

    pub(crate) fn upload_file(&self, image_name: &str, bytes: &[u8]) -> Result<String> {
        let part = MultipartPart::bytes(bytes.to_vec())
            .file_name(image_name.to_string())
            .mime_str(mime_for_name(image_name))
            .with_context(|| format!("invalid mime for {image_name}"))?;
        let form = MultipartForm::new()
            .text("purpose", "assistants")
            .part("file", part);

        let url = self.url("files");
        let response = self
            .authorized(self.http.post(&url))
            .multipart(form)
            .send()
            .context("agents file upload failed")?;
        let payload = response_json_or_error("agents file upload", response)?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("agents file upload response had no id")
    }

    pub(crate) fn create_agent(&self, model: &str, name: &str, instructions: &str) -> Result<String> {
        let payload = self.post_json(
            "assistants",
            &json!({
                "model": model,
                "name": name,
                "instructions": instructions,
            }),
        )?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("assistant create response had no id")
    }

    pub(crate) fn delete_agent(&self, agent_id: &str) {
        // Best-effort: a leftover ephemeral agent must not mask the result.
        let url = self.url(&format!("assistants/{agent_id}"));
        let _ = self.authorized(self.http.delete(&url)).send();
    }

    pub(crate) fn create_thread(&self) -> Result<String> {
        let payload = self.post_json("threads", &json!({}))?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("thread create response had no id")
    }

    pub(crate) fn post_user_message(&self, thread_id: &str, content: Value) -> Result<()> {
        self.post_json(
            &format!("threads/{thread_id}/messages"),
            &json!({
                "role": "user",
                "content": content,
            }),
        )?;
        Ok(())
    }

    /// Starts a run and polls it to a terminal status, returning the last
    /// known status string.
    pub(crate) fn run_to_completion(&self, thread_id: &str, agent_id: &str) -> Result<String> {
        let run = self.post_json(
            &format!("threads/{thread_id}/runs"),
            &json!({ "assistant_id": agent_id }),
        )?;
        let run_id = run
            .get("id")
            .and_then(Value::as_str)
            .context("run create response had no id")?
            .to_string();

        let started = Instant::now();
        let mut status = run
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("queued")
            .to_string();
        while !is_terminal_status(&status) {
            if started.elapsed() > self.poll_timeout {
                bail!("agents run polling timed out (last status: {status})");
            }
            thread::sleep(self.poll_interval);
            let payload = self.get_json(&format!("threads/{thread_id}/runs/{run_id}"))?;
            status = payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
        }
        Ok(status)
    }

    pub(crate) fn latest_agent_text(&self, thread_id: &str) -> Result<Option<String>> {
        let payload = self.get_json(&format!("threads/{thread_id}/messages"))?;
        Ok(extract_assistant_text(&payload))
    }
}

/// Deletes an uploaded remote file when dropped, so release happens on
/// every exit path of a run, including early error returns.
pub(crate) struct RemoteFileGuard<'a> {
    client: &'a AgentsClient,
    file_id: String,
}

impl<'a> RemoteFileGuard<'a> {
    pub(crate) fn new(client: &'a AgentsClient, file_id: String) -> Self {
        Self { client, file_id }
    }
}

impl Drop for RemoteFileGuard<'_> {
    fn drop(&mut self) {
        // Cleanup failures are swallowed; they must not mask the result.
        let url = self.client.url(&format!("files/{}", self.file_id));
        let _ = self
            .client
            .authorized(self.client.http.delete(&url))
            .send();
    }
}

fn is_terminal_status(status: &str) -> bool {
    !matches!(status, "queued" | "in_progress" | "cancelling")
}

/// Scans a message listing (newest first) for the first message whose role
/// is exactly `assistant` and returns its first text block. Any other role
/// value is ignored rather than guessed at.
fn extract_assistant_text(messages: &Value) -> Option<String> {
    let rows = messages.get("data").and_then(Value::as_array)?;
    for row in rows {
        if row.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(blocks) = row.get("content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            if let Some(text) = block
                .pointer("/text/value")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
            {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// Evaluator adapter over the agents surface: upload the image, run an
/// agent primed with the rubric instructions against it, and hand back the
/// agent's final message.
#[derive(Debug, Clone)]
pub struct AgentHttpEvaluator {
    endpoint: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    api_version: Option<String>,
    agent_id: Option<String>,
}

impl AgentHttpEvaluator {
    pub fn from_config(
        config: &RemoteConfig,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
    ) -> Self {
        Self {
            endpoint: config.endpoint_for(endpoint_override),
            model: config.model_for(model_override),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            agent_id: config.agent_id.clone(),
        }
    }
}

impl EvaluatorBackend for AgentHttpEvaluator {
    fn submit_for_evaluation(
        &self,
        image: &[u8],
        image_name: &str,
        prompt: &str,
        rubric_instructions: &str,
    ) -> Result<AgentReply> {
        let endpoint = self
            .endpoint
            .clone()
            .context("evaluation endpoint is not configured")?;
        let model = self
            .model
            .clone()
            .context("evaluation model is not configured")?;
        let client = AgentsClient::new(endpoint, self.api_key.clone(), self.api_version.clone());

        let file_id = client.upload_file(image_name, image)?;
        let _file_guard = RemoteFileGuard::new(&client, file_id.clone());

        let agent_id = match &self.agent_id {
            Some(existing) => existing.clone(),
            None => client.create_agent(&model, "image-evaluator", rubric_instructions)?,
        };

        let thread_id = client.create_thread()?;
        client.post_user_message(
            &thread_id,
            json!([
                { "type": "text", "text": prompt },
                { "type": "image_file", "image_file": { "file_id": file_id, "detail": "high" } },
            ]),
        )?;

        let run_status = client.run_to_completion(&thread_id, &agent_id)?;
        let text = client.latest_agent_text(&thread_id)?;

        Ok(AgentReply {
            text,
            agent_id: Some(agent_id),
            thread_id: Some(thread_id),
            run_status,
        })
    }
}
