use anyhow::{Context, Result};
use serde_json::json;

use crate::agent_http::AgentsClient;
use crate::backends::NotesPlanner;
use crate::config::RemoteConfig;

const PLANNER_INSTRUCTIONS: &str = "Eres un asistente que convierte observaciones sobre una \
fotografía tipo documento en instrucciones de edición concretas. Responde con una sola línea \
de instrucciones imperativas separadas por punto y coma, sin explicaciones ni preámbulos. \
Cada instrucción debe ser aplicable por un editor de imágenes y preservar la identidad de la \
persona.";

/// Text-only planner run: an ephemeral agent turns evaluator notes into an
/// edit instruction line. Any failure is reported, not patched over; the
/// caller decides whether to fall back to rule derivation.
#[derive(Debug, Clone)]
pub struct NotesPlannerHttp {
    endpoint: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    api_version: Option<String>,
}

impl NotesPlannerHttp {
    pub fn from_config(config: &RemoteConfig, endpoint_override: Option<&str>) -> Self {
        Self {
            endpoint: config.endpoint_for(endpoint_override),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        }
    }
}

impl NotesPlanner for NotesPlannerHttp {
    fn plan_from_notes(&self, image_name: &str, notes: &str) -> Result<Option<String>> {
        let endpoint = self
            .endpoint
            .clone()
            .context("planner endpoint is not configured")?;
        let model = self
            .model
            .clone()
            .context("planner model is not configured")?;
        let client = AgentsClient::new(endpoint, self.api_key.clone(), self.api_version.clone());

        let agent_id = client.create_agent(&model, "edit-planner", PLANNER_INSTRUCTIONS)?;
        let outcome = run_planner(&client, &agent_id, image_name, notes);
        client.delete_agent(&agent_id);
        outcome
    }
}

fn run_planner(
    client: &AgentsClient,
    agent_id: &str,
    image_name: &str,
    notes: &str,
) -> Result<Option<String>> {
    let thread_id = client.create_thread()?;
    client.post_user_message(
        &thread_id,
        json!(format!(
            "Imagen: {image_name}\nObservaciones del evaluador: {notes}\n\
             Escribe las instrucciones de edición."
        )),
    )?;
    client.run_to_completion(&thread_id, agent_id)?;
    let text = client
        .latest_agent_text(&thread_id)?
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty());
    Ok(text)
}
