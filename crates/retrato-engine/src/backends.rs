use anyhow::Result;
use retrato_contracts::types::ImprovementJob;

/// What the evaluation collaborator handed back for one run. `text` is the
/// agent's final message when one was produced; `run_status` is always the
/// last known status string, kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: Option<String>,
    pub agent_id: Option<String>,
    pub thread_id: Option<String>,
    pub run_status: String,
}

/// Remote vision agent that scores an image against rubric instructions and
/// returns its final textual message.
pub trait EvaluatorBackend {
    fn submit_for_evaluation(
        &self,
        image: &[u8],
        image_name: &str,
        prompt: &str,
        rubric_instructions: &str,
    ) -> Result<AgentReply>;
}

/// Remote image-edit model: takes the original pixels plus an edit
/// instruction and returns the edited image bytes. The job carries the
/// requested output size and the request-scoped endpoint/api-version
/// overrides the adapter must honor.
pub trait ImageEditBackend {
    fn submit_for_edit(
        &self,
        job: &ImprovementJob,
        image: &[u8],
        image_name: &str,
        instruction: &str,
    ) -> Result<Vec<u8>>;
}

/// Optional collaborator that turns evaluation notes into a short
/// imperative edit instruction. Best-effort: callers treat any error as
/// absence and fall back to local fix derivation.
pub trait NotesPlanner {
    fn plan_from_notes(&self, image_name: &str, notes: &str) -> Result<Option<String>>;
}
