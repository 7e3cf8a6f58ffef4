use std::env;

/// Remote-service configuration, read once from the environment at process
/// start and passed by reference into the orchestrators. Request-level
/// overrides take precedence over every field here.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    /// Base URL of the agents/threads surface used for evaluation.
    pub endpoint: Option<String>,
    /// Deployment/model name for the evaluation agent.
    pub model: Option<String>,
    /// Deployment/model name for the image-edit model.
    pub image_model: Option<String>,
    pub api_key: Option<String>,
    /// Optional `api-version` query parameter for Azure-style endpoints.
    pub api_version: Option<String>,
    /// Reuse an existing agent instead of creating an ephemeral one.
    pub agent_id: Option<String>,
    pub disable_background_removal: bool,
}

impl RemoteConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: non_empty_env("RETRATO_ENDPOINT"),
            model: non_empty_env("RETRATO_MODEL"),
            image_model: non_empty_env("RETRATO_IMAGE_MODEL"),
            api_key: non_empty_env("RETRATO_API_KEY"),
            api_version: non_empty_env("RETRATO_API_VERSION"),
            agent_id: non_empty_env("RETRATO_AGENT_ID"),
            disable_background_removal: env_flag("RETRATO_DISABLE_BACKGROUND_REMOVAL"),
        }
    }

    /// Endpoint after applying a request-level override, normalized without
    /// a trailing slash.
    pub fn endpoint_for(&self, request_override: Option<&str>) -> Option<String> {
        request_override
            .map(str::to_string)
            .or_else(|| self.endpoint.clone())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn model_for(&self, request_override: Option<&str>) -> Option<String> {
        request_override
            .map(str::trim)
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .or_else(|| self.model.clone())
    }

    pub fn api_version_for(&self, request_override: Option<&str>) -> Option<String> {
        request_override
            .map(str::trim)
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .or_else(|| self.api_version.clone())
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_flag(key: &str) -> bool {
    non_empty_env(key)
        .map(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
