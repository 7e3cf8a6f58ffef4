use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use crate::backends::ImageEditBackend;
use crate::config::RemoteConfig;
use crate::http::{mime_for_name, response_json_or_error, with_api_version};
use retrato_contracts::types::ImprovementJob;

/// Image-edit adapter over the OpenAI-compatible `images/edits` surface.
/// Endpoint and api-version are resolved per call so job-level overrides
/// take precedence over the environment configuration.
#[derive(Debug, Clone)]
pub struct ImageEditHttpBackend {
    http: HttpClient,
    config: RemoteConfig,
}

impl ImageEditHttpBackend {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            http: HttpClient::new(),
            config: config.clone(),
        }
    }

    /// Resolves the request URL for one job: job-level endpoint and
    /// api-version overrides win over the configured values.
    fn edit_url(&self, job: &ImprovementJob) -> Result<String> {
        let endpoint = self
            .config
            .endpoint_for(job.endpoint.as_deref())
            .context("image edit endpoint is not configured")?;
        let api_version = self.config.api_version_for(job.api_version.as_deref());
        Ok(with_api_version(
            format!("{endpoint}/images/edits"),
            api_version.as_deref(),
        ))
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed to download edited image from {url}"))?;
        if !response.status().is_success() {
            bail!("edited image download failed with HTTP {}", response.status());
        }
        Ok(response.bytes().context("failed to read edited image body")?.to_vec())
    }

    fn decode_first_item(&self, payload: &Value) -> Result<Vec<u8>> {
        let item = payload
            .pointer("/data/0")
            .context("image edit response had no data items")?;
        if let Some(b64) = item.get("b64_json").and_then(Value::as_str) {
            return BASE64
                .decode(b64)
                .context("image edit response had invalid base64 payload");
        }
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            return self.download_image(url);
        }
        bail!("image edit response item had neither b64_json nor url");
    }
}

impl ImageEditBackend for ImageEditHttpBackend {
    fn submit_for_edit(
        &self,
        job: &ImprovementJob,
        image: &[u8],
        image_name: &str,
        instruction: &str,
    ) -> Result<Vec<u8>> {
        let url = self.edit_url(job)?;
        let model = self
            .config
            .image_model
            .as_deref()
            .context("image edit model is not configured")?;

        let part = MultipartPart::bytes(image.to_vec())
            .file_name(image_name.to_string())
            .mime_str(mime_for_name(image_name))
            .with_context(|| format!("invalid mime for {image_name}"))?;
        let form = MultipartForm::new()
            .text("model", model.to_string())
            .text("prompt", instruction.to_string())
            .text("n", "1")
            .text("size", job.size.as_str())
            .part("image[]", part);

        let mut request = self.http.post(&url).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .with_context(|| format!("image edit request failed ({url})"))?;
        let payload = response_json_or_error("image edit", response)?;
        self.decode_first_item(&payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn backend() -> ImageEditHttpBackend {
        ImageEditHttpBackend::from_config(&RemoteConfig {
            endpoint: Some("https://example.invalid".to_string()),
            image_model: Some("image-edit-1".to_string()),
            api_version: Some("2025-01-01".to_string()),
            ..RemoteConfig::default()
        })
    }

    #[test]
    fn job_overrides_win_over_configured_endpoint_and_api_version() -> anyhow::Result<()> {
        let mut job = ImprovementJob::new("foto.png");
        assert_eq!(
            backend().edit_url(&job)?,
            "https://example.invalid/images/edits?api-version=2025-01-01"
        );

        job.endpoint = Some("https://other.invalid/v1/".to_string());
        job.api_version = Some("2025-04-01-preview".to_string());
        assert_eq!(
            backend().edit_url(&job)?,
            "https://other.invalid/v1/images/edits?api-version=2025-04-01-preview"
        );
        Ok(())
    }

    #[test]
    fn decodes_inline_base64_payload() -> anyhow::Result<()> {
        let payload = json!({ "data": [{ "b64_json": BASE64.encode(b"png-bytes") }] });
        let bytes = backend().decode_first_item(&payload)?;
        assert_eq!(bytes, b"png-bytes");
        Ok(())
    }

    #[test]
    fn rejects_payload_without_items() {
        let payload = json!({ "data": [] });
        let err = backend().decode_first_item(&payload).unwrap_err();
        assert!(err.to_string().contains("no data items"));
    }

    #[test]
    fn rejects_item_without_image_fields() {
        let payload = json!({ "data": [{ "revised_prompt": "brighter" }] });
        let err = backend().decode_first_item(&payload).unwrap_err();
        assert!(err.to_string().contains("neither b64_json nor url"));
    }
}
