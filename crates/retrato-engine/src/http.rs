use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

/// Reads a response body and decodes it as JSON, turning non-2xx statuses
/// into errors that carry the status code and a truncated body excerpt.
pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_chars).collect();
    format!("{truncated}…")
}

pub(crate) fn mime_for_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// Appends the Azure-style `api-version` query parameter when configured.
pub(crate) fn with_api_version(url: String, api_version: Option<&str>) -> String {
    match api_version {
        Some(version) if !version.trim().is_empty() => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}api-version={}", version.trim())
        }
        _ => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text_intact() {
        assert_eq!(truncate_text("short", 512), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }

    #[test]
    fn mime_guesses_from_extension_with_png_default() {
        assert_eq!(mime_for_name("foto.JPG"), "image/jpeg");
        assert_eq!(mime_for_name("foto.webp"), "image/webp");
        assert_eq!(mime_for_name("sin_extension"), "image/png");
    }

    #[test]
    fn api_version_appends_with_correct_separator() {
        assert_eq!(
            with_api_version("https://a/b".to_string(), Some("2025-04-01-preview")),
            "https://a/b?api-version=2025-04-01-preview"
        );
        assert_eq!(
            with_api_version("https://a/b?x=1".to_string(), Some("v")),
            "https://a/b?x=1&api-version=v"
        );
        assert_eq!(
            with_api_version("https://a/b".to_string(), None),
            "https://a/b"
        );
    }
}
