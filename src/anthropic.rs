use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

pub fn messages_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/v1/messages")
}

pub async fn messages_text(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    max_tokens: u32,
    prompt: &str,
) -> anyhow::Result<String> {
    let body = serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{ "role": "user", "content": prompt }],
    });

    let response = client
        .post(endpoint)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response
        .text()
        .await
        .context("read Anthropic response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        anyhow::bail!("Anthropic API error ({status}): {message}");
    }

    let value: serde_json::Value =
        serde_json::from_str(&raw).context("parse Anthropic response")?;
    extract_text(&value).context("extract message text")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let content = value
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `content` array in response"))?;

    let text = content
        .iter()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("text"))
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect::<String>();

    if text.trim().is_empty() {
        anyhow::bail!("Anthropic response text is empty");
    }
    Ok(text)
}
