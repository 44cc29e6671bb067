//! fetch_url: download a web page and return its readable text.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolError, ValidatedInput};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("codeloop/", env!("CARGO_PKG_VERSION"));
const MIN_CHARS: u64 = 100;
const MAX_CHARS: u64 = 100_000;

pub struct FetchUrlTool {
    client: Client,
    default_max_chars: usize,
}

impl FetchUrlTool {
    pub fn new(timeout_secs: u64, default_max_chars: usize) -> Self {
        Self {
            client: http_client(timeout_secs),
            default_max_chars,
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// Bare hosts get `https://`. Anything but http(s) is rejected.
pub(crate) fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    match reqwest::Url::parse(&url) {
        Ok(parsed)
            if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() =>
        {
            Some(parsed.to_string())
        }
        _ => None,
    }
}

pub(crate) fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html")
        || head.starts_with("<html")
        || head.contains("<head")
        || head.contains("<body")
}

/// Readable text of an HTML document.
pub(crate) fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_tags(html),
    }
}

/// Crude tag stripper used when html2text yields nothing.
pub(crate) fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: String, max: usize) -> (String, bool) {
    if text.chars().count() <= max {
        return (text, false);
    }
    (text.chars().take(max).collect(), true)
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a web page (documentation, API references) and return its text with HTML removed."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required(
                "url",
                FieldType::String,
                "URL to fetch; https:// is assumed when no scheme is given",
            )
            .optional(
                "max_chars",
                FieldType::Integer,
                "Maximum characters of text to return (100-100000)",
            )
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("url", FieldType::String, "URL fetched")
            .required("status", FieldType::Integer, "HTTP status code")
            .required("content", FieldType::String, "Page text")
            .required("truncated", FieldType::Boolean, "Whether content was cut at max_chars")
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let url = normalize_url(input.require_str("url")?)
            .ok_or_else(|| input.invalid("url", "must be an http(s) URL or a host name"))?;
        let max_chars = match input.u64_opt("max_chars") {
            Some(n) if !(MIN_CHARS..=MAX_CHARS).contains(&n) => {
                return Err(input.invalid("max_chars", "must be between 100 and 100000"));
            }
            Some(n) => n as usize,
            None => self.default_max_chars,
        };

        debug!(url = %url, "Fetching URL");
        let response = self.client.get(&url).send().await.map_err(|e| {
            ToolError::execution(self.name(), format!("request to {url} failed: {e}"))
                .with_suggestion("check the URL, or search_web for the right page")
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::execution(self.name(), format!("{url} returned HTTP {status}"))
                .with_suggestion("search_web to find a working URL"));
        }

        let is_html_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response.text().await.map_err(|e| {
            ToolError::execution(self.name(), format!("failed to read body of {url}: {e}"))
        })?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if is_html_type || looks_like_html(body) {
            html_to_text(body)
        } else {
            body.to_string()
        };
        let (content, truncated) = truncate_chars(text.trim().to_string(), max_chars);

        Ok(json!({
            "url": url,
            "status": status.as_u16(),
            "content": content,
            "truncated": truncated,
        }))
    }
}
