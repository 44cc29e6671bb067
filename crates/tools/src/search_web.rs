//! search_web: web search through the DuckDuckGo HTML endpoint.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolError, ValidatedInput};
use regex::Regex;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::debug;

use crate::fetch_url::{http_client, strip_tags};

static ANCHOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s([^>]*)>(.*?)</a>"#).ok());
static HREF: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).ok());

pub struct SearchWebTool {
    client: Client,
    endpoint: String,
}

impl SearchWebTool {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SearchResult {
    title: String,
    url: String,
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// DuckDuckGo wraps result links in a redirect; unwrap the `uddg` target.
fn unwrap_redirect(href: &str) -> String {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.clone()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(href)
}

/// Extract results from a result page. Anchors with class `result__a` are
/// preferred; without them, any link with a descriptive text is taken.
pub(crate) fn parse_results(html: &str, max: usize) -> Vec<SearchResult> {
    let (Some(anchor), Some(href)) = (ANCHOR.as_ref(), HREF.as_ref()) else {
        return Vec::new();
    };

    let links: Vec<(bool, String, String)> = anchor
        .captures_iter(html)
        .filter_map(|cap| {
            let attrs = cap.get(1)?.as_str();
            let url = href.captures(attrs)?.get(1)?.as_str();
            let title = decode_entities(&strip_tags(cap.get(2)?.as_str()));
            Some((attrs.contains("result__a"), unwrap_redirect(url), title.trim().to_string()))
        })
        .filter(|(_, url, title)| !url.is_empty() && !title.is_empty())
        .collect();

    let primary: Vec<SearchResult> = links
        .iter()
        .filter(|(is_result, _, _)| *is_result)
        .take(max)
        .map(|(_, url, title)| SearchResult {
            title: title.clone(),
            url: url.clone(),
        })
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    links
        .into_iter()
        .filter(|(_, url, title)| title.chars().count() > 10 && url.starts_with("http"))
        .take(max)
        .map(|(_, url, title)| SearchResult { title, url })
        .collect()
}

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web and return result titles and URLs. \
         Follow up with fetch_url to read a result."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("query", FieldType::String, "Search query")
            .defaulted("max_results", FieldType::Integer, json!(5), "Number of results (1-20)")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("results", FieldType::Array, "Results as {title, url}")
            .required("count", FieldType::Integer, "Number of results")
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let query = input.require_str("query")?.trim();
        if query.is_empty() {
            return Err(input.invalid("query", "must not be empty"));
        }
        let max_results = input.u64_opt("max_results").unwrap_or(5);
        if !(1..=20).contains(&max_results) {
            return Err(input.invalid("max_results", "must be between 1 and 20"));
        }

        debug!(query, max_results, "Searching the web");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::execution(
                self.name(),
                format!("search endpoint returned HTTP {}", response.status()),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| {
                let reason = format!("failed to read search results: {e}");
                ToolError::execution(self.name(), reason)
            })?;

        let results = parse_results(&body, max_results as usize);
        if results.is_empty() {
            return Err(ToolError::execution(self.name(), format!("no results found for '{query}'"))
                .with_suggestion("search_web with broader or different keywords"));
        }

        Ok(json!({
            "count": results.len(),
            "results": results,
        }))
    }
}
