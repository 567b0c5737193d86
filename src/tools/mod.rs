//! Tool access: the HTTP tool-registry client, parameter heuristics for the
//! explicit-tool short circuit, and the web information aggregator.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::constants::{tools as tool_ids, TOOL_INVOKE_TIMEOUT, WEB_BODY_LIMIT};
use crate::context::extract_urls;
use crate::interfaces::{ToolDescriptor, ToolRegistry, ToolResponse};
use crate::types::ExecutionRequest;

/// Tool registry client speaking the `/api/v1/tools` HTTP+JSON surface.
pub struct HttpToolRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolRegistry {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TOOL_INVOKE_TIMEOUT)
            .build()
            .context("building tool registry client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ToolRegistry for HttpToolRegistry {
    async fn list(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        let url = format!("{}/api/v1/tools", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("listing tools")?
            .error_for_status()
            .context("tool list returned an error status")?
            .json()
            .await
            .context("decoding tool list")?;
        // The endpoint returns either a bare array or {"tools": [...]}.
        let entries = body
            .get("tools")
            .cloned()
            .unwrap_or(body);
        Ok(serde_json::from_value(entries).unwrap_or_default())
    }

    async fn invoke(&self, id: &str, params: &Value) -> anyhow::Result<ToolResponse> {
        let url = format!("{}/api/v1/tools/{}/invoke", self.base_url, id);
        debug!(tool = id, "invoking tool");
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .with_context(|| format!("invoking tool {}", id))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Ok(ToolResponse {
                success: false,
                output: body.clone(),
                error: Some(format!("tool {} returned status {}", id, status)),
                exit_code: None,
            });
        }
        Ok(serde_json::from_value(body.clone()).unwrap_or(ToolResponse {
            success: true,
            output: body,
            error: None,
            exit_code: None,
        }))
    }

    async fn register(&self, tool: &ToolDescriptor) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/tools", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(tool)
            .send()
            .await
            .context("registering tool")?;
        // Duplicate registrations are tolerated.
        if response.status() == reqwest::StatusCode::CONFLICT || response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("tool registration failed with status {}", response.status())
        }
    }
}

/// Heuristic parameter extraction for the explicit-tool short circuit: pull
/// what the tool needs from the context first, then from the description.
pub fn tool_params(tool_id: &str, request: &ExecutionRequest) -> Value {
    let context = &request.context;
    match tool_id {
        tool_ids::HTTP_GET | tool_ids::HTML_SCRAPER => {
            let url = context
                .urls()
                .into_iter()
                .next()
                .or_else(|| extract_urls(&request.description).into_iter().next())
                .unwrap_or_default();
            json!({ "url": url })
        }
        tool_ids::LIST_DIR => {
            let path = context.get("path").unwrap_or(".");
            json!({ "path": path })
        }
        tool_ids::FILE_READ => {
            let path = context
                .get("path")
                .or_else(|| context.get("filename"))
                .map(str::to_string)
                .or_else(|| first_quoted(&request.description))
                .unwrap_or_default();
            json!({ "path": path })
        }
        tool_ids::FILE_WRITE => {
            let path = context
                .get("path")
                .or_else(|| context.get("filename"))
                .map(str::to_string)
                .or_else(|| first_quoted(&request.description))
                .unwrap_or_default();
            let content = context.get("content").unwrap_or_default();
            json!({ "path": path, "content": content })
        }
        tool_ids::EXEC => {
            let command = context
                .get("command")
                .map(str::to_string)
                .or_else(|| first_quoted(&request.description))
                .unwrap_or_default();
            json!({ "command": command })
        }
        _ => {
            // Unknown tools get the whole non-administrative context.
            let entries: serde_json::Map<String, Value> = context
                .without_admin_keys()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Value::Object(entries)
        }
    }
}

fn first_quoted(text: &str) -> Option<String> {
    let start = text.find(['"', '\''])?;
    let quote = text[start..].chars().next()?;
    let rest = &text[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Fetch and summarize each URL: the HTML scraper first, the plain HTTP GET
/// tool as fallback, bodies truncated so summaries stay prompt-sized.
pub async fn aggregate_urls(
    registry: &Arc<dyn ToolRegistry>,
    urls: &[String],
    cancel: &CancellationToken,
) -> String {
    let mut sections = Vec::new();
    for url in urls {
        if cancel.is_cancelled() {
            break;
        }
        let response = fetch_one(registry, url).await;
        sections.push(summarize_response(url, response));
    }
    sections.join("\n\n")
}

async fn fetch_one(registry: &Arc<dyn ToolRegistry>, url: &str) -> Option<ToolResponse> {
    let params = json!({ "url": url });
    for tool in [tool_ids::HTML_SCRAPER, tool_ids::HTTP_GET] {
        let attempt =
            tokio::time::timeout(TOOL_INVOKE_TIMEOUT, registry.invoke(tool, &params)).await;
        match attempt {
            Ok(Ok(response)) if response.success => return Some(response),
            Ok(Ok(response)) => {
                debug!(tool, url, error = ?response.error, "tool reported failure");
            }
            Ok(Err(err)) => warn!(tool, url, error = %err, "tool invocation failed"),
            Err(_) => warn!(tool, url, "tool invocation timed out"),
        }
    }
    None
}

fn summarize_response(url: &str, response: Option<ToolResponse>) -> String {
    match response {
        Some(response) => {
            let status = response
                .output
                .get("status")
                .map(render_scalar)
                .unwrap_or_else(|| "ok".to_string());
            let body = response
                .output
                .get("body")
                .or_else(|| response.output.get("text"))
                .or_else(|| response.output.get("content"))
                .map(render_scalar)
                .unwrap_or_else(|| response.output.to_string());
            format!(
                "URL: {}\nSTATUS: {}\nBODY: {}",
                url,
                status,
                truncate_bytes(&body, WEB_BODY_LIMIT)
            )
        }
        None => format!("URL: {}\nSTATUS: error\nBODY: (unreachable)", url),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Byte-bounded truncation that never splits a UTF-8 character.
fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedRegistry {
        /// (tool id, response) pairs consumed in order of invocation.
        responses: Mutex<Vec<(String, anyhow::Result<ToolResponse>)>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolRegistry for ScriptedRegistry {
        async fn list(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![])
        }

        async fn invoke(&self, id: &str, _params: &Value) -> anyhow::Result<ToolResponse> {
            self.calls.lock().push(id.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                anyhow::bail!("no scripted response");
            }
            let (expected, response) = responses.remove(0);
            assert_eq!(expected, id, "tool invoked out of order");
            response
        }

        async fn register(&self, _tool: &ToolDescriptor) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ok_response(output: Value) -> anyhow::Result<ToolResponse> {
        Ok(ToolResponse {
            success: true,
            output,
            error: None,
            exit_code: Some(0),
        })
    }

    #[tokio::test]
    async fn scraper_failure_falls_back_to_http_get() {
        let registry: Arc<dyn ToolRegistry> = Arc::new(ScriptedRegistry {
            responses: Mutex::new(vec![
                (
                    tool_ids::HTML_SCRAPER.to_string(),
                    Err(anyhow::anyhow!("scrape failed")),
                ),
                (
                    tool_ids::HTTP_GET.to_string(),
                    ok_response(json!({"status": 200, "body": "hello"})),
                ),
            ]),
            calls: Mutex::new(vec![]),
        });

        let summary = aggregate_urls(
            &registry,
            &["https://example.com/a".to_string()],
            &CancellationToken::new(),
        )
        .await;
        assert!(summary.contains("URL: https://example.com/a"));
        assert!(summary.contains("STATUS: 200"));
        assert!(summary.contains("BODY: hello"));
    }

    #[tokio::test]
    async fn both_tools_failing_reports_unreachable() {
        let registry: Arc<dyn ToolRegistry> = Arc::new(ScriptedRegistry {
            responses: Mutex::new(vec![
                (
                    tool_ids::HTML_SCRAPER.to_string(),
                    Err(anyhow::anyhow!("down")),
                ),
                (tool_ids::HTTP_GET.to_string(), Err(anyhow::anyhow!("down"))),
            ]),
            calls: Mutex::new(vec![]),
        });
        let summary = aggregate_urls(
            &registry,
            &["https://example.com/x".to_string()],
            &CancellationToken::new(),
        )
        .await;
        assert!(summary.contains("STATUS: error"));
    }

    #[test]
    fn url_params_come_from_context_first() {
        let request = ExecutionRequest::new("fetch", "use tool_http_get")
            .with_context(TaskContext::from([("url", "https://example.com/ctx")]));
        let params = tool_params(tool_ids::HTTP_GET, &request);
        assert_eq!(params["url"], "https://example.com/ctx");

        let request =
            ExecutionRequest::new("fetch", "use tool_http_get on https://example.com/desc");
        let params = tool_params(tool_ids::HTTP_GET, &request);
        assert_eq!(params["url"], "https://example.com/desc");
    }

    #[test]
    fn file_write_pulls_quoted_path_from_description() {
        let request = ExecutionRequest::new("fs", "use tool_file_write to create 'notes.txt'")
            .with_context(TaskContext::from([("content", "hello")]));
        let params = tool_params(tool_ids::FILE_WRITE, &request);
        assert_eq!(params["path"], "notes.txt");
        assert_eq!(params["content"], "hello");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(400);
        let truncated = truncate_bytes(&text, WEB_BODY_LIMIT);
        assert!(truncated.len() <= WEB_BODY_LIMIT + '…'.len_utf8());
    }
}
