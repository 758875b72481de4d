//! HTTP request toolkit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::tool::{Tool, Toolkit};

#[derive(Clone)]
pub struct HttpConfig {
    pub base_url: Option<String>,
    pub default_headers: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: HashMap::new(),
            timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }
}

pub fn http_toolkit(config: HttpConfig) -> Toolkit {
    let mut toolkit = Toolkit::new("http");
    toolkit.register(HttpRequestTool { config });
    toolkit
}

struct HttpRequestTool {
    config: HttpConfig,
}

#[derive(Debug, Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and return the status and body."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string", "enum": ["GET", "POST", "PUT", "DELETE"]},
                "headers": {"type": "object"},
                "body": {}
            },
            "required": ["url"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let request: HttpRequestInput = serde_json::from_value(input)?;
        let url = match &self.config.base_url {
            Some(base) if !request.url.starts_with("http") => {
                format!("{}/{}", base.trim_end_matches('/'), request.url.trim_start_matches('/'))
            }
            _ => request.url.clone(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|err| AgentError::Run(format!("http client error: {err}")))?;

        let method: reqwest::Method = request
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| AgentError::Run(format!("invalid method `{}`", request.method)))?;

        let mut headers = HeaderMap::new();
        for (key, value) in self
            .config
            .default_headers
            .iter()
            .chain(request.headers.iter().flatten())
        {
            let name: HeaderName = key
                .parse()
                .map_err(|_| AgentError::Run(format!("invalid header name `{key}`")))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|_| AgentError::Run(format!("invalid header value for `{key}`")))?;
            headers.insert(name, value);
        }

        let mut builder = client.request(method, &url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| AgentError::Run(format!("request to `{url}` failed: {err}")))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| AgentError::Run(format!("failed reading body: {err}")))?;

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(json!({"status": status, "body": body}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults_to_get() {
        let input: HttpRequestInput =
            serde_json::from_value(json!({"url": "https://example.com"})).unwrap();
        assert_eq!(input.method, "GET");
        assert!(input.headers.is_none());
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let toolkit = http_toolkit(HttpConfig::default());
        let tool = toolkit.get("http_request").unwrap();
        let err = tool
            .invoke(json!({"url": "https://example.com", "method": "NOT A METHOD"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid method"));
    }
}
