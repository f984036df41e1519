//! Agent gateway backend: one blocking request, replayed as a single delta.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::{CompletionProvider, CompletionStream};
use crate::prompt::{ChatTurn, Role};

/// Reply fields checked in order; the first non-empty string wins.
const REPLY_POINTERS: [&str; 5] = ["/response", "/message", "/data/response", "/result", "/text"];

/// Posts the user turn to `{base}/api/sessions/send` on an agent gateway.
pub struct GatewayCompletion {
    client: Client,
    endpoint: String,
    session_key: String,
}

impl GatewayCompletion {
    /// Builds a gateway client for `session_key`.
    pub fn new(base_url: String, session_key: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!session_key.trim().is_empty(), "missing gateway session key");
        let base = Url::parse(&base_url)
            .with_context(|| format!("invalid gateway URL {base_url}"))?;
        anyhow::ensure!(
            matches!(base.scheme(), "http" | "https"),
            "gateway URL must be http(s): {base_url}"
        );
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build gateway HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/sessions/send", base_url.trim_end_matches('/')),
            session_key,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    session_key: &'a str,
    message: &'a str,
    timeout_seconds: u64,
}

/// First non-empty reply string in a gateway response body.
pub fn extract_reply(body: &Value) -> Option<&str> {
    REPLY_POINTERS
        .iter()
        .filter_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .find(|reply| !reply.is_empty())
}

#[async_trait]
impl CompletionProvider for GatewayCompletion {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn stream_complete(&self, messages: &[ChatTurn]) -> Result<CompletionStream> {
        let message = messages
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .unwrap_or_default();
        let request = SendRequest {
            session_key: &self.session_key,
            message,
            timeout_seconds: 0,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("agent gateway request failed")?;
        if !resp.status().is_success() {
            bail!("agent gateway returned {}", resp.status());
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let reply = extract_reply(&body)
            .ok_or_else(|| anyhow!("agent gateway returned no response"))?
            .to_string();
        Ok(CompletionStream::Deltas(stream::iter([Ok(reply)]).boxed()))
    }
}
