//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM, and any other
//! endpoint that follows the OpenAI chat completions contract. The HTTP
//! client is built once at construction and reused across concurrent
//! calls.

use std::collections::HashMap;

use serde_json::Value;

use ra_domain::error::{Error, Result};
use ra_domain::{
    CancelToken, CompletionRequest, CompletionResponse, FinishReason, Message, ResponseFormat,
    Role, ToolCallRequest, ToolChoice, ToolDefinition, Usage,
};

use crate::traits::{ChunkHandler, ProviderAdapter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Adapter id, also used as the endpoint id in dispatcher traces.
    pub id: String,
    /// Base URL up to but excluding `/chat/completions`.
    pub base_url: String,
    pub api_key: String,
    /// Whole-request HTTP timeout.
    pub timeout_ms: u64,
}

impl OpenAiCompatConfig {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_ms: 120_000,
        }
    }
}

/// An adapter for any OpenAI-compatible chat completions API.
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Auth(format!(
                "adapter '{}' has no API key configured",
                config.id
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("building HTTP client: {e}")))?;

        Ok(Self {
            id: config.id,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn from_reqwest(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("request to '{}' timed out: {e}", self.id))
        } else {
            Error::Transport(format!("request to '{}' failed: {e}", self.id))
        }
    }

    /// Map an HTTP error status onto the domain taxonomy.
    fn classify_status(&self, status: reqwest::StatusCode, body: &str) -> Error {
        let message = format!("HTTP {} - {}", status.as_u16(), truncate(body, 400));
        match status.as_u16() {
            401 | 403 => Error::Auth(message),
            404 => Error::NotFound(message),
            429 => Error::RateLimit(message),
            500..=599 => Error::Server {
                endpoint: self.id.clone(),
                message,
            },
            _ if body.contains("content_filter") || body.contains("content_policy") => {
                Error::ContentPolicy(message)
            }
            _ => Error::Transport(message),
        }
    }

    async fn send_chat(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = build_chat_body(req, stream);
        tracing::debug!(adapter = %self.id, url = %self.chat_url(), stream, "chat request");

        let resp = self
            .authed_post(&self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.from_reqwest(e))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &err_text));
        }
        Ok(resp)
    }

    async fn complete_inner(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let resp = self.send_chat(req, false).await?;
        let resp_text = resp.text().await.map_err(|e| self.from_reqwest(e))?;
        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn stream_inner(
        &self,
        req: &CompletionRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        let mut resp = self.send_chat(req, true).await?;

        let mut sse = SseBuffer::new();
        let mut assembly = StreamAssembly::default();

        loop {
            let chunk = tokio::select! {
                chunk = resp.chunk() => chunk.map_err(|e| self.from_reqwest(e))?,
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!(
                        "stream from '{}' cancelled", self.id
                    )));
                }
            };
            let Some(bytes) = chunk else { break };
            for data in sse.push(&bytes) {
                if data == "[DONE]" {
                    continue;
                }
                let v: Value = serde_json::from_str(&data)?;
                assembly.apply(&v, on_chunk);
            }
        }

        for data in sse.finish() {
            if data == "[DONE]" {
                continue;
            }
            let v: Value = serde_json::from_str(&data)?;
            assembly.apply(&v, on_chunk);
        }

        Ok(assembly.finish(&self.id))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        tokio::select! {
            result = self.complete_inner(req) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled(format!(
                "completion on '{}' cancelled", self.id
            ))),
        }
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        self.stream_inner(req, on_chunk, cancel).await
    }

    fn id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({"role": "assistant"});
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            if let Some(calls) = msg.tool_calls.as_deref() {
                let calls: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments},
                        })
                    })
                    .collect();
                obj["tool_calls"] = Value::Array(calls);
            }
            obj
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn build_chat_body(req: &CompletionRequest, stream: bool) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
    if let Some(ref system) = req.system {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    messages.extend(req.messages.iter().map(msg_to_openai));

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": stream,
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
        body["tools"] = Value::Array(tools);
    }
    match &req.tool_choice {
        ToolChoice::Auto => {}
        ToolChoice::None => body["tool_choice"] = Value::String("none".into()),
        ToolChoice::Required => body["tool_choice"] = Value::String("required".into()),
        ToolChoice::Tool(name) => {
            body["tool_choice"] =
                serde_json::json!({"type": "function", "function": {"name": name}});
        }
    }
    match &req.response_format {
        ResponseFormat::Text => {}
        ResponseFormat::JsonObject => {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        ResponseFormat::JsonSchema(schema) => {
            body["response_format"] =
                serde_json::json!({"type": "json_schema", "json_schema": schema});
        }
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = serde_json::json!(p);
    }
    if let Some(max) = req.max_tokens {
        body["max_tokens"] = serde_json::json!(max);
    }
    if !req.stop.is_empty() {
        body["stop"] = serde_json::json!(req.stop);
    }
    if let Some(seed) = req.seed {
        body["seed"] = serde_json::json!(seed);
    }
    if let Some(p) = req.presence_penalty {
        body["presence_penalty"] = serde_json::json!(p);
    }
    if let Some(p) = req.frequency_penalty {
        body["frequency_penalty"] = serde_json::json!(p);
    }
    if let Some(n) = req.n {
        body["n"] = serde_json::json!(n);
    }
    if let Some(l) = req.top_logprobs {
        body["logprobs"] = serde_json::json!(true);
        body["top_logprobs"] = serde_json::json!(l);
    }
    if stream {
        body["stream_options"] = serde_json::json!({"include_usage": true});
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(adapter_id: &str, body: &Value) -> Result<CompletionResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Server {
            endpoint: adapter_id.to_owned(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Server {
        endpoint: adapter_id.to_owned(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let refusal = message
        .get("refusal")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(FinishReason::from_provider)
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        tool_calls: parse_tool_calls(message),
        usage: body.get("usage").map(parse_usage).unwrap_or_default(),
        finish_reason,
        refusal,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCallRequest> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}")
                .to_string();
            Some(ToolCallRequest { id, name, arguments })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Usage {
    Usage {
        prompt_tokens: v.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as u32,
        completion_tokens: v
            .get("completion_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: v.get("total_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as u32,
        cached_tokens: v
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental decoder for the SSE response body.
///
/// Network chunks land mid-event, so raw bytes are buffered until a
/// blank-line delimiter completes an event, then each `data:` payload is
/// yielded. `event:`/`id:`/`retry:` fields carry nothing for the chat
/// stream and are dropped. A trailing unterminated event (some gateways
/// omit the last delimiter) is recovered by `finish`.
struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    /// Feed one network chunk; returns the payloads of every event it
    /// completed.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        self.drain_complete()
    }

    /// Terminate the stream, yielding a trailing event the server never
    /// delimited.
    fn finish(&mut self) -> Vec<String> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        self.pending.push_str("\n\n");
        self.drain_complete()
    }

    fn drain_complete(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(end) = self.pending.find("\n\n") {
            let event: String = self.pending.drain(..end + 2).collect();
            for line in event.lines() {
                let Some(data) = line.trim_start().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_owned());
                }
            }
        }
        payloads
    }
}

/// Accumulates SSE deltas into the final response. Tool-call fragments
/// arrive keyed by index, with the id and name on the first fragment.
#[derive(Default)]
struct StreamAssembly {
    content: String,
    tool_calls: HashMap<u64, (String, String, String)>, // index -> (id, name, args)
    tool_call_order: Vec<u64>,
    usage: Usage,
    finish_reason: FinishReason,
    model: String,
    id: String,
}

impl StreamAssembly {
    fn apply(&mut self, v: &Value, on_chunk: ChunkHandler<'_>) {
        if let Some(model) = v.get("model").and_then(|m| m.as_str()) {
            if self.model.is_empty() {
                self.model = model.to_owned();
            }
        }
        if let Some(id) = v.get("id").and_then(|m| m.as_str()) {
            if self.id.is_empty() {
                self.id = id.to_owned();
            }
        }
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(usage);
        }

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            return;
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = FinishReason::from_provider(fr);
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                on_chunk(text);
                self.content.push_str(text);
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_insert_with(|| {
                    self.tool_call_order.push(index);
                    (String::new(), String::new(), String::new())
                });
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    entry.0 = id.to_owned();
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                {
                    entry.1 = name.to_owned();
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                {
                    entry.2.push_str(args);
                }
            }
        }
    }

    fn finish(mut self, adapter_id: &str) -> CompletionResponse {
        let tool_calls: Vec<ToolCallRequest> = self
            .tool_call_order
            .iter()
            .filter_map(|index| self.tool_calls.remove(index))
            .map(|(id, name, args)| ToolCallRequest {
                id,
                name,
                arguments: if args.is_empty() { "{}".into() } else { args },
            })
            .collect();

        if !tool_calls.is_empty() && self.finish_reason == FinishReason::Stop {
            self.finish_reason = FinishReason::ToolCalls;
        }

        CompletionResponse {
            content: self.content,
            tool_calls,
            usage: self.usage,
            finish_reason: self.finish_reason,
            refusal: None,
            model: if self.model.is_empty() {
                adapter_id.to_owned()
            } else {
                self.model
            },
            id: self.id,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("ping")],
            system: Some("You are terse".into()),
            temperature: Some(0.2),
            ..Default::default()
        }
    }

    #[test]
    fn body_places_system_prompt_first() {
        let body = build_chat_body(&request(), false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are terse");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn body_encodes_tools_and_tool_choice() {
        let mut req = request();
        req.tools = vec![ToolDefinition {
            name: "add".into(),
            description: "adds".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        req.tool_choice = ToolChoice::Tool("add".into());

        let body = build_chat_body(&req, false);
        assert_eq!(body["tools"][0]["function"]["name"], "add");
        assert_eq!(body["tool_choice"]["function"]["name"], "add");
    }

    #[test]
    fn body_encodes_response_format_and_sampling() {
        let mut req = request();
        req.response_format = ResponseFormat::JsonObject;
        req.seed = Some(7);
        req.stop = vec!["END".into()];
        req.max_tokens = Some(64);

        let body = build_chat_body(&req, true);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["seed"], 7);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn assistant_tool_calls_round_trip_ids() {
        let msg = Message::assistant_with_calls(
            "",
            vec![ToolCallRequest {
                id: "call_abc123".into(),
                name: "add".into(),
                arguments: r#"{"a":2}"#.into(),
            }],
        );
        let v = msg_to_openai(&msg);
        assert_eq!(v["tool_calls"][0]["id"], "call_abc123");
        assert_eq!(v["content"], Value::Null);

        let tool_msg = Message::tool("call_abc123", "5");
        let v = msg_to_openai(&tool_msg);
        assert_eq!(v["tool_call_id"], "call_abc123");
    }

    #[test]
    fn parse_full_response() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": "pong",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "add", "arguments": "{\"a\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 2,
                "total_tokens": 12,
                "prompt_tokens_details": {"cached_tokens": 4}
            }
        });
        let resp = parse_chat_response("test", &body).unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls[0].id, "call_1");
        assert_eq!(resp.usage.total_tokens, 12);
        assert_eq!(resp.usage.cached_tokens, 4);
        assert_eq!(resp.id, "chatcmpl-1");
    }

    #[test]
    fn missing_choices_is_a_server_error() {
        let err = parse_chat_response("test", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), ra_domain::ErrorKind::Server);
    }

    #[test]
    fn stream_assembly_collects_content_and_tool_calls() {
        let mut assembly = StreamAssembly::default();
        let collected = parking_lot::Mutex::new(String::new());
        let on_chunk: ChunkHandler<'_> = &|text| collected.lock().push_str(text);

        assembly.apply(
            &serde_json::json!({
                "id": "c1", "model": "m",
                "choices": [{"delta": {"content": "po"}}]
            }),
            on_chunk,
        );
        assembly.apply(
            &serde_json::json!({"choices": [{"delta": {"content": "ng"}}]}),
            on_chunk,
        );
        assembly.apply(
            &serde_json::json!({
                "choices": [{"delta": {"tool_calls": [{
                    "index": 0, "id": "call_9",
                    "function": {"name": "add", "arguments": "{\"a\""}
                }]}}]
            }),
            on_chunk,
        );
        assembly.apply(
            &serde_json::json!({
                "choices": [{"delta": {"tool_calls": [{
                    "index": 0, "function": {"arguments": ":1}"}
                }]}}]
            }),
            on_chunk,
        );
        assembly.apply(
            &serde_json::json!({
                "choices": [{"delta": {}, "finish_reason": "tool_calls"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
            }),
            on_chunk,
        );

        let resp = assembly.finish("test");
        assert_eq!(resp.content, "pong");
        assert_eq!(*collected.lock(), "pong");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_9");
        assert_eq!(resp.tool_calls[0].arguments, "{\"a\":1}");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.usage.total_tokens, 3);
    }

    #[test]
    fn status_classification() {
        let adapter = OpenAiCompatAdapter::new(OpenAiCompatConfig::new(
            "t",
            "http://localhost",
            "key",
        ))
        .unwrap();
        use ra_domain::ErrorKind;
        let cases = [
            (401u16, ErrorKind::Auth),
            (403, ErrorKind::Auth),
            (404, ErrorKind::NotFound),
            (429, ErrorKind::RateLimit),
            (500, ErrorKind::Server),
            (503, ErrorKind::Server),
        ];
        for (status, kind) in cases {
            let status = reqwest::StatusCode::from_u16(status).unwrap();
            assert_eq!(adapter.classify_status(status, "").kind(), kind);
        }
        let status = reqwest::StatusCode::from_u16(400).unwrap();
        assert_eq!(
            adapter
                .classify_status(status, "{\"error\": \"content_filter\"}")
                .kind(),
            ra_domain::ErrorKind::ContentPolicy
        );
    }

    #[test]
    fn adapter_requires_api_key() {
        let err =
            OpenAiCompatAdapter::new(OpenAiCompatConfig::new("t", "http://localhost", ""))
                .unwrap_err();
        assert_eq!(err.kind(), ra_domain::ErrorKind::Auth);
    }

    #[test]
    fn sse_buffer_yields_completed_events() {
        let mut sse = SseBuffer::new();
        let payloads = sse.push(b"event: message\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(sse.finish().is_empty());
    }

    #[test]
    fn sse_buffer_holds_partial_events_across_chunks() {
        let mut sse = SseBuffer::new();
        assert!(sse.push(b"data: {\"split\"").is_empty());
        let payloads = sse.push(b":true}\n\n");
        assert_eq!(payloads, vec!["{\"split\":true}"]);
    }

    #[test]
    fn sse_buffer_finish_recovers_an_undelimited_tail() {
        let mut sse = SseBuffer::new();
        assert!(sse.push(b"data: [DONE]").is_empty());
        assert_eq!(sse.finish(), vec!["[DONE]"]);
        // finish is idempotent once drained.
        assert!(sse.finish().is_empty());
    }

    #[test]
    fn sse_buffer_drops_non_data_fields_and_blank_payloads() {
        let mut sse = SseBuffer::new();
        let payloads = sse.push(b"id: 7\nretry: 1000\ndata: \n\n  data: kept\n\n");
        assert_eq!(payloads, vec!["kept"]);
    }
}
