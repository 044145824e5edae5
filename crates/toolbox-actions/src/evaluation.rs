//! Concurrent LLM evaluation.
//!
//! Sends the same context to an OpenAI-compatible chat completions endpoint
//! several times at once and collects every answer, successful or not.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolbox::{Progress, SecretString, Shared};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f32 = 0.7;

/// Upper bound on `num_calls` for a single invocation.
pub const MAX_CALLS: u32 = 20;

/// Where and how to reach the model.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
}

impl LlmEndpoint {
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallResult {
    pub call_id: u32,
    pub success: bool,
    pub response: Option<String>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_calls: u32,
    pub successful_calls: u32,
    pub failed_calls: u32,
    pub total_tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Ordered by `call_id`.
    pub results: Vec<CallResult>,
    pub summary: Summary,
    /// Answers of the successful calls.
    pub responses: Vec<String>,
}

/// Make concurrent calls to an LLM with the given context and system prompt.
///
/// `context` is sent as the user message of every call; `num_calls` calls
/// run at once (at most 20), each with `system_prompt` as the system
/// message. Failed calls are reported in the results rather than failing
/// the tool.
#[toolbox::procedure(defaults(num_calls = 3, system_prompt = "You are a helpful assistant."))]
#[allow(clippy::too_many_arguments)]
pub async fn evaluation_sub_agent_action(
    context: String,
    num_calls: u32,
    system_prompt: String,
    llm_api_key: SecretString,
    llm_base_url: String,
    llm_model: String,
    http_client: Shared<reqwest::Client>,
    progress: Progress,
) -> anyhow::Result<EvaluationReport> {
    if llm_api_key.is_empty() {
        anyhow::bail!("llm_api_key is required");
    }
    if !(1..=MAX_CALLS).contains(&num_calls) {
        anyhow::bail!("num_calls must be between 1 and {}, got {}", MAX_CALLS, num_calls);
    }

    let endpoint = LlmEndpoint {
        api_key: llm_api_key,
        base_url: llm_base_url,
        model: llm_model,
    };

    Ok(evaluate(&http_client, &endpoint, &context, &system_prompt, num_calls, &progress).await)
}

/// Run `num_calls` completions concurrently and summarize them.
pub async fn evaluate(
    client: &reqwest::Client,
    endpoint: &LlmEndpoint,
    context: &str,
    system_prompt: &str,
    num_calls: u32,
    progress: &Progress,
) -> EvaluationReport {
    tracing::info!(num_calls, model = %endpoint.model, "Starting concurrent LLM calls");

    let mut pending: FuturesUnordered<_> = (0..num_calls)
        .map(|call_id| single_call(client, endpoint, context, system_prompt, call_id))
        .collect();

    let mut results = Vec::with_capacity(num_calls as usize);
    while let Some(result) = pending.next().await {
        results.push(result);
        progress
            .report(
                results.len() as f64,
                num_calls as f64,
                format!("{}/{} LLM calls finished", results.len(), num_calls),
            )
            .await;
    }
    results.sort_by_key(|r| r.call_id);

    let successful_calls = results.iter().filter(|r| r.success).count() as u32;
    let summary = Summary {
        total_calls: num_calls,
        successful_calls,
        failed_calls: num_calls - successful_calls,
        total_tokens_used: results.iter().map(|r| r.tokens_used).sum(),
    };

    tracing::info!(
        successful = successful_calls,
        total = num_calls,
        "Completed concurrent LLM calls"
    );

    let responses = results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.response.clone())
        .collect();

    EvaluationReport {
        results,
        summary,
        responses,
    }
}

async fn single_call(
    client: &reqwest::Client,
    endpoint: &LlmEndpoint,
    context: &str,
    system_prompt: &str,
    call_id: u32,
) -> CallResult {
    match complete(client, endpoint, context, system_prompt).await {
        Ok((response, tokens_used)) => CallResult {
            call_id,
            success: true,
            response: Some(response),
            tokens_used,
            error: None,
        },
        Err(e) => {
            tracing::error!(call_id, error = %e, "LLM call failed");
            CallResult {
                call_id,
                success: false,
                response: None,
                tokens_used: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn complete(
    client: &reqwest::Client,
    endpoint: &LlmEndpoint,
    context: &str,
    system_prompt: &str,
) -> anyhow::Result<(String, u64)> {
    let request = ChatRequest {
        model: &endpoint.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt,
            },
            ChatMessage {
                role: "user",
                content: context,
            },
        ],
        temperature: TEMPERATURE,
    };

    let response = client
        .post(endpoint.completions_url())
        .bearer_auth(endpoint.api_key.expose())
        .timeout(REQUEST_TIMEOUT)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API request failed with status {}: {}", status, body);
    }

    let parsed: ChatResponse = response.json().await?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("response contained no message"))?;
    let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);

    Ok((content, tokens))
}
