//! Common trait for LLM API clients
//!
//! Abstracts over different LLM providers (DeepSeek, OpenAI)
//! so the pipeline stages can work with any backend.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for LLM clients that can generate text responses.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request and get the raw text response.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Send a chat request expecting a JSON response.
    /// Providers that support a JSON response mode enable it here.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;

    /// Get the provider name (e.g., "deepseek", "openai").
    fn provider_name(&self) -> &str;
}

/// Strip markdown code blocks from LLM output.
///
/// Models sometimes wrap their answer in ```sql ... ``` fences even
/// when told not to. This removes the fences, keeping the content.
pub fn strip_code_blocks(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() > 2 {
            // Remove first line (```sql or similar) and last line (```)
            let content_lines = &lines[1..lines.len() - 1];
            return content_lines.join("\n").trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Extract a JSON object from a response that may contain markdown fences
/// or surrounding prose.
pub fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    // Handle ```json ... ``` fences
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return after_marker[..end].trim().to_string();
        }
    }

    // Handle plain ``` fences
    if trimmed.starts_with("```") {
        return strip_code_blocks(trimmed);
    }

    // Find the outermost JSON object in surrounding prose
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
