//! Chat-completion client abstraction.

pub mod json;
pub mod openai;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;

pub use json::{extract_json, extract_json_any, has_any_key};
pub use openai::{LlmError, OpenAiClient};

/// Selects the model and output budget for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatPurpose {
    General,
    Translation,
    /// Short chapter summaries.
    Summary,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatResult {
    pub text: String,
    /// The provider stopped because the output budget ran out.
    pub truncated: bool,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat_ext(
        &self,
        system: &str,
        user: &str,
        purpose: ChatPurpose,
    ) -> anyhow::Result<ChatResult>;

    async fn chat(&self, system: &str, user: &str, purpose: ChatPurpose) -> anyhow::Result<String> {
        Ok(self.chat_ext(system, user, purpose).await?.text)
    }

    /// Best-effort JSON object from the model.
    ///
    /// When none of `required_keys` is present the request is retried once with an
    /// explicit JSON-only instruction; if that also fails the partial object is returned.
    async fn chat_json(
        &self,
        system: &str,
        user: &str,
        required_keys: &[&str],
    ) -> anyhow::Result<serde_json::Value> {
        let raw = self.chat(system, user, ChatPurpose::General).await?;
        let first = extract_json(&raw);
        if required_keys.is_empty() || has_any_key(&first, required_keys) {
            return Ok(first);
        }
        tracing::warn!(raw_len = raw.len(), "no required JSON keys in response, retrying");
        let retry = format!(
            "Your previous response could not be parsed as JSON. Respond with ONLY a valid JSON \
object: no markdown, no code fences, no explanatory text.\n\nOriginal request:\n{user}"
        );
        let raw2 = self.chat(system, &retry, ChatPurpose::General).await?;
        let mut second = extract_json(&raw2);
        if has_any_key(&second, required_keys) {
            return Ok(second);
        }
        tracing::error!("JSON retry failed, returning partial result");
        if let Some(obj) = second.as_object_mut() {
            obj.insert("raw_response".to_string(), serde_json::Value::String(raw));
        }
        Ok(second)
    }

    /// Web-grounded call. Clients without a search backend pass the queries along as
    /// research hints and rely on the model's own knowledge.
    async fn chat_with_search(
        &self,
        system: &str,
        user: &str,
        queries: &[String],
    ) -> anyhow::Result<String> {
        if queries.is_empty() {
            return self.chat(system, user, ChatPurpose::General).await;
        }
        let hints = queries
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "=== RESEARCH TOPICS ===\nNo live web results are available. Answer from your own \
knowledge of these topics and say so where you are unsure:\n{hints}\n=== END ===\n\n{user}"
        );
        self.chat(system, &prompt, ChatPurpose::General).await
    }
}
