//! Scriptable chat client for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatClient, ChatPurpose, ChatResult};

#[derive(Clone, Debug)]
pub struct Call {
    pub system: String,
    pub user: String,
    pub purpose: ChatPurpose,
}

#[derive(Clone, Debug, Default)]
pub struct Reply {
    pub text: String,
    pub truncated: bool,
    pub delay: Duration,
    pub error: Option<String>,
}

impl Reply {
    pub fn text(t: impl Into<String>) -> Self {
        Self {
            text: t.into(),
            ..Self::default()
        }
    }

    pub fn truncated(t: impl Into<String>) -> Self {
        Self {
            text: t.into(),
            truncated: true,
            ..Self::default()
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::default()
        }
    }

    pub fn after_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}

type Responder = Box<dyn Fn(usize, &Call) -> Reply + Send + Sync>;

/// Answers every call through a closure that sees the call number (0-based) and prompts.
pub struct ScriptedClient {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
    count: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(f: impl Fn(usize, &Call) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Translates a chunk by tagging its body: `译[<body>]`. Other calls get `summary`.
    pub fn echo() -> Self {
        Self::new(|_, call| match call.purpose {
            ChatPurpose::Translation => Reply::text(format!("译[{}]", chunk_body(&call.user))),
            _ => Reply::text("summary"),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn translation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.purpose == ChatPurpose::Translation)
            .collect()
    }
}

/// The source text of a translation user prompt (everything after the chunk header).
pub fn chunk_body(user: &str) -> &str {
    const MARK: &str = "── Chapter to Translate: ";
    let Some(pos) = user.find(MARK) else {
        return user;
    };
    let rest = &user[pos..];
    match rest.find("\n\n") {
        Some(i) => &rest[i + 2..],
        None => "",
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat_ext(
        &self,
        system: &str,
        user: &str,
        purpose: ChatPurpose,
    ) -> anyhow::Result<ChatResult> {
        let call = Call {
            system: system.to_string(),
            user: user.to_string(),
            purpose,
        };
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        let reply = (self.responder)(n, &call);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        if let Some(e) = reply.error {
            anyhow::bail!(e);
        }
        Ok(ChatResult {
            text: reply.text,
            truncated: reply.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_json_retries_once_then_returns_partial() {
        let client = ScriptedClient::new(|n, _| match n {
            0 => Reply::text("not json"),
            _ => Reply::text("still not json"),
        });
        let v = client.chat_json("s", "u", &["names"]).await.unwrap();
        assert_eq!(client.call_count(), 2);
        assert!(v.get("names").is_none());
        assert_eq!(v["raw_response"], "not json");
        assert!(client.calls()[1].user.contains("could not be parsed as JSON"));
    }

    #[tokio::test]
    async fn chat_json_accepts_retry() {
        let client = ScriptedClient::new(|n, _| match n {
            0 => Reply::text("oops"),
            _ => Reply::text(r#"{"names": []}"#),
        });
        let v = client.chat_json("s", "u", &["names"]).await.unwrap();
        assert!(v["names"].is_array());
    }

    #[tokio::test]
    async fn search_falls_back_to_hints() {
        let client = ScriptedClient::new(|_, _| Reply::text("ok"));
        let out = client
            .chat_with_search("s", "who wrote it?", &["author of X".to_string()])
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert!(client.calls()[0].user.contains("- author of X"));
    }

    #[test]
    fn chunk_body_extraction() {
        let user = "ctx\n── Chapter to Translate: One (part 1/2) ──\n\nHello.\n\nWorld.";
        assert_eq!(chunk_body(user), "Hello.\n\nWorld.");
    }
}
