//! Recovery from responses cut off by the provider's output limit.

use crate::llm::{ChatClient, ChatPurpose};
use crate::pipeline::prompts::{render_template, PromptSet};
use crate::textutil::{char_len, skip_chars, tail_chars};

const TAIL_ANCHOR_CHARS: usize = 500;
const MAX_DONE_RATIO: f64 = 0.95;
/// Backs the resume point off so source text is re-sent rather than skipped.
const RESUME_SAFETY: f64 = 0.9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovered {
    pub text: String,
    pub continuations: usize,
    /// The last response was still truncated when attempts ran out.
    pub incomplete: bool,
}

pub struct ContinuationLoop<'a> {
    pub client: &'a dyn ChatClient,
    pub prompts: &'a PromptSet,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub max_attempts: usize,
}

impl ContinuationLoop<'_> {
    /// Sends the chunk and keeps asking for continuations while the reply is truncated.
    ///
    /// Running out of attempts is not an error; whatever text exists is returned.
    pub async fn translate(
        &self,
        system: &str,
        user: &str,
        source: &str,
    ) -> anyhow::Result<Recovered> {
        let first = self
            .client
            .chat_ext(system, user, ChatPurpose::Translation)
            .await?;
        let mut text = first.text;
        let mut truncated = first.truncated;
        let mut continuations = 0usize;

        if !truncated {
            return Ok(Recovered {
                text,
                continuations,
                incomplete: false,
            });
        }

        let cont_system = render_template(
            &self.prompts.continuation_system,
            &[
                ("source_lang", self.source_lang),
                ("target_lang", self.target_lang),
            ],
        );

        for attempt in 1..=self.max_attempts {
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                translated_chars = char_len(&text),
                "translation truncated, requesting continuation"
            );
            let tail = tail_chars(&text, TAIL_ANCHOR_CHARS);
            let start = resume_offset(char_len(&text), char_len(source));
            let remaining = skip_chars(source, start);
            let cont_user = render_template(
                &self.prompts.continuation_user,
                &[("tail", tail), ("remaining", remaining)],
            );

            let next = self
                .client
                .chat_ext(&cont_system, &cont_user, ChatPurpose::Translation)
                .await?;
            text.push('\n');
            text.push_str(&next.text);
            continuations += 1;
            truncated = next.truncated;
            if !truncated {
                break;
            }
        }

        if truncated {
            tracing::warn!(
                attempts = continuations,
                "continuation attempts exhausted, accepting partial translation"
            );
        }
        Ok(Recovered {
            text,
            continuations,
            incomplete: truncated,
        })
    }
}

/// Character offset in the source from which a continuation resends text.
///
/// Progress is estimated from output length, capped, then backed off.
pub fn resume_offset(translated_chars: usize, source_chars: usize) -> usize {
    let ratio = translated_chars as f64 / source_chars.max(1) as f64;
    let done = ratio.min(MAX_DONE_RATIO);
    (source_chars as f64 * done * RESUME_SAFETY) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{Reply, ScriptedClient};

    fn looper<'a>(client: &'a ScriptedClient, prompts: &'a PromptSet, max: usize) -> ContinuationLoop<'a> {
        ContinuationLoop {
            client,
            prompts,
            source_lang: "English",
            target_lang: "中文",
            max_attempts: max,
        }
    }

    #[test]
    fn resume_offset_is_conservative() {
        assert_eq!(resume_offset(500, 1000), 450);
        // Capped at 95% even when the output is longer than the source.
        assert_eq!(resume_offset(5000, 1000), 855);
        assert_eq!(resume_offset(0, 0), 0);
    }

    #[tokio::test]
    async fn untruncated_reply_returns_immediately() {
        let client = ScriptedClient::new(|_, _| Reply::text("完整"));
        let prompts = PromptSet::builtin();
        let r = looper(&client, &prompts, 3).translate("s", "u", "src").await.unwrap();
        assert_eq!(r.text, "完整");
        assert_eq!(r.continuations, 0);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn continuation_appends_until_complete() {
        let client = ScriptedClient::new(|n, _| match n {
            0 => Reply::truncated("前半"),
            1 => Reply::truncated("中段"),
            _ => Reply::text("后半"),
        });
        let prompts = PromptSet::builtin();
        let r = looper(&client, &prompts, 5).translate("s", "u", "source text").await.unwrap();
        assert_eq!(r.text, "前半\n中段\n后半");
        assert_eq!(r.continuations, 2);
        assert!(!r.incomplete);
        let calls = client.calls();
        assert!(calls[1].user.contains("...前半"));
        assert!(calls[1].system.contains("cut off"));
    }

    #[tokio::test]
    async fn always_truncated_stops_after_max_attempts() {
        let client = ScriptedClient::new(|_, _| Reply::truncated("x"));
        let prompts = PromptSet::builtin();
        let r = looper(&client, &prompts, 3).translate("s", "u", "source").await.unwrap();
        assert_eq!(client.call_count(), 4);
        assert_eq!(r.continuations, 3);
        assert!(r.incomplete);
        assert_eq!(r.text, "x\nx\nx\nx");
    }

    #[tokio::test]
    async fn zero_attempts_accepts_first_reply() {
        let client = ScriptedClient::new(|_, _| Reply::truncated("半"));
        let prompts = PromptSet::builtin();
        let r = looper(&client, &prompts, 0).translate("s", "u", "source").await.unwrap();
        assert_eq!(client.call_count(), 1);
        assert!(r.incomplete);
    }

    #[tokio::test]
    async fn remaining_source_starts_near_estimated_progress() {
        let source = "abcdefghij".repeat(10);
        let client = ScriptedClient::new(|n, _| match n {
            0 => Reply::truncated("y".repeat(50)),
            _ => Reply::text("z"),
        });
        let prompts = PromptSet::builtin();
        looper(&client, &prompts, 2).translate("s", "u", &source).await.unwrap();
        let user = &client.calls()[1].user;
        // 50/100 done, backed off to offset 45.
        assert!(user.contains(&source[45..]));
        assert!(!user.contains(&source[44..]));
    }
}
