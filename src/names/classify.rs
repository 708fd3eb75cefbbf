//! LLM review of name candidates: keep real names, collect known renderings.

use std::collections::HashMap;

use serde::Deserialize;

use crate::llm::ChatClient;
use crate::pipeline::prompts::{render_template, PromptSet};

const CLASSIFY_SYSTEM: &str =
    "You are a careful editor of literary translations. Respond with JSON only.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub is_name: bool,
    pub variants: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictItem {
    #[serde(default)]
    name: String,
    #[serde(default = "default_true")]
    is_name: bool,
    #[serde(default)]
    variants: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Verdicts keyed by lowercased name, plus how many batches failed.
#[derive(Clone, Debug, Default)]
pub struct Verdicts {
    by_name: HashMap<String, Verdict>,
    pub failed_batches: usize,
}

impl Verdicts {
    pub fn get(&self, name: &str) -> Option<&Verdict> {
        self.by_name.get(&name.to_lowercase())
    }
}

pub struct NameClassifier<'a> {
    pub client: &'a dyn ChatClient,
    pub prompts: &'a PromptSet,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub batch_size: usize,
}

impl NameClassifier<'_> {
    /// Classifies in fixed-size batches. A batch whose call fails or whose reply cannot
    /// be read is logged and skipped; its names simply get no verdict.
    pub async fn classify(&self, candidates: &[String]) -> Verdicts {
        let mut out = Verdicts::default();
        for (batch_no, batch) in candidates.chunks(self.batch_size.max(1)).enumerate() {
            let list = batch
                .iter()
                .map(|n| format!("- {n}"))
                .collect::<Vec<_>>()
                .join("\n");
            let user = render_template(
                &self.prompts.classify_names,
                &[
                    ("source_lang", self.source_lang),
                    ("target_lang", self.target_lang),
                    ("candidates", &list),
                ],
            );
            let value = match self.client.chat_json(CLASSIFY_SYSTEM, &user, &["names"]).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(batch = batch_no + 1, error = %e, "name classification failed");
                    out.failed_batches += 1;
                    continue;
                }
            };
            let items = value
                .get("names")
                .cloned()
                .map(serde_json::from_value::<Vec<VerdictItem>>);
            let items = match items {
                Some(Ok(items)) => items,
                Some(Err(e)) => {
                    tracing::warn!(batch = batch_no + 1, error = %e, "malformed classification");
                    out.failed_batches += 1;
                    continue;
                }
                None => {
                    tracing::warn!(batch = batch_no + 1, "classification reply has no names");
                    out.failed_batches += 1;
                    continue;
                }
            };
            for item in items {
                let key = item.name.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                let variants = item
                    .variants
                    .into_iter()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                out.by_name.insert(
                    key,
                    Verdict {
                        is_name: item.is_name,
                        variants,
                    },
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{Reply, ScriptedClient};

    fn classifier<'a>(client: &'a ScriptedClient, prompts: &'a PromptSet, batch: usize) -> NameClassifier<'a> {
        NameClassifier {
            client,
            prompts,
            source_lang: "English",
            target_lang: "简体中文",
            batch_size: batch,
        }
    }

    #[tokio::test]
    async fn merges_verdicts_case_insensitively() {
        let client = ScriptedClient::new(|_, _| {
            Reply::text(
                r#"{"names":[{"name":"HOLMES","is_name":true,"variants":["福尔摩斯"," "]},
                             {"name":"Baker","is_name":false}]}"#,
            )
        });
        let prompts = PromptSet::builtin();
        let v = classifier(&client, &prompts, 40)
            .classify(&["Holmes".into(), "Baker".into()])
            .await;
        assert_eq!(v.get("holmes").unwrap().variants, vec!["福尔摩斯".to_string()]);
        assert!(!v.get("Baker").unwrap().is_name);
        assert_eq!(v.failed_batches, 0);
        assert!(client.calls()[0].user.contains("- Holmes\n- Baker"));
    }

    #[tokio::test]
    async fn bad_batch_is_skipped_not_fatal() {
        let client = ScriptedClient::new(|n, call| {
            if call.user.contains("- Watson") {
                Reply::text(r#"{"names":[{"name":"Watson","is_name":true,"variants":["华生"]}]}"#)
            } else if n < 10 {
                Reply::fail("provider down")
            } else {
                Reply::text("{}")
            }
        });
        let prompts = PromptSet::builtin();
        let v = classifier(&client, &prompts, 1)
            .classify(&["Holmes".into(), "Watson".into()])
            .await;
        assert_eq!(v.failed_batches, 1);
        assert!(v.get("Holmes").is_none());
        assert_eq!(v.get("Watson").unwrap().variants, vec!["华生".to_string()]);
    }
}
