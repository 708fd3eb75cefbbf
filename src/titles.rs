//! Chapter title translation, a few titles per request.

use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::Value;

use crate::llm::{extract_json_any, ChatClient, ChatPurpose};
use crate::model::Chapter;
use crate::pipeline::prompts::render_template;

pub const TITLE_BATCH_SIZE: usize = 5;

/// Reads `[{"index": 0, "translated_title": "..."}]` as well as the keyed shapes
/// `{"0": "..."}` and `{"0": {"translated_title": "..."}}`.
pub fn parse_title_reply(v: &Value) -> BTreeMap<usize, String> {
    let mut out = BTreeMap::new();
    let mut keep = |index: Option<usize>, title: Option<&str>| {
        if let (Some(i), Some(t)) = (index, title.map(str::trim)) {
            if !t.is_empty() {
                out.insert(i, t.to_string());
            }
        }
    };
    match v {
        Value::Array(items) => {
            for item in items {
                keep(
                    item.get("index").and_then(index_of),
                    item.get("translated_title").and_then(Value::as_str),
                );
            }
        }
        Value::Object(map) => {
            for (key, val) in map {
                let title = match val {
                    Value::String(s) => Some(s.as_str()),
                    other => other.get("translated_title").and_then(Value::as_str),
                };
                keep(key.trim().parse().ok(), title);
            }
        }
        _ => {}
    }
    out
}

fn index_of(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn title_user_prompt(batch: &[&Chapter]) -> String {
    let lines: Vec<String> = batch
        .iter()
        .map(|c| format!("{}: {}", c.index, c.title))
        .collect();
    format!("Translate these chapter titles:\n{}", lines.join("\n"))
}

pub struct TitleTranslator<'a> {
    pub client: &'a dyn ChatClient,
    pub system_template: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
}

impl TitleTranslator<'_> {
    /// Chapter index -> translated title over every batch that produced something.
    /// A batch that fails or stays unparseable after one retry is skipped.
    pub async fn translate(&self, chapters: &[Chapter]) -> BTreeMap<usize, String> {
        let system = render_template(
            self.system_template,
            &[("source_lang", self.source_lang), ("target_lang", self.target_lang)],
        );
        let titled: Vec<&Chapter> = chapters.iter().filter(|c| !c.title.trim().is_empty()).collect();
        let batches: Vec<&[&Chapter]> = titled.chunks(TITLE_BATCH_SIZE).collect();
        tracing::info!(titles = titled.len(), batches = batches.len(), "translating chapter titles");

        let mut out = BTreeMap::new();
        for (n, batch) in batches.iter().enumerate() {
            match self.batch(&system, batch).await {
                Ok(found) if !found.is_empty() => out.extend(found),
                Ok(_) => tracing::warn!(batch = n + 1, "title batch gave no usable titles"),
                Err(e) => tracing::warn!(batch = n + 1, error = %e, "title batch failed"),
            }
        }
        out
    }

    async fn batch(&self, system: &str, batch: &[&Chapter]) -> anyhow::Result<BTreeMap<usize, String>> {
        let user = title_user_prompt(batch);
        let raw = self
            .client
            .chat(system, &user, ChatPurpose::General)
            .await
            .context("translate titles")?;
        let parsed = extract_json_any(&raw).map(|v| parse_title_reply(&v)).unwrap_or_default();
        if !parsed.is_empty() {
            return Ok(parsed);
        }
        tracing::warn!(raw_len = raw.len(), "title reply not parseable, retrying");
        let retry = format!(
            "Your previous response could not be parsed. Respond with ONLY the JSON array: no \
markdown, no code fences, no explanatory text.\n\n{user}"
        );
        let raw = self
            .client
            .chat(system, &retry, ChatPurpose::General)
            .await
            .context("translate titles (retry)")?;
        Ok(extract_json_any(&raw).map(|v| parse_title_reply(&v)).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::mock::{Reply, ScriptedClient};

    #[test]
    fn list_shape() {
        let v = json!([
            {"index": 0, "translated_title": " 第一章 "},
            {"index": "1", "translated_title": "第二章"},
            {"index": 2, "translated_title": ""},
            {"translated_title": "no index"},
            "stray"
        ]);
        let m = parse_title_reply(&v);
        assert_eq!(m.len(), 2);
        assert_eq!(m[&0], "第一章");
        assert_eq!(m[&1], "第二章");
    }

    #[test]
    fn keyed_shape() {
        let v = json!({
            "3": "第四章",
            "4": {"translated_title": "第五章"},
            "titles": "ignored",
            "5": {"title": "wrong key"}
        });
        let m = parse_title_reply(&v);
        assert_eq!(m, BTreeMap::from([(3, "第四章".to_string()), (4, "第五章".to_string())]));
    }

    fn chapters(n: usize) -> Vec<Chapter> {
        (0..n)
            .map(|i| Chapter::new("p", i, format!("Chapter {}", i + 1), "x"))
            .collect()
    }

    #[tokio::test]
    async fn batches_of_five_with_retry_on_garbage() {
        let client = ScriptedClient::new(|n, call| {
            if n == 0 {
                return Reply::text("I cannot do that");
            }
            let indices: Vec<usize> = call
                .user
                .lines()
                .filter_map(|l| l.split_once(": ")?.0.parse().ok())
                .collect();
            let items: Vec<String> = indices
                .iter()
                .map(|i| format!(r#"{{"index": {i}, "translated_title": "第{}章"}}"#, i + 1))
                .collect();
            Reply::text(format!("```json\n[{}]\n```", items.join(",")))
        });
        let chapters = chapters(7);
        let out = TitleTranslator {
            client: &client,
            system_template: "{{source_lang}} -> {{target_lang}}",
            source_lang: "English",
            target_lang: "简体中文",
        }
        .translate(&chapters)
        .await;
        assert_eq!(out.len(), 7);
        assert_eq!(out[&6], "第7章");
        let calls = client.calls();
        // First batch retried once, second batch answered directly.
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].system, "English -> 简体中文");
        assert!(calls[0].user.starts_with("Translate these chapter titles:\n0: Chapter 1\n"));
        assert!(calls[1].user.contains("could not be parsed"));
        assert!(calls[2].user.contains("5: Chapter 6\n6: Chapter 7"));
    }
}
