//! Reader questions about the translation, answered with the book's analysis, strategy
//! and the passage around the reader's selection.

use anyhow::Context;

use crate::error::EngineError;
use crate::llm::ChatClient;
use crate::model::{Analysis, Strategy};
use crate::pipeline::prompts::render_template;
use crate::store::{ProjectDoc, Store};
use crate::textutil::{char_len, head_chars};

/// Words of surrounding text sent with a selection.
pub const CONTEXT_WORDS: usize = 300;
const SELECTION_CHARS: usize = 500;
const ANALYSIS_FIELD_CHARS: usize = 200;
const CHARACTERS_CHARS: usize = 300;
const RESEARCH_CHARS: usize = 500;
const GLOSSARY_TERMS: usize = 30;

#[derive(Clone, Debug, Default)]
pub struct Question {
    pub text: String,
    pub chapter_id: Option<String>,
    pub selected_original: Option<String>,
    pub selected_translation: Option<String>,
}

/// About `window` words of `full` around the first place `selected` occurs, starting a
/// quarter window before it. Empty when the selection cannot be located.
pub fn nearby_context(full: &str, selected: &str, window: usize) -> String {
    if full.is_empty() || selected.trim().is_empty() {
        return String::new();
    }
    let Some(pos) = [60, 30]
        .into_iter()
        .find_map(|n| full.find(head_chars(selected, n)))
    else {
        return String::new();
    };
    let pos = char_len(&full[..pos]);
    let words: Vec<&str> = full.split_whitespace().collect();
    let mut seen = 0usize;
    let mut start = 0usize;
    for (i, w) in words.iter().enumerate() {
        seen += char_len(w) + 1;
        if seen > pos {
            start = i.saturating_sub(window / 4);
            break;
        }
    }
    let end = (start + window).min(words.len());
    words[start..end].join(" ")
}

fn clip(s: &str, n: usize) -> &str {
    head_chars(s.trim(), n)
}

fn analysis_block(a: &Analysis) -> Option<String> {
    let themes = a.themes.join(", ");
    let mut parts: Vec<String> = [
        ("genre", a.genre.as_str()),
        ("writing_style", a.writing_style.as_str()),
        ("themes", themes.as_str()),
        ("cultural_notes", a.cultural_notes.as_str()),
    ]
    .into_iter()
    .filter(|(_, v)| !v.trim().is_empty())
    .map(|(k, v)| format!("{k}: {}", clip(v, ANALYSIS_FIELD_CHARS)))
    .collect();
    let characters = a
        .characters
        .iter()
        .map(|c| format!("{} ({})", c.name, c.description))
        .collect::<Vec<_>>()
        .join("; ");
    if !characters.is_empty() {
        parts.push(format!("characters: {}", clip(&characters, CHARACTERS_CHARS)));
    }
    if !a.research_report.trim().is_empty() {
        parts.push(format!("research summary: {}", clip(&a.research_report, RESEARCH_CHARS)));
    }
    (!parts.is_empty()).then(|| format!("=== Book Analysis ===\n{}", parts.join("\n")))
}

fn strategy_block(s: &Strategy) -> Option<String> {
    let mut parts: Vec<String> = [
        ("overall_approach", &s.overall_approach),
        ("tone_and_style", &s.tone_and_style),
        ("cultural_adaptation", &s.cultural_adaptation),
    ]
    .into_iter()
    .filter(|(_, v)| !v.trim().is_empty())
    .map(|(k, v)| format!("{k}: {}", v.trim()))
    .collect();
    let names: Vec<String> = s
        .character_names
        .iter()
        .map(|n| format!("{}→{}", n.original, n.translated))
        .collect();
    if !names.is_empty() {
        parts.push(format!("names: {}", names.join("; ")));
    }
    let terms: Vec<String> = s
        .glossary
        .iter()
        .take(GLOSSARY_TERMS)
        .map(|g| format!("{}→{}", g.source, g.target))
        .collect();
    if !terms.is_empty() {
        parts.push(format!("glossary: {}", terms.join("; ")));
    }
    if !s.special_considerations.trim().is_empty() {
        parts.push(format!("constraints: {}", s.special_considerations.trim()));
    }
    (!parts.is_empty()).then(|| format!("=== Translation Strategy ===\n{}", parts.join("\n")))
}

/// The user prompt: chapter and selection context, background, then the question.
pub fn question_prompt(doc: &ProjectDoc, q: &Question) -> anyhow::Result<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(id) = q.chapter_id.as_deref() {
        let ch = doc
            .chapters
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::not_found("chapter", id))?;
        parts.push(format!("Chapter: {}", ch.title));
        if let Some(sel) = q.selected_original.as_deref() {
            let nearby = nearby_context(&ch.source_text, sel, CONTEXT_WORDS);
            if !nearby.is_empty() {
                parts.push(format!("Nearby original context: …{nearby}…"));
            }
        }
        if let (Some(sel), Some(text)) = (q.selected_translation.as_deref(), ch.translation()) {
            let nearby = nearby_context(text, sel, CONTEXT_WORDS);
            if !nearby.is_empty() {
                parts.push(format!("Nearby translated context: …{nearby}…"));
            }
        }
    }
    if let Some(sel) = q.selected_original.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(format!("Selected original: {}", clip(sel, SELECTION_CHARS)));
    }
    if let Some(sel) = q.selected_translation.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(format!("Selected translation: {}", clip(sel, SELECTION_CHARS)));
    }
    parts.extend(doc.analysis.as_ref().and_then(analysis_block));
    parts.extend(doc.strategy.as_ref().and_then(strategy_block));
    Ok(format!("{}\n\nQuestion: {}", parts.join("\n"), q.text.trim()))
}

pub struct Consultant<'a> {
    pub store: &'a dyn Store,
    pub client: &'a dyn ChatClient,
    pub system_template: &'a str,
}

impl Consultant<'_> {
    pub async fn ask(&self, project_id: &str, q: &Question) -> anyhow::Result<String> {
        let question = q.text.trim();
        if question.is_empty() {
            return Err(EngineError::Precondition("question must not be empty".to_string()).into());
        }
        let doc = self.store.load(project_id)?;
        let author = doc
            .analysis
            .as_ref()
            .map(|a| a.author.trim())
            .filter(|a| !a.is_empty())
            .unwrap_or("Unknown");
        let system = render_template(
            self.system_template,
            &[
                ("book_title", &doc.project.name),
                ("author", author),
                ("source_lang", &doc.project.source_language),
                ("target_lang", &doc.project.target_language),
            ],
        );
        let user = question_prompt(&doc, q)?;
        let answer = self
            .client
            .chat_with_search(&system, &user, &[question.to_string()])
            .await
            .context("answer question")?;
        tracing::info!(project = %project_id, chars = char_len(&answer), "question answered");
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{Reply, ScriptedClient};
    use crate::model::{ChapterUpdate, GlossaryEntry};
    use crate::pipeline::prompts::PromptSet;
    use crate::store::testutil::seed;
    use crate::store::MemoryStore;

    #[test]
    fn window_starts_a_quarter_before_the_selection() {
        let full: String = (0..100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let out = nearby_context(&full, "w50 w51", 8);
        let words: Vec<&str> = out.split(' ').collect();
        assert_eq!(words.len(), 8);
        assert_eq!(words[0], "w48");
        assert!(words.contains(&"w50"));
    }

    #[test]
    fn missing_selection_gives_nothing() {
        assert_eq!(nearby_context("alpha beta", "gamma", 10), "");
        assert_eq!(nearby_context("", "alpha", 10), "");
        // Only the first 30 chars need to match.
        let full = format!("intro {} tail", "x".repeat(40));
        let sel = format!("{}CHANGED", "x".repeat(30));
        assert!(!nearby_context(&full, &sel, 10).is_empty());
    }

    #[tokio::test]
    async fn question_carries_selection_and_background() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["The hound howled across the moor at night."]);
        store
            .update_chapter(
                &pid,
                &ids[0],
                ChapterUpdate {
                    translated_text: Some(Some("猎犬 在 夜里 的 荒原 上 嚎叫。".to_string())),
                    ..ChapterUpdate::default()
                },
            )
            .unwrap();
        store
            .save_strategy(
                &pid,
                Strategy {
                    overall_approach: "faithful".into(),
                    glossary: vec![GlossaryEntry {
                        source: "moor".into(),
                        target: "荒原".into(),
                        context: String::new(),
                    }],
                    ..Strategy::default()
                },
            )
            .unwrap();
        let client = ScriptedClient::new(|_, _| Reply::text(" 因为“荒原”更贴切。 "));
        let prompts = PromptSet::builtin();
        let answer = Consultant {
            store: &store,
            client: &client,
            system_template: &prompts.qa_system,
        }
        .ask(
            &pid,
            &Question {
                text: "Why 荒原?".into(),
                chapter_id: Some(ids[0].clone()),
                selected_original: Some("moor".into()),
                selected_translation: Some("荒原".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(answer, "因为“荒原”更贴切。");

        let call = &client.calls()[0];
        assert!(call.system.contains("\"Test Book\" by Unknown"));
        assert!(call.system.ends_with("Respond in 简体中文."));
        assert!(call.user.contains("Chapter: Chapter 1"));
        assert!(call.user.contains("Nearby original context: …The hound howled across the moor"));
        assert!(call.user.contains("Nearby translated context: …猎犬 在 夜里"));
        assert!(call.user.contains("Selected translation: 荒原"));
        assert!(call.user.contains("glossary: moor→荒原"));
        assert!(call.user.ends_with("\n\nQuestion: Why 荒原?"));
    }

    #[tokio::test]
    async fn empty_question_and_unknown_chapter_are_rejected() {
        let store = MemoryStore::new();
        let (pid, _) = seed(&store, &["x"]);
        let client = ScriptedClient::echo();
        let c = Consultant {
            store: &store,
            client: &client,
            system_template: "",
        };
        let err = c.ask(&pid, &Question::default()).await.unwrap_err();
        assert!(matches!(crate::error::engine_error(&err), Some(EngineError::Precondition(_))));
        let q = Question {
            text: "why?".into(),
            chapter_id: Some("nope".into()),
            ..Question::default()
        };
        let err = c.ask(&pid, &q).await.unwrap_err();
        assert!(matches!(crate::error::engine_error(&err), Some(EngineError::NotFound { .. })));
        assert_eq!(client.call_count(), 0);
    }
}
