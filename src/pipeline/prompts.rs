use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;
use crate::model::{AnnotationDensity, Chapter, Strategy};
use crate::pipeline::postprocess::ANNOTATION_SEPARATOR;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_TRANSLATE_SYSTEM: &str = "translate_system.txt";
pub const DEFAULT_TRANSLATE_USER: &str = "translate_user.txt";
pub const DEFAULT_CONTINUATION_SYSTEM: &str = "continuation_system.txt";
pub const DEFAULT_CONTINUATION_USER: &str = "continuation_user.txt";
pub const DEFAULT_SUMMARY_SYSTEM: &str = "summary_system.txt";
pub const DEFAULT_CLASSIFY_NAMES: &str = "classify_names.txt";
pub const DEFAULT_ANALYSIS_SYSTEM: &str = "analysis_system.txt";
pub const DEFAULT_STRATEGY_SYSTEM: &str = "strategy_system.txt";
pub const DEFAULT_TITLE_SYSTEM: &str = "title_system.txt";
pub const DEFAULT_QA_SYSTEM: &str = "qa_system.txt";

#[derive(Clone, Debug)]
pub struct PromptSet {
    pub translate_system: String,
    pub translate_user: String,
    pub continuation_system: String,
    pub continuation_user: String,
    pub summary_system: String,
    pub classify_names: String,
    pub analysis_system: String,
    pub strategy_system: String,
    pub title_system: String,
    pub qa_system: String,
}

impl PromptSet {
    pub fn builtin() -> Self {
        Self {
            translate_system: DEFAULT_TRANSLATE_SYSTEM_TEXT.to_string(),
            translate_user: DEFAULT_TRANSLATE_USER_TEXT.to_string(),
            continuation_system: DEFAULT_CONTINUATION_SYSTEM_TEXT.to_string(),
            continuation_user: DEFAULT_CONTINUATION_USER_TEXT.to_string(),
            summary_system: DEFAULT_SUMMARY_SYSTEM_TEXT.to_string(),
            classify_names: DEFAULT_CLASSIFY_NAMES_TEXT.to_string(),
            analysis_system: DEFAULT_ANALYSIS_SYSTEM_TEXT.to_string(),
            strategy_system: DEFAULT_STRATEGY_SYSTEM_TEXT.to_string(),
            title_system: DEFAULT_TITLE_SYSTEM_TEXT.to_string(),
            qa_system: DEFAULT_QA_SYSTEM_TEXT.to_string(),
        }
    }

    /// Loads overrides relative to `config_dir`. Prompts without a configured
    /// path use `prompts/<default file>` when present, else the built-in text.
    pub fn load(config_dir: &Path, p: &PromptsSection) -> anyhow::Result<Self> {
        let b = Self::builtin();
        Ok(Self {
            translate_system: read_prompt(
                config_dir,
                p.translate_system.as_deref(),
                "translate_system",
                DEFAULT_TRANSLATE_SYSTEM,
                b.translate_system,
            )?,
            translate_user: read_prompt(
                config_dir,
                p.translate_user.as_deref(),
                "translate_user",
                DEFAULT_TRANSLATE_USER,
                b.translate_user,
            )?,
            continuation_system: read_prompt(
                config_dir,
                p.continuation_system.as_deref(),
                "continuation_system",
                DEFAULT_CONTINUATION_SYSTEM,
                b.continuation_system,
            )?,
            continuation_user: read_prompt(
                config_dir,
                p.continuation_user.as_deref(),
                "continuation_user",
                DEFAULT_CONTINUATION_USER,
                b.continuation_user,
            )?,
            summary_system: read_prompt(
                config_dir,
                p.summary_system.as_deref(),
                "summary_system",
                DEFAULT_SUMMARY_SYSTEM,
                b.summary_system,
            )?,
            classify_names: read_prompt(
                config_dir,
                p.classify_names.as_deref(),
                "classify_names",
                DEFAULT_CLASSIFY_NAMES,
                b.classify_names,
            )?,
            analysis_system: read_prompt(
                config_dir,
                p.analysis_system.as_deref(),
                "analysis_system",
                DEFAULT_ANALYSIS_SYSTEM,
                b.analysis_system,
            )?,
            strategy_system: read_prompt(
                config_dir,
                p.strategy_system.as_deref(),
                "strategy_system",
                DEFAULT_STRATEGY_SYSTEM,
                b.strategy_system,
            )?,
            title_system: read_prompt(
                config_dir,
                p.title_system.as_deref(),
                "title_system",
                DEFAULT_TITLE_SYSTEM,
                b.title_system,
            )?,
            qa_system: read_prompt(
                config_dir,
                p.qa_system.as_deref(),
                "qa_system",
                DEFAULT_QA_SYSTEM,
                b.qa_system,
            )?,
        })
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

fn read_prompt(
    config_dir: &Path,
    configured: Option<&str>,
    key: &str,
    default_filename: &str,
    builtin: String,
) -> anyhow::Result<String> {
    let explicit = configured.map(str::trim).filter(|s| !s.is_empty());
    let rel = explicit
        .map(str::to_string)
        .unwrap_or_else(|| format!("{DEFAULT_PROMPTS_DIR}/{default_filename}"));

    let mut p = PathBuf::from(rel);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        if explicit.is_some() {
            return Err(anyhow!(
                "prompt file not found for {key}: {} (run: book-translator init-config)",
                p.display()
            ));
        }
        return Ok(builtin);
    }
    let text =
        std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(text)
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_TRANSLATE_SYSTEM, DEFAULT_TRANSLATE_SYSTEM_TEXT),
        (DEFAULT_TRANSLATE_USER, DEFAULT_TRANSLATE_USER_TEXT),
        (DEFAULT_CONTINUATION_SYSTEM, DEFAULT_CONTINUATION_SYSTEM_TEXT),
        (DEFAULT_CONTINUATION_USER, DEFAULT_CONTINUATION_USER_TEXT),
        (DEFAULT_SUMMARY_SYSTEM, DEFAULT_SUMMARY_SYSTEM_TEXT),
        (DEFAULT_CLASSIFY_NAMES, DEFAULT_CLASSIFY_NAMES_TEXT),
        (DEFAULT_ANALYSIS_SYSTEM, DEFAULT_ANALYSIS_SYSTEM_TEXT),
        (DEFAULT_STRATEGY_SYSTEM, DEFAULT_STRATEGY_SYSTEM_TEXT),
        (DEFAULT_TITLE_SYSTEM, DEFAULT_TITLE_SYSTEM_TEXT),
        (DEFAULT_QA_SYSTEM, DEFAULT_QA_SYSTEM_TEXT),
    ]
}

/// Strategy guidance block: approach, style, fixed names and annotation rules.
pub fn strategy_text(s: &Strategy) -> String {
    let mut parts: Vec<String> = Vec::new();
    let fields = [
        ("Approach", &s.overall_approach),
        ("Tone & Style", &s.tone_and_style),
        ("Cultural Adaptation", &s.cultural_adaptation),
        ("Special Considerations", &s.special_considerations),
        ("Custom Instructions", &s.custom_instructions),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            parts.push(format!("{label}: {}", value.trim()));
        }
    }

    let names: Vec<_> = s
        .character_names
        .iter()
        .filter(|n| !n.original.trim().is_empty())
        .collect();
    if !names.is_empty() {
        parts.push("Character Names:".to_string());
        for n in &names {
            parts.push(format!("  {} → {} ({})", n.original, n.translated, n.note));
        }
    }

    let mut rules: Vec<String> = Vec::new();
    if s.annotate_terms {
        rules.push(format!(
            "Term annotations: for place names and terms WITHOUT a widely accepted standard \
translation, append the original in full-width parentheses on its FIRST occurrence in the \
text you receive, e.g. 格林德沃（Grindelwald）. Never annotate countries, major cities or \
terms with an established translation. {}",
            density_rule(s.annotation_density)
        ));
    }
    if s.annotate_names {
        let fixed: Vec<&str> = names.iter().map(|n| n.original.as_str()).collect();
        let mut rule = format!(
            "Name annotations: for non-protagonist character names, append the original in \
full-width parentheses on the FIRST occurrence only, e.g. 默里（Murray）. {}",
            density_rule(s.annotation_density)
        );
        if !fixed.is_empty() {
            rule.push_str(&format!(
                "\nThese names are fixed by the strategy and must NOT be annotated: {}.",
                fixed.join(", ")
            ));
        }
        rules.push(rule);
    }
    if !rules.is_empty() {
        rules.push(format!(
            "After the complete translation, output a line containing exactly {ANNOTATION_SEPARATOR} \
followed by a JSON array listing every item you annotated: \
[{{\"term\": \"original\", \"translation\": \"rendering\", \"note\": \"short note\"}}]. \
Output an empty array [] if nothing was annotated."
        ));
        parts.push("\n── Annotation Rules ──".to_string());
        parts.extend(rules);
    }

    parts.join("\n")
}

fn density_rule(d: AnnotationDensity) -> &'static str {
    match d {
        AnnotationDensity::Light => {
            "Be sparing: annotate only the two or three most important recurring items."
        }
        AnnotationDensity::Normal => {
            "Skip items that appear once in passing or are clearly minor."
        }
        AnnotationDensity::Dense => "Annotate every unfamiliar item on its first occurrence.",
    }
}

pub fn glossary_text(s: &Strategy) -> String {
    let lines: Vec<String> = s
        .glossary
        .iter()
        .filter(|g| !g.source.trim().is_empty())
        .map(|g| format!("  {} → {}  [{}]", g.source, g.target, g.context))
        .collect();
    if lines.is_empty() {
        "(no glossary entries)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Summaries of up to `limit` chapters preceding `current_index`, oldest first.
pub fn context_section(chapters: &[Chapter], current_index: usize, limit: usize) -> String {
    let prev: Vec<&Chapter> = chapters
        .iter()
        .filter(|c| c.index < current_index && c.has_summary())
        .collect();
    if prev.is_empty() || limit == 0 {
        return String::new();
    }
    let start = prev.len().saturating_sub(limit);
    let mut out = String::from("── Context from Previous Chapters ──\n\n");
    for c in &prev[start..] {
        out.push_str(&format!(
            "Chapter {} ({}): {}\n\n",
            c.index + 1,
            c.title,
            c.summary.as_deref().unwrap_or("").trim()
        ));
    }
    out
}

pub fn translation_system_prompt(
    prompts: &PromptSet,
    source_lang: &str,
    target_lang: &str,
    strategy: &Strategy,
    feedback: Option<&str>,
) -> String {
    let mut extra = String::new();
    if strategy.free_translation {
        extra.push_str(
            "\n• Free translation is enabled: prioritise natural, idiomatic phrasing in the \
target language over sentence-by-sentence fidelity, while keeping every event, detail and line \
of dialogue.",
        );
    }
    if let Some(fb) = feedback.map(str::trim).filter(|s| !s.is_empty()) {
        extra.push_str(&format!(
            "\n\n── Reviewer Feedback on the Previous Translation ──\n{fb}\nApply this feedback \
throughout the new translation."
        ));
    }
    render_template(
        &prompts.translate_system,
        &[
            ("source_lang", source_lang),
            ("target_lang", target_lang),
            ("strategy_text", &strategy_text(strategy)),
            ("glossary_text", &glossary_text(strategy)),
            ("extra", &extra),
        ],
    )
}

pub fn translation_user_prompt(prompts: &PromptSet, context: &str, label: &str, text: &str) -> String {
    render_template(
        &prompts.translate_user,
        &[
            ("context_section", context),
            ("chapter_title", label),
            ("chapter_text", text),
        ],
    )
}

/// Label shown to the model for chunk `i` of `n`.
pub fn chunk_label(title: &str, i: usize, n: usize) -> String {
    if n > 1 {
        format!("{title} (part {}/{n})", i + 1)
    } else {
        title.to_string()
    }
}

pub const DEFAULT_TRANSLATE_SYSTEM_TEXT: &str = r#"You are a professional book translator working from {{source_lang}} into {{target_lang}}. Follow the translation strategy and glossary strictly so the whole book stays consistent.

── Translation Strategy ──
{{strategy_text}}

── Terminology Glossary ──
{{glossary_text}}

── Guidelines ──
• Translate the COMPLETE text from start to finish. Do NOT skip, summarize or abbreviate anything.
• Write natural, fluent {{target_lang}} that reads as if it had been written in {{target_lang}}.
• Keep the author's narrative voice and tone as described in the strategy.
• Use the glossary for every listed term.
• Preserve paragraph structure: every source paragraph appears in the translation, separated by a blank line.
• Output ONLY the translated text. No commentary, no headings you were not given, no translator notes.
• Do NOT stop early.{{extra}}"#;

pub const DEFAULT_TRANSLATE_USER_TEXT: &str = r#"{{context_section}}── Chapter to Translate: {{chapter_title}} ──

{{chapter_text}}"#;

pub const DEFAULT_CONTINUATION_SYSTEM_TEXT: &str = r#"You are continuing a translation from {{source_lang}} into {{target_lang}} that was cut off. Pick up EXACTLY where the translation stopped. Do NOT repeat text that was already translated. Do NOT add commentary. Output ONLY the continuation."#;

pub const DEFAULT_CONTINUATION_USER_TEXT: &str = r#"The translation was cut off. This is how the translated text currently ends:

...{{tail}}

This is the part of the original text that still needs translating:

{{remaining}}

Continue the translation from where it stopped. Output ONLY the translated continuation."#;

pub const DEFAULT_SUMMARY_SYSTEM_TEXT: &str = r#"Produce a concise 2-3 sentence summary of this chapter covering the key events and characters. Return only the summary."#;

pub const DEFAULT_CLASSIFY_NAMES_TEXT: &str = r#"You review candidate proper names extracted from a {{source_lang}} book that is being translated into {{target_lang}}.
For EACH candidate decide whether it is plausibly the name of a person or a place (not a common noun, title, month, weekday or exclamation).
When it is a name, list the renderings a {{target_lang}} translator would commonly use for it (standard transliterations first). Use an empty list when unsure.

Return STRICT JSON only (one JSON object), no markdown:
{"names":[{"name":"Holmes","is_name":true,"variants":["福尔摩斯"]}]}

CANDIDATES:
{{candidates}}"#;

pub const DEFAULT_ANALYSIS_SYSTEM_TEXT: &str = r#"You are a literary analyst preparing a translator to translate a book from {{source_lang}} into {{target_lang}}.
Use the research notes for content, characters and context, and the chapter summaries for the author's actual prose style.

Return STRICT JSON only (one JSON object) with these keys:
- "author": string
- "genre": string
- "themes": list of strings
- "writing_style": string (narrative voice, sentence structure, register, dialogue, pacing)
- "setting": string
- "cultural_notes": string
- "characters": list of {"name": str, "description": str} with names spelled as in the original
- "key_terms": list of {"term": str, "explanation": str}"#;

pub const DEFAULT_STRATEGY_SYSTEM_TEXT: &str = r#"You are an expert literary translator. Based on the book analysis, write a translation strategy for translating this book from {{source_lang}} into {{target_lang}}.
{{custom_instructions}}
Return STRICT JSON only (one JSON object) with these keys:
- "overall_approach": string
- "tone_and_style": string
- "character_names": list of {"original": str, "translated": str, "note": str}
- "glossary": list of {"source": str, "target": str, "context": str}
- "cultural_adaptation": string
- "special_considerations": string
Be specific and actionable."#;

pub const DEFAULT_TITLE_SYSTEM_TEXT: &str = r#"You translate chapter titles of a book from {{source_lang}} into {{target_lang}}.
Keep numbering and proper names consistent with the rest of the book.
Return ONLY a JSON array, one object per title:
[{"index": 0, "translated_title": "..."}]
Use the index given before each title. No markdown, no commentary."#;

pub const DEFAULT_QA_SYSTEM_TEXT: &str = r#"You are a helpful translation consultant. The reader is studying "{{book_title}}" by {{author}}, translated from {{source_lang}} into {{target_lang}}.
They will ask about the translation: word choices, cultural references, names, style or meaning. Use the book analysis, the translation strategy and the surrounding passage given below.
Answer concisely. Respond in {{target_lang}}."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityEntry, GlossaryEntry};

    #[test]
    fn render_replaces_all_occurrences() {
        let out = render_template("{{a}}-{{b}}-{{a}}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x-y-x");
    }

    #[test]
    fn empty_glossary_has_placeholder() {
        assert_eq!(glossary_text(&Strategy::default()), "(no glossary entries)");
        let s = Strategy {
            glossary: vec![GlossaryEntry {
                source: "Baker Street".into(),
                target: "贝克街".into(),
                context: "address".into(),
            }],
            ..Strategy::default()
        };
        assert_eq!(glossary_text(&s), "  Baker Street → 贝克街  [address]");
    }

    #[test]
    fn name_annotation_rules_exclude_fixed_names() {
        let s = Strategy {
            annotate_names: true,
            character_names: vec![EntityEntry {
                original: "Holmes".into(),
                translated: "福尔摩斯".into(),
                note: String::new(),
            }],
            ..Strategy::default()
        };
        let text = strategy_text(&s);
        assert!(text.contains("Holmes → 福尔摩斯"));
        assert!(text.contains("must NOT be annotated: Holmes."));
        assert!(text.contains(ANNOTATION_SEPARATOR));
    }

    #[test]
    fn no_annotation_block_when_disabled() {
        let text = strategy_text(&Strategy::default());
        assert!(!text.contains(ANNOTATION_SEPARATOR));
    }

    #[test]
    fn context_uses_most_recent_summaries() {
        let chapters: Vec<Chapter> = (0..8)
            .map(|i| {
                let mut c = Chapter::new("p", i, format!("T{i}"), "x");
                c.summary = Some(format!("S{i}"));
                c
            })
            .collect();
        let ctx = context_section(&chapters, 7, 5);
        assert!(ctx.starts_with("── Context from Previous Chapters ──"));
        assert!(!ctx.contains("S1"));
        assert!(ctx.contains("Chapter 3 (T2): S2"));
        assert!(ctx.contains("Chapter 7 (T6): S6"));
        assert!(!ctx.contains("S7"));
        assert_eq!(context_section(&chapters, 0, 5), "");
    }

    #[test]
    fn feedback_and_free_style_are_appended() {
        let s = Strategy {
            free_translation: true,
            ..Strategy::default()
        };
        let p = translation_system_prompt(&PromptSet::builtin(), "English", "中文", &s, Some("fewer idioms"));
        assert!(p.contains("Free translation is enabled"));
        assert!(p.contains("fewer idioms"));
        assert!(!p.contains("{{"));
    }

    #[test]
    fn labels() {
        assert_eq!(chunk_label("One", 0, 1), "One");
        assert_eq!(chunk_label("One", 1, 3), "One (part 2/3)");
    }
}
