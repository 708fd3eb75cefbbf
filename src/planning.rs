//! Pre-translation work: book analysis and the translation strategy derived from it.

use anyhow::Context;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::llm::{ChatClient, ChatPurpose};
use crate::model::{Analysis, Chapter, ChapterUpdate, Project, ProjectUpdate, Strategy};
use crate::pipeline::prompts::render_template;
use crate::state::{Operation, ProjectStatus};
use crate::store::Store;
use crate::textutil::{char_len, head_chars, word_count};

const IDENTIFY_EXCERPT_CHARS: usize = 5000;

const IDENTIFY_SYSTEM: &str = "You are a literary expert. Given the book title and an excerpt \
from the first chapter, identify the author, the language of the text and basic metadata. \
Return ONLY a JSON object with: \"author\" (full name, \"Unknown\" if you cannot tell), \
\"language\" (e.g. \"English\", \"Deutsch\", \"日本語\"), \"probable_genre\", \"era\", and \
\"keywords\" (3-5 terms for researching the book).";

const RESEARCH_SYSTEM: &str = "You are a literary research assistant preparing background \
material for a book translator. Write a comprehensive research report; it is the translator's \
primary source for content, characters and context. Cover: author background and writing \
style, full synopsis (spoilers included), every significant character with exact original \
spellings, recurring terms and invented words, setting, themes, cultural and historical \
context, known translation challenges. Say plainly when you lack reliable information. \
Write the report in English.";

const STYLE_SUMMARY_SYSTEM: &str = "You are a literary analyst helping a translator understand \
a book's writing style. For the chapter below give a 2-3 sentence content summary (key events \
and characters) followed by 2-3 sentences on the prose: narrative voice, sentence structure, \
register, dialogue and distinctive devices. Return only the analysis.";

const ANALYSIS_KEYS: &[&str] = &["genre", "writing_style", "characters", "themes"];

#[derive(Debug, Default, Deserialize)]
struct BookMeta {
    #[serde(default)]
    author: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    probable_genre: String,
    #[serde(default)]
    era: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Chapter summary used as a writing-style sample.
struct StyleSample<'a> {
    chapter: &'a Chapter,
    summary: &'a str,
}

pub struct Planner<'a> {
    pub store: &'a dyn Store,
    pub client: &'a dyn ChatClient,
    pub config: &'a EngineConfig,
}

impl Planner<'_> {
    fn chapters_of(&self, project_id: &str) -> anyhow::Result<Vec<Chapter>> {
        let chapters = self.store.list_chapters(project_id)?;
        if chapters.is_empty() {
            return Err(EngineError::Precondition("project has no chapters".to_string()).into());
        }
        Ok(chapters)
    }

    fn fail(&self, project_id: &str, what: &str, err: anyhow::Error) -> anyhow::Error {
        let msg = format!("{what} failed: {err:#}");
        if let Err(e) = self
            .store
            .transition_project(project_id, ProjectStatus::Error, Some(msg.clone()))
        {
            tracing::warn!(error = %e, "could not record failure");
        }
        err.context(msg)
    }

    /// Research, style samples within the word budget, then one holistic analysis call.
    pub async fn analyze_book(&self, project_id: &str) -> anyhow::Result<Analysis> {
        let project = self.store.get_project(project_id)?;
        Operation::Analyze.check(project.status)?;
        let chapters = self.chapters_of(project_id)?;
        self.store
            .transition_project(project_id, ProjectStatus::Analyzing, None)?;

        match self.run_analysis(project, &chapters).await {
            Ok(a) => {
                self.store
                    .transition_project(project_id, ProjectStatus::Analyzed, None)?;
                Ok(a)
            }
            Err(e) => Err(self.fail(project_id, "Analysis", e)),
        }
    }

    async fn run_analysis(&self, mut project: Project, chapters: &[Chapter]) -> anyhow::Result<Analysis> {
        tracing::info!(project = %project.id, "identifying book");
        let meta = self.identify(&project, &chapters[0]).await?;
        tracing::info!(author = %meta.author, language = %meta.language, genre = %meta.probable_genre, "book identified");

        let src = project.source_language.trim();
        if (src.is_empty() || src.eq_ignore_ascii_case("auto")) && !meta.language.trim().is_empty() {
            project = self.store.update_project(
                &project.id,
                ProjectUpdate {
                    source_language: Some(meta.language.trim().to_string()),
                    ..ProjectUpdate::default()
                },
            )?;
            tracing::info!(language = %project.source_language, "source language detected");
        }

        let research = self.research(&project, &meta).await?;
        tracing::info!(chars = char_len(&research), "research report ready");

        let budget = self.config.translation.analysis_max_words;
        let mut used = 0usize;
        let mut summaries: Vec<(usize, String)> = Vec::new();
        for (i, ch) in chapters.iter().enumerate() {
            if used >= budget {
                tracing::info!(skipped = chapters.len() - i, "word budget reached");
                break;
            }
            let summary = self.style_summary(ch).await?;
            self.store.update_chapter(
                &project.id,
                &ch.id,
                ChapterUpdate {
                    summary: Some(summary.clone()),
                    ..ChapterUpdate::default()
                },
            )?;
            used += word_count(&ch.source_text);
            tracing::debug!(chapter = ch.index + 1, words_used = used, budget, "chapter sampled");
            summaries.push((i, summary));
        }
        let samples: Vec<StyleSample<'_>> = summaries
            .iter()
            .map(|(i, s)| StyleSample {
                chapter: &chapters[*i],
                summary: s,
            })
            .collect();

        let overview = book_overview(&project, &meta.author, chapters, &research, &samples);
        let mut analysis = self.holistic(&project, &overview).await?;
        analysis.author = meta.author;
        analysis.research_report = research;
        self.store.save_analysis(&project.id, analysis.clone())?;
        tracing::info!(project = %project.id, sampled = samples.len(), chapters = chapters.len(), "analysis complete");
        Ok(analysis)
    }

    /// Reruns only the holistic step with the user's corrections, reusing research and
    /// stored summaries.
    pub async fn refine_analysis(&self, project_id: &str, feedback: &str) -> anyhow::Result<Analysis> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(EngineError::Precondition("feedback must not be empty".to_string()).into());
        }
        let project = self.store.get_project(project_id)?;
        Operation::RefineAnalysis.check(project.status)?;
        let chapters = self.chapters_of(project_id)?;
        let existing = self.store.get_analysis(project_id)?.ok_or_else(|| {
            EngineError::Precondition("no analysis yet; analyze the book first".to_string())
        })?;
        self.store
            .transition_project(project_id, ProjectStatus::Analyzing, None)?;

        let samples: Vec<StyleSample<'_>> = chapters
            .iter()
            .filter_map(|c| {
                c.summary
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(|summary| StyleSample { chapter: c, summary })
            })
            .collect();
        let mut overview = book_overview(
            &project,
            &existing.author,
            &chapters,
            &existing.research_report,
            &samples,
        );
        overview.push_str(&format!(
            "\n=== USER CORRECTIONS ===\nThe user reviewed the previous analysis. These corrections \
MUST be incorporated; where the user names a character or term differently, use their version.\n\n\
{feedback}\n"
        ));

        match self.holistic(&project, &overview).await {
            Ok(mut analysis) => {
                analysis.author = existing.author;
                analysis.research_report = existing.research_report;
                self.store.save_analysis(project_id, analysis.clone())?;
                self.store
                    .transition_project(project_id, ProjectStatus::Analyzed, None)?;
                tracing::info!(project = %project_id, "analysis refined");
                Ok(analysis)
            }
            Err(e) => Err(self.fail(project_id, "Analysis refinement", e)),
        }
    }

    async fn identify(&self, project: &Project, first: &Chapter) -> anyhow::Result<BookMeta> {
        let user = format!(
            "Book Title: {}\n\nFirst Chapter Excerpt:\n{}",
            project.name,
            head_chars(&first.source_text, IDENTIFY_EXCERPT_CHARS)
        );
        let value = self
            .client
            .chat_json(IDENTIFY_SYSTEM, &user, &["author"])
            .await
            .context("identify book")?;
        let mut meta: BookMeta = serde_json::from_value(value).unwrap_or_default();
        if meta.author.trim().is_empty() {
            meta.author = "Unknown".to_string();
        }
        Ok(meta)
    }

    async fn research(&self, project: &Project, meta: &BookMeta) -> anyhow::Result<String> {
        let mut queries = vec![
            format!("\"{}\" writing style literary analysis", meta.author),
            format!("\"{}\" {} book review analysis", project.name, meta.author),
            format!("\"{}\" biography literary career", meta.author),
        ];
        if !meta.keywords.is_empty() {
            let kw: Vec<&str> = meta.keywords.iter().take(3).map(String::as_str).collect();
            queries.push(format!("\"{}\" {}", project.name, kw.join(" ")));
        }
        let user = format!(
            "Book Title: {}\nAuthor: {}\nProbable Genre: {}\nEra: {}\nSource Language: {}\n\
Target Language: {}\nKeywords: {}\n\nResearch this author and book thoroughly and write the \
report described in your instructions.",
            project.name,
            meta.author,
            meta.probable_genre,
            meta.era,
            project.source_language,
            project.target_language,
            meta.keywords.join(", ")
        );
        self.client
            .chat_with_search(RESEARCH_SYSTEM, &user, &queries)
            .await
            .context("research book")
    }

    async fn style_summary(&self, ch: &Chapter) -> anyhow::Result<String> {
        let max = self.config.translation.summary_max_chars;
        let text = if char_len(&ch.source_text) > max {
            format!("{}\n\n[... chapter continues ...]", head_chars(&ch.source_text, max))
        } else {
            ch.source_text.clone()
        };
        let summary = self
            .client
            .chat(
                STYLE_SUMMARY_SYSTEM,
                &format!("Chapter: {}\n\n{text}", ch.title),
                ChatPurpose::Summary,
            )
            .await
            .with_context(|| format!("summarize chapter {}", ch.index + 1))?;
        Ok(summary.trim().to_string())
    }

    async fn holistic(&self, project: &Project, overview: &str) -> anyhow::Result<Analysis> {
        let system = render_template(
            &self.config.prompts.analysis_system,
            &[
                ("source_lang", &project.source_language),
                ("target_lang", &project.target_language),
            ],
        );
        let value = self
            .client
            .chat_json(&system, overview, ANALYSIS_KEYS)
            .await
            .context("holistic analysis")?;
        if value.get("genre").is_none() {
            tracing::warn!("analysis reply is missing structured fields");
        }
        serde_json::from_value(value).context("analysis reply has an unexpected shape")
    }

    pub async fn generate_strategy(&self, project_id: &str) -> anyhow::Result<Strategy> {
        let custom = self
            .store
            .get_strategy(project_id)?
            .map(|s| s.custom_instructions)
            .unwrap_or_default();
        self.generate_with(project_id, custom).await
    }

    /// Appends the feedback to the stored custom instructions and generates again.
    pub async fn regenerate_strategy(&self, project_id: &str, feedback: &str) -> anyhow::Result<Strategy> {
        let mut custom = self
            .store
            .get_strategy(project_id)?
            .map(|s| s.custom_instructions)
            .unwrap_or_default();
        let feedback = feedback.trim();
        if !feedback.is_empty() {
            custom.push_str(&format!("\n\nUser feedback on previous strategy:\n{feedback}"));
        }
        self.generate_with(project_id, custom.trim().to_string()).await
    }

    async fn generate_with(&self, project_id: &str, custom: String) -> anyhow::Result<Strategy> {
        let project = self.store.get_project(project_id)?;
        Operation::GenerateStrategy.check(project.status)?;
        let analysis = self.store.get_analysis(project_id)?.ok_or_else(|| {
            EngineError::Precondition("no analysis yet; analyze the book first".to_string())
        })?;
        let previous = self.store.get_strategy(project_id)?;
        self.enter_generating(&project)?;

        let custom_block = if custom.is_empty() {
            String::new()
        } else {
            format!(
                "The user has provided the following custom translation instructions. \
Incorporate them into your strategy:\n{custom}\n"
            )
        };
        let system = render_template(
            &self.config.prompts.strategy_system,
            &[
                ("source_lang", &project.source_language),
                ("target_lang", &project.target_language),
                ("custom_instructions", &custom_block),
            ],
        );
        tracing::info!(project = %project_id, "generating translation strategy");
        let generated = self
            .client
            .chat_json(&system, &analysis_text(&analysis), &["overall_approach"])
            .await
            .context("generate strategy")
            .and_then(|v| {
                serde_json::from_value::<Strategy>(v).context("strategy reply has an unexpected shape")
            });
        let mut strategy = match generated {
            Ok(s) => s,
            Err(e) => return Err(self.fail(project_id, "Strategy generation", e)),
        };

        strategy.custom_instructions = custom;
        if let Some(prev) = previous {
            strategy.annotate_terms = prev.annotate_terms;
            strategy.annotate_names = prev.annotate_names;
            strategy.annotation_density = prev.annotation_density;
            strategy.free_translation = prev.free_translation;
        }
        let saved = self.store.save_strategy(project_id, strategy)?;
        self.store
            .transition_project(project_id, ProjectStatus::StrategyGenerated, None)?;
        tracing::info!(project = %project_id, version = saved.version, "strategy saved");
        Ok(saved)
    }

    /// Stores a user-supplied strategy as the next version.
    pub fn import_strategy(&self, project_id: &str, strategy: Strategy) -> anyhow::Result<Strategy> {
        let project = self.store.get_project(project_id)?;
        Operation::GenerateStrategy.check(project.status)?;
        self.enter_generating(&project)?;
        let saved = self.store.save_strategy(project_id, strategy)?;
        self.store
            .transition_project(project_id, ProjectStatus::StrategyGenerated, None)?;
        tracing::info!(project = %project_id, version = saved.version, "strategy imported");
        Ok(saved)
    }

    fn enter_generating(&self, project: &Project) -> anyhow::Result<()> {
        if project.status != ProjectStatus::GeneratingStrategy {
            self.store
                .transition_project(&project.id, ProjectStatus::GeneratingStrategy, None)?;
        }
        Ok(())
    }
}

fn book_overview(
    project: &Project,
    author: &str,
    chapters: &[Chapter],
    research: &str,
    samples: &[StyleSample<'_>],
) -> String {
    let total_words: usize = chapters.iter().map(|c| word_count(&c.source_text)).sum();
    let mut out = format!(
        "Book Title: {}\nAuthor: {author}\nSource Language: {}\nTarget Language: {}\n\
Total Chapters: {} · Total Words: ~{total_words}\n\n=== TABLE OF CONTENTS ===\n\n",
        project.name,
        project.source_language,
        project.target_language,
        chapters.len()
    );
    for c in chapters {
        out.push_str(&format!("  {}. {}\n", c.index + 1, c.title));
    }
    out.push_str(&format!(
        "\n=== RESEARCH (use for genre, themes, characters, setting, key terms, cultural notes) ===\n\n\
{research}\n\n=== CHAPTER SAMPLES (use for the author's actual writing style) ===\n\n"
    ));
    for s in samples {
        out.push_str(&format!(
            "--- Chapter {}: {} ---\n{}\n\n",
            s.chapter.index + 1,
            s.chapter.title,
            s.summary
        ));
    }
    out
}

fn analysis_text(a: &Analysis) -> String {
    let mut out = format!(
        "Genre: {}\nThemes: {}\nWriting Style: {}\nSetting: {}\nCultural Notes: {}\n\nCharacters:\n",
        a.genre,
        a.themes.join(", "),
        a.writing_style,
        a.setting,
        a.cultural_notes
    );
    for c in &a.characters {
        out.push_str(&format!("  - {}: {}\n", c.name, c.description));
    }
    out.push_str("\nKey Terms:\n");
    for t in &a.key_terms {
        out.push_str(&format!("  - {}: {}\n", t.term, t.explanation));
    }
    out
}
