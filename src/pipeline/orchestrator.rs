//! Chapter translation driver and the sample/full-book jobs built on it.
//!
//! A chapter is planned into chunks, dispatched in fixed-size concurrent batches
//! through the continuation loop, and assembled by chunk index. The joined prefix is
//! persisted after every batch; cancellation is honoured only between batches and
//! between chapters.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;

use super::chunker::{self, PARAGRAPH_SEPARATOR};
use super::continuation::ContinuationLoop;
use super::postprocess::{clean_chunk_output, strip_leaked_headers, ChunkOutput};
use super::prompts::{
    chunk_label, context_section, translation_system_prompt, translation_user_prompt,
};
use crate::artifacts::ArtifactSink;
use crate::config::EngineConfig;
use crate::consult::{Consultant, Question};
use crate::error::EngineError;
use crate::jobs::{CancelToken, JobContext, JobRegistry};
use crate::llm::{ChatClient, ChatPurpose};
use crate::model::{
    Analysis, Annotation, Chapter, ChapterStatus, ChapterUpdate, Project, ProjectUpdate, Strategy,
    StrategyOverrides, VersionRecord,
};
use crate::names::{NameDetector, NameMap, NameReconciler, RegexNameDetector};
use crate::planning::Planner;
use crate::progress::{ChunkProgress, ProgressObserver};
use crate::state::{Operation, ProjectStatus};
use crate::store::Store;
use crate::textutil::{
    bilingual_title, char_len, extract_title, head_chars, sha256_hex, truncate_to_words,
};
use crate::titles::TitleTranslator;

const SAMPLE_SUFFIX: &str = " (sample excerpt)";
const STOPPED_MESSAGE: &str = "Translation stopped by user";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChapterOutcome {
    Completed(String),
    /// Stopped at a batch boundary; the chapter is pending with the finished chunks saved.
    Stopped {
        chunks_done: usize,
        chunks_total: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every chapter of the project is now translated.
    Completed { translated: usize },
    /// The range is done but chapters outside it are not.
    Partial { translated: usize },
    Stopped { translated: usize },
}

/// One chapter run: what to send and how to label it.
struct ChapterJob<'a> {
    project: &'a Project,
    chapter: Chapter,
    strategy: &'a Strategy,
    feedback: Option<&'a str>,
    source: String,
    label: String,
    with_context: bool,
    excerpt: bool,
}

impl<'a> ChapterJob<'a> {
    fn full(
        project: &'a Project,
        chapter: Chapter,
        strategy: &'a Strategy,
        feedback: Option<&'a str>,
    ) -> Self {
        Self {
            project,
            source: chapter.source_text.clone(),
            label: chapter.title.clone(),
            chapter,
            strategy,
            feedback,
            with_context: true,
            excerpt: false,
        }
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn Store>,
    client: Arc<dyn ChatClient>,
    artifacts: Arc<dyn ArtifactSink>,
    detector: Arc<dyn NameDetector>,
    jobs: JobRegistry,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn ChatClient>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            artifacts,
            detector: Arc::new(RegexNameDetector),
            jobs: JobRegistry::new(),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn NameDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn client(&self) -> &dyn ChatClient {
        self.client.as_ref()
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Asks the project's running job to stop. False when nothing is running.
    pub fn request_stop(&self, project_id: &str) -> bool {
        self.jobs.request_stop(project_id)
    }

    pub fn get_chunk_progress(&self, project_id: &str) -> Option<ChunkProgress> {
        self.jobs.chunk_progress(project_id)
    }

    fn names(&self) -> NameReconciler<'_> {
        NameReconciler {
            store: self.store.as_ref(),
            client: self.client.as_ref(),
            detector: self.detector.as_ref(),
            prompts: &self.config.prompts,
            settings: &self.config.names,
        }
    }

    fn require_strategy(&self, project_id: &str) -> anyhow::Result<Strategy> {
        self.store.get_strategy(project_id)?.ok_or_else(|| {
            EngineError::Precondition("project has no translation strategy yet".to_string()).into()
        })
    }

    /// Translates (or, with feedback, retranslates) one chapter as its own job.
    pub async fn translate_chapter(
        &self,
        project_id: &str,
        chapter_id: &str,
        feedback: Option<&str>,
        overrides: Option<&StrategyOverrides>,
    ) -> anyhow::Result<ChapterOutcome> {
        let guard = self.jobs.start(project_id, self.observer.clone())?;
        let ctx = guard.context().clone();
        let out = self
            .translate_chapter_in(&ctx, project_id, chapter_id, feedback, overrides)
            .await;
        ctx.progress.clear();
        out
    }

    /// Same as [`Self::translate_chapter`] under a caller-owned job context.
    pub async fn translate_chapter_in(
        &self,
        ctx: &JobContext,
        project_id: &str,
        chapter_id: &str,
        feedback: Option<&str>,
        overrides: Option<&StrategyOverrides>,
    ) -> anyhow::Result<ChapterOutcome> {
        let project = self.store.get_project(project_id)?;
        Operation::TranslateChapter.check(project.status)?;
        let mut strategy = self.require_strategy(project_id)?;
        if let Some(o) = overrides {
            strategy = strategy.with_overrides(o);
        }
        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());

        let mut chapter = self.store.get_chapter(project_id, chapter_id)?;
        if feedback.is_some() {
            chapter = self.store.update_chapter(
                project_id,
                chapter_id,
                ChapterUpdate {
                    status: Some(ChapterStatus::Pending),
                    translated_text: Some(None),
                    excerpt: Some(false),
                    ..ChapterUpdate::default()
                },
            )?;
        }
        let job = ChapterJob::full(&project, chapter, &strategy, feedback);
        self.run_or_reset(ctx, job).await
    }

    /// Translates the opening of one chapter (index 0 by default) as a cheap preview.
    ///
    /// The preview is a single short run and is not interrupted by stop requests.
    pub async fn translate_sample(
        &self,
        project_id: &str,
        chapter_index: Option<usize>,
    ) -> anyhow::Result<String> {
        let guard = self.jobs.start(project_id, self.observer.clone())?;
        let project = self.store.get_project(project_id)?;
        Operation::TranslateSample.check(project.status)?;
        let strategy = self.require_strategy(project_id)?;
        let idx = chapter_index.unwrap_or(0);
        let chapter = self
            .store
            .list_chapters(project_id)?
            .into_iter()
            .find(|c| c.index == idx)
            .ok_or_else(|| EngineError::not_found("chapter", format!("index {idx}")))?;

        self.store
            .transition_project(project_id, ProjectStatus::TranslatingSample, None)?;

        let (text, truncated) =
            truncate_to_words(&chapter.source_text, self.config.translation.sample_max_words);
        if truncated {
            tracing::info!(
                project = %project_id,
                chapter = idx + 1,
                max_words = self.config.translation.sample_max_words,
                "sample uses the opening excerpt"
            );
        }
        let label = if truncated {
            format!("{}{SAMPLE_SUFFIX}", chapter.title)
        } else {
            chapter.title.clone()
        };
        let ctx = JobContext {
            cancel: CancelToken::new(),
            ..guard.context().clone()
        };
        let job = ChapterJob {
            project: &project,
            source: text,
            label,
            chapter,
            strategy: &strategy,
            feedback: None,
            with_context: false,
            excerpt: truncated,
        };
        let result = self.run_or_reset(&ctx, job).await;
        ctx.progress.clear();

        let failure = match result {
            Ok(ChapterOutcome::Completed(text)) => {
                self.store
                    .transition_project(project_id, ProjectStatus::SampleReady, None)?;
                self.store.update_project(
                    project_id,
                    ProjectUpdate {
                        sample_chapter_index: Some(idx),
                        ..ProjectUpdate::default()
                    },
                )?;
                tracing::info!(project = %project_id, chapter = idx + 1, chars = char_len(&text), "sample ready");
                return Ok(text);
            }
            Ok(ChapterOutcome::Stopped { .. }) => anyhow::anyhow!("sample translation was interrupted"),
            Err(e) => e,
        };
        let msg = format!("Sample translation failed: {failure:#}");
        if let Err(e) = self
            .store
            .transition_project(project_id, ProjectStatus::Error, Some(msg.clone()))
        {
            tracing::warn!(error = %e, "could not record sample failure");
        }
        Err(failure.context(msg))
    }

    /// Translates chapters `start..=end` (end defaults to the last chapter), skipping
    /// finished ones.
    pub async fn translate_all(
        &self,
        project_id: &str,
        start: usize,
        end: Option<usize>,
    ) -> anyhow::Result<BatchOutcome> {
        let guard = self.jobs.start(project_id, self.observer.clone())?;
        let ctx = guard.context().clone();
        self.translate_all_in(&ctx, project_id, start, end).await
    }

    /// Same as [`Self::translate_all`] under a caller-owned job context.
    pub async fn translate_all_in(
        &self,
        ctx: &JobContext,
        project_id: &str,
        start: usize,
        end: Option<usize>,
    ) -> anyhow::Result<BatchOutcome> {
        let project = self.store.get_project(project_id)?;
        Operation::TranslateAll.check(project.status)?;
        let strategy = self.require_strategy(project_id)?;
        self.store
            .transition_project(project_id, ProjectStatus::Translating, None)?;

        let chapters = self.store.list_chapters(project_id)?;
        let last = chapters.iter().map(|c| c.index).max().unwrap_or(0);
        let end = end.map_or(last, |e| e.min(last));
        let in_range: Vec<&Chapter> = chapters
            .iter()
            .filter(|c| c.index >= start && c.index <= end)
            .collect();
        tracing::info!(
            project = %project_id,
            from = start + 1,
            to = end + 1,
            chapters = in_range.len(),
            "translating chapter range"
        );

        for ch in in_range.iter().filter(|c| c.excerpt && c.status.is_done()) {
            tracing::info!(chapter = ch.index + 1, "chapter holds only a sample excerpt, resetting");
            self.store.update_chapter(
                project_id,
                &ch.id,
                ChapterUpdate {
                    status: Some(ChapterStatus::Pending),
                    translated_text: Some(None),
                    excerpt: Some(false),
                    ..ChapterUpdate::default()
                },
            )?;
        }

        let mut translated = 0usize;
        for ch in in_range {
            if ctx.cancel.is_cancelled() {
                return self.finish_stopped(ctx, project_id, translated);
            }
            let fresh = self.store.get_chapter(project_id, &ch.id)?;
            if fresh.status.is_done() && fresh.translation().is_some() {
                continue;
            }
            let number = fresh.index + 1;
            let job = ChapterJob::full(&project, fresh, &strategy, None);
            match self.run_or_reset(ctx, job).await {
                Ok(ChapterOutcome::Completed(_)) => translated += 1,
                Ok(ChapterOutcome::Stopped { .. }) => {
                    return self.finish_stopped(ctx, project_id, translated);
                }
                Err(e) => {
                    ctx.progress.clear();
                    let msg = format!("Failed at chapter {number}: {e:#}");
                    if let Err(te) = self.store.transition_project(
                        project_id,
                        ProjectStatus::Error,
                        Some(msg.clone()),
                    ) {
                        tracing::warn!(error = %te, "could not record failure");
                    }
                    return Err(e.context(msg));
                }
            }
        }

        ctx.progress.clear();
        let all_done = self
            .store
            .list_chapters(project_id)?
            .iter()
            .all(|c| c.status.is_done() && !c.excerpt);
        if all_done {
            self.store
                .transition_project(project_id, ProjectStatus::Completed, None)?;
            tracing::info!(project = %project_id, translated, "book translation complete");
            Ok(BatchOutcome::Completed { translated })
        } else {
            self.store
                .transition_project(project_id, ProjectStatus::Stopped, None)?;
            tracing::info!(project = %project_id, translated, "chapter range complete");
            Ok(BatchOutcome::Partial { translated })
        }
    }

    fn finish_stopped(
        &self,
        ctx: &JobContext,
        project_id: &str,
        translated: usize,
    ) -> anyhow::Result<BatchOutcome> {
        ctx.progress.clear();
        self.store.transition_project(
            project_id,
            ProjectStatus::Stopped,
            Some(STOPPED_MESSAGE.to_string()),
        )?;
        tracing::info!(project = %project_id, translated, "translation stopped by user");
        Ok(BatchOutcome::Stopped { translated })
    }

    async fn run_or_reset(
        &self,
        ctx: &JobContext,
        job: ChapterJob<'_>,
    ) -> anyhow::Result<ChapterOutcome> {
        let project_id = job.project.id.clone();
        let chapter_id = job.chapter.id.clone();
        let number = job.chapter.index + 1;
        match self.run_chapter(ctx, job).await {
            Ok(o) => Ok(o),
            Err(e) => {
                tracing::error!(project = %project_id, chapter = number, error = %e, "chapter translation failed");
                if let Err(reset) = self.store.update_chapter(
                    &project_id,
                    &chapter_id,
                    ChapterUpdate::status(ChapterStatus::Pending),
                ) {
                    tracing::warn!(error = %reset, "could not reset chapter to pending");
                }
                Err(e)
            }
        }
    }

    async fn run_chapter(
        &self,
        ctx: &JobContext,
        job: ChapterJob<'_>,
    ) -> anyhow::Result<ChapterOutcome> {
        let t = &self.config.translation;
        let project = job.project;
        let ch = &job.chapter;
        let chunks = chunker::plan(&job.source, t.max_chunk_chars);
        let total = chunks.len();
        tracing::info!(
            project = %project.id,
            chapter = ch.index + 1,
            title = %ch.title,
            chars = char_len(&job.source),
            chunks = total,
            "translating chapter"
        );
        if total == 0 {
            tracing::warn!(chapter = ch.index + 1, "chapter has no text");
        }

        self.store.update_chapter(
            &project.id,
            &ch.id,
            ChapterUpdate::status(ChapterStatus::Translating),
        )?;
        ctx.progress.set(ch.index, &ch.title, 0, total);
        ctx.progress
            .message(&format!("Translating chapter {}: {}", ch.index + 1, job.label));

        let system = translation_system_prompt(
            &self.config.prompts,
            &project.source_language,
            &project.target_language,
            job.strategy,
            job.feedback,
        );
        let context = if job.with_context {
            let all = self.store.list_chapters(&project.id)?;
            context_section(&all, ch.index, t.context_summaries)
        } else {
            String::new()
        };

        let fan_out = t.concurrency.max(1);
        let mut slots: Vec<Option<ChunkOutput>> = vec![None; total];
        let mut done = 0usize;
        while done < total {
            if ctx.cancel.is_cancelled() {
                self.store.update_chapter(
                    &project.id,
                    &ch.id,
                    ChapterUpdate::status(ChapterStatus::Pending),
                )?;
                tracing::info!(chapter = ch.index + 1, chunks_done = done, chunks_total = total, "stopped at batch boundary");
                ctx.progress.message(&format!(
                    "Chapter {} stopped after {done}/{total} chunks",
                    ch.index + 1
                ));
                return Ok(ChapterOutcome::Stopped {
                    chunks_done: done,
                    chunks_total: total,
                });
            }
            let end = (done + fan_out).min(total);
            let batch = (done..end).map(|i| self.translate_chunk(&system, &context, &job, i, total, &chunks[i]));
            let results = join_all(batch).await;
            for (i, r) in (done..end).zip(results) {
                let out = r.with_context(|| {
                    format!("chapter {} chunk {}/{}", ch.index + 1, i + 1, total)
                })?;
                slots[i] = Some(out);
            }
            done = end;
            self.store.update_chapter(
                &project.id,
                &ch.id,
                ChapterUpdate {
                    translated_text: Some(Some(join_bodies(&slots[..done]))),
                    ..ChapterUpdate::default()
                },
            )?;
            ctx.progress.set(ch.index, &ch.title, done, total);
        }

        let body = join_bodies(&slots);
        let annotations = merge_annotations(slots.into_iter().flatten());
        let outcome = self.finish_chapter(&job, body, annotations).await?;
        ctx.progress
            .message(&format!("Chapter {} translated", ch.index + 1));
        Ok(outcome)
    }

    async fn translate_chunk(
        &self,
        system: &str,
        context: &str,
        job: &ChapterJob<'_>,
        index: usize,
        total: usize,
        chunk: &str,
    ) -> anyhow::Result<ChunkOutput> {
        let label = chunk_label(&job.label, index, total);
        let user = translation_user_prompt(&self.config.prompts, context, &label, chunk);
        let recovered = ContinuationLoop {
            client: self.client.as_ref(),
            prompts: &self.config.prompts,
            source_lang: &job.project.source_language,
            target_lang: &job.project.target_language,
            max_attempts: self.config.translation.max_continuations,
        }
        .translate(system, &user, chunk)
        .await?;
        if recovered.continuations > 0 {
            tracing::debug!(
                chunk = index + 1,
                continuations = recovered.continuations,
                incomplete = recovered.incomplete,
                "chunk recovered from truncation"
            );
        }
        let title = &job.chapter.title;
        Ok(if job.strategy.annotations_enabled() {
            clean_chunk_output(&recovered.text, index, title, &label)
        } else {
            ChunkOutput {
                body: strip_leaked_headers(&recovered.text, index, title, &label),
                annotations: Vec::new(),
            }
        })
    }

    /// Persists the finished chapter and runs the follow-up work. Artifact, summary and
    /// name-map failures are logged; the translation itself is already saved.
    async fn finish_chapter(
        &self,
        job: &ChapterJob<'_>,
        body: String,
        annotations: Vec<Annotation>,
    ) -> anyhow::Result<ChapterOutcome> {
        let project = job.project;
        let ch = &job.chapter;
        let translated_title = extract_title(&body);
        let version = ch.translation_version + 1;

        let updated = self.store.update_chapter(
            &project.id,
            &ch.id,
            ChapterUpdate {
                status: Some(ChapterStatus::Translated),
                translated_text: Some(Some(body.clone())),
                translated_title: Some(translated_title.clone()),
                annotations: Some(annotations),
                translation_version: Some(version),
                strategy_version: Some(job.strategy.version),
                excerpt: Some(job.excerpt),
                ..ChapterUpdate::default()
            },
        )?;
        self.store.append_version(
            &project.id,
            VersionRecord {
                chapter_id: ch.id.clone(),
                version,
                strategy_version: Some(job.strategy.version),
                created_at: Utc::now(),
                digest: sha256_hex(&body),
                translated_title: translated_title.clone(),
                feedback: job.feedback.map(str::to_string),
                content: body.clone(),
            },
        )?;

        if !job.excerpt {
            let display = bilingual_title(&ch.title, &translated_title);
            match self.artifacts.build_chapter(project, &updated, &display, &body) {
                Ok(path) => tracing::debug!(path = %path.display(), "chapter output written"),
                Err(e) => tracing::warn!(chapter = ch.index + 1, error = %e, "chapter output failed"),
            }
        }

        if !ch.has_summary() && !ch.source_text.trim().is_empty() {
            match self.summarize(&ch.title, &ch.source_text).await {
                Ok(summary) if !summary.is_empty() => {
                    if let Err(e) = self.store.update_chapter(
                        &project.id,
                        &ch.id,
                        ChapterUpdate {
                            summary: Some(summary),
                            ..ChapterUpdate::default()
                        },
                    ) {
                        tracing::warn!(error = %e, "could not store summary");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(chapter = ch.index + 1, error = %e, "summary failed"),
            }
        }

        // An excerpt covers only part of the source; scanning it would fix the
        // chapter's source totals too early.
        if !job.excerpt {
            if let Err(e) = self
                .names()
                .update_from_chapter(&project.id, &ch.id, &job.source, &body)
            {
                tracing::warn!(chapter = ch.index + 1, error = %e, "name map update failed");
            }
        }

        tracing::info!(
            project = %project.id,
            chapter = ch.index + 1,
            version,
            chars = char_len(&body),
            "chapter translated"
        );
        Ok(ChapterOutcome::Completed(body))
    }

    async fn summarize(&self, title: &str, source: &str) -> anyhow::Result<String> {
        let max = self.config.translation.summary_max_chars;
        let text = if char_len(source) > max {
            format!("{}\n[...]", head_chars(source, max))
        } else {
            source.to_string()
        };
        let summary = self
            .client
            .chat(
                &self.config.prompts.summary_system,
                &format!("Chapter: {title}\n\n{text}"),
                ChatPurpose::Summary,
            )
            .await
            .context("summarize chapter")?;
        Ok(summary.trim().to_string())
    }

    /// Whole-book output from every translated chapter; `None` when nothing is translated.
    pub fn combine_book(&self, project_id: &str) -> anyhow::Result<Option<PathBuf>> {
        let doc = self.store.load(project_id)?;
        let translated: Vec<Chapter> = doc
            .chapters
            .into_iter()
            .filter(|c| c.translation().is_some())
            .collect();
        if translated.is_empty() {
            return Ok(None);
        }
        let path = self.artifacts.build_book(&doc.project, &translated)?;
        tracing::info!(project = %project_id, chapters = translated.len(), path = %path.display(), "book combined");
        Ok(Some(path))
    }

    pub fn list_versions(&self, project_id: &str, chapter_id: &str) -> anyhow::Result<Vec<VersionRecord>> {
        self.store.get_chapter(project_id, chapter_id)?;
        self.store.list_versions(project_id, chapter_id)
    }

    fn planner(&self) -> Planner<'_> {
        Planner {
            store: self.store.as_ref(),
            client: self.client.as_ref(),
            config: &self.config,
        }
    }

    pub async fn analyze_book(&self, project_id: &str) -> anyhow::Result<Analysis> {
        let _job = self.jobs.start(project_id, self.observer.clone())?;
        self.planner().analyze_book(project_id).await
    }

    pub async fn refine_analysis(&self, project_id: &str, feedback: &str) -> anyhow::Result<Analysis> {
        let _job = self.jobs.start(project_id, self.observer.clone())?;
        self.planner().refine_analysis(project_id, feedback).await
    }

    pub async fn generate_strategy(&self, project_id: &str) -> anyhow::Result<Strategy> {
        let _job = self.jobs.start(project_id, self.observer.clone())?;
        self.planner().generate_strategy(project_id).await
    }

    pub async fn regenerate_strategy(&self, project_id: &str, feedback: &str) -> anyhow::Result<Strategy> {
        let _job = self.jobs.start(project_id, self.observer.clone())?;
        self.planner().regenerate_strategy(project_id, feedback).await
    }

    pub fn import_strategy(&self, project_id: &str, strategy: Strategy) -> anyhow::Result<Strategy> {
        let _job = self.jobs.start(project_id, None)?;
        self.planner().import_strategy(project_id, strategy)
    }

    pub async fn rescan_all_names(&self, project_id: &str) -> anyhow::Result<NameMap> {
        self.names().rescan_all_names(project_id).await
    }

    /// Translates every chapter title and stores the results. Returns the number of
    /// chapters that received a title.
    pub async fn translate_titles(&self, project_id: &str) -> anyhow::Result<usize> {
        let _job = self.jobs.start(project_id, None)?;
        let project = self.store.get_project(project_id)?;
        Operation::TranslateTitles.check(project.status)?;
        let chapters = self.store.list_chapters(project_id)?;
        if chapters.is_empty() {
            return Err(EngineError::Precondition("project has no chapters".to_string()).into());
        }
        let titles = TitleTranslator {
            client: self.client.as_ref(),
            system_template: &self.config.prompts.title_system,
            source_lang: &project.source_language,
            target_lang: &project.target_language,
        }
        .translate(&chapters)
        .await;
        if titles.is_empty() {
            return Err(anyhow::anyhow!("the model returned no usable title translations"));
        }
        let mut updated = 0usize;
        for ch in &chapters {
            let Some(title) = titles.get(&ch.index) else {
                continue;
            };
            self.store.update_chapter(
                project_id,
                &ch.id,
                ChapterUpdate {
                    translated_title: Some(title.clone()),
                    ..ChapterUpdate::default()
                },
            )?;
            updated += 1;
        }
        tracing::info!(project = %project_id, updated, chapters = chapters.len(), "chapter titles translated");
        Ok(updated)
    }

    /// Answers a reader's question about the translation. Read-only, so it runs
    /// alongside any job.
    pub async fn ask_about_translation(&self, project_id: &str, question: &Question) -> anyhow::Result<String> {
        Consultant {
            store: self.store.as_ref(),
            client: self.client.as_ref(),
            system_template: &self.config.prompts.qa_system,
        }
        .ask(project_id, question)
        .await
    }

    pub fn unify_name(&self, project_id: &str, find: &str, replace: &str) -> anyhow::Result<usize> {
        self.names().unify_name(project_id, find, replace)
    }

    /// Marks a project left in a running status by a dead process as failed and returns
    /// its half-done chapters to pending. No-op while a job of this process owns it.
    pub fn recover_interrupted(&self, project_id: &str) -> anyhow::Result<bool> {
        if self.jobs.is_running(project_id) {
            return Ok(false);
        }
        let project = self.store.get_project(project_id)?;
        if !project.status.is_in_progress() {
            return Ok(false);
        }
        self.store.modify(project_id, &mut |doc| {
            for ch in &mut doc.chapters {
                if ch.status == ChapterStatus::Translating {
                    ch.status = ChapterStatus::Pending;
                }
            }
            Ok(())
        })?;
        self.store.transition_project(
            project_id,
            ProjectStatus::Error,
            Some(format!("Interrupted while {}", project.status)),
        )?;
        tracing::warn!(project = %project_id, status = %project.status, "recovered interrupted project");
        Ok(true)
    }
}

fn join_bodies(slots: &[Option<ChunkOutput>]) -> String {
    slots
        .iter()
        .flatten()
        .map(|o| o.body.as_str())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR)
}

/// Concatenates chunk annotations, keeping the first note per term.
fn merge_annotations(outputs: impl Iterator<Item = ChunkOutput>) -> Vec<Annotation> {
    let mut seen = std::collections::HashSet::new();
    outputs
        .flat_map(|o| o.annotations)
        .filter(|a| seen.insert(a.term.to_lowercase()))
        .collect()
}
