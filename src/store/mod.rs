//! Persistence of projects, chapters, strategy, analysis and version history.
//!
//! Each project is one [`ProjectDoc`]. Implementations provide whole-document load and
//! a locked read-modify-write; every keyed operation is built on those two, so
//! concurrent writers to the same project are serialized.

pub mod json;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{
    Analysis, Chapter, ChapterUpdate, Project, ProjectUpdate, Strategy, VersionRecord,
};
use crate::names::NameMap;
use crate::state::ProjectStatus;

pub use json::JsonStore;
pub use memory::MemoryStore;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectDoc {
    pub project: Project,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl ProjectDoc {
    pub fn new(project: Project, mut chapters: Vec<Chapter>) -> Self {
        chapters.sort_by_key(|c| c.index);
        Self {
            project,
            chapters,
            strategy: None,
            analysis: None,
            versions: Vec::new(),
        }
    }

    fn chapter_mut(&mut self, chapter_id: &str) -> Result<&mut Chapter, EngineError> {
        self.chapters
            .iter_mut()
            .find(|c| c.id == chapter_id)
            .ok_or_else(|| EngineError::not_found("chapter", chapter_id))
    }
}

pub type DocEdit<'a> = dyn FnMut(&mut ProjectDoc) -> anyhow::Result<()> + Send + 'a;

pub trait Store: Send + Sync {
    fn insert(&self, doc: ProjectDoc) -> anyhow::Result<()>;

    /// Snapshot of one project. Missing projects are `EngineError::NotFound`.
    fn load(&self, project_id: &str) -> anyhow::Result<ProjectDoc>;

    /// Runs `edit` on the stored document under the store's write lock and persists
    /// the result only if `edit` succeeds.
    fn modify(&self, project_id: &str, edit: &mut DocEdit<'_>) -> anyhow::Result<ProjectDoc>;

    fn project_ids(&self) -> anyhow::Result<Vec<String>>;

    fn remove(&self, project_id: &str) -> anyhow::Result<()>;

    fn get_project(&self, project_id: &str) -> anyhow::Result<Project> {
        Ok(self.load(project_id)?.project)
    }

    fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        let mut out = Vec::new();
        for id in self.project_ids()? {
            out.push(self.get_project(&id)?);
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn update_project(&self, project_id: &str, update: ProjectUpdate) -> anyhow::Result<Project> {
        let mut update = Some(update);
        let doc = self.modify(project_id, &mut |d| {
            if let Some(u) = update.take() {
                u.apply(&mut d.project);
            }
            Ok(())
        })?;
        Ok(doc.project)
    }

    /// Moves the project to `to` if the state machine allows it.
    fn transition_project(
        &self,
        project_id: &str,
        to: ProjectStatus,
        error_message: Option<String>,
    ) -> anyhow::Result<Project> {
        let mut msg = Some(error_message);
        let doc = self.modify(project_id, &mut |d| {
            let status = d.project.status.transition(to)?;
            ProjectUpdate {
                status: Some(status),
                error_message: msg.take(),
                ..ProjectUpdate::default()
            }
            .apply(&mut d.project);
            Ok(())
        })?;
        Ok(doc.project)
    }

    /// Read-modify-write of the project's name map, serialized with all other writers.
    fn update_name_map(
        &self,
        project_id: &str,
        edit: &mut (dyn FnMut(&mut NameMap) + Send),
    ) -> anyhow::Result<NameMap> {
        let doc = self.modify(project_id, &mut |d| {
            edit(&mut d.project.name_map);
            Ok(())
        })?;
        Ok(doc.project.name_map)
    }

    fn get_chapter(&self, project_id: &str, chapter_id: &str) -> anyhow::Result<Chapter> {
        self.load(project_id)?
            .chapters
            .into_iter()
            .find(|c| c.id == chapter_id)
            .ok_or_else(|| EngineError::not_found("chapter", chapter_id).into())
    }

    /// Chapters ordered by index.
    fn list_chapters(&self, project_id: &str) -> anyhow::Result<Vec<Chapter>> {
        Ok(self.load(project_id)?.chapters)
    }

    fn update_chapter(
        &self,
        project_id: &str,
        chapter_id: &str,
        update: ChapterUpdate,
    ) -> anyhow::Result<Chapter> {
        let mut update = Some(update);
        let mut out: Option<Chapter> = None;
        self.modify(project_id, &mut |d| {
            let ch = d.chapter_mut(chapter_id)?;
            if let Some(u) = update.take() {
                u.apply(ch);
            }
            out = Some(ch.clone());
            Ok(())
        })?;
        out.ok_or_else(|| EngineError::not_found("chapter", chapter_id).into())
    }

    fn get_strategy(&self, project_id: &str) -> anyhow::Result<Option<Strategy>> {
        Ok(self.load(project_id)?.strategy)
    }

    /// Stores `strategy` with its version bumped past the previous one.
    fn save_strategy(&self, project_id: &str, strategy: Strategy) -> anyhow::Result<Strategy> {
        let mut strategy = Some(strategy);
        let doc = self.modify(project_id, &mut |d| {
            if let Some(mut s) = strategy.take() {
                let prev = d.strategy.as_ref().map_or(0, |p| p.version);
                s.version = prev + 1;
                d.strategy = Some(s);
            }
            Ok(())
        })?;
        doc.strategy
            .ok_or_else(|| EngineError::not_found("strategy", project_id).into())
    }

    fn get_analysis(&self, project_id: &str) -> anyhow::Result<Option<Analysis>> {
        Ok(self.load(project_id)?.analysis)
    }

    fn save_analysis(&self, project_id: &str, analysis: Analysis) -> anyhow::Result<()> {
        let mut analysis = Some(analysis);
        self.modify(project_id, &mut |d| {
            if let Some(a) = analysis.take() {
                d.analysis = Some(a);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn append_version(&self, project_id: &str, record: VersionRecord) -> anyhow::Result<()> {
        let mut record = Some(record);
        self.modify(project_id, &mut |d| {
            if let Some(r) = record.take() {
                d.versions.push(r);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Version history of one chapter, oldest first.
    fn list_versions(&self, project_id: &str, chapter_id: &str) -> anyhow::Result<Vec<VersionRecord>> {
        let mut v: Vec<VersionRecord> = self
            .load(project_id)?
            .versions
            .into_iter()
            .filter(|r| r.chapter_id == chapter_id)
            .collect();
        v.sort_by_key(|r| r.version);
        Ok(v)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A project with one chapter per source text, titled "Chapter N".
    pub fn seed(store: &dyn Store, sources: &[&str]) -> (String, Vec<String>) {
        let project = Project::new("Test Book", "English", "简体中文");
        let pid = project.id.clone();
        let chapters: Vec<Chapter> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| Chapter::new(&pid, i, format!("Chapter {}", i + 1), *s))
            .collect();
        let ids = chapters.iter().map(|c| c.id.clone()).collect();
        store
            .insert(ProjectDoc::new(project, chapters))
            .expect("insert");
        (pid, ids)
    }
}
