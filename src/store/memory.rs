use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;

use super::{DocEdit, ProjectDoc, Store};
use crate::error::EngineError;

/// In-process store. Used by tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, ProjectDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert(&self, doc: ProjectDoc) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        docs.insert(doc.project.id.clone(), doc);
        Ok(())
    }

    fn load(&self, project_id: &str) -> anyhow::Result<ProjectDoc> {
        let docs = self.docs.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        docs.get(project_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("project", project_id).into())
    }

    fn modify(&self, project_id: &str, edit: &mut DocEdit<'_>) -> anyhow::Result<ProjectDoc> {
        let mut docs = self.docs.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let current = docs
            .get(project_id)
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        let mut next = current.clone();
        edit(&mut next)?;
        docs.insert(project_id.to_string(), next.clone());
        Ok(next)
    }

    fn project_ids(&self) -> anyhow::Result<Vec<String>> {
        let docs = self.docs.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(docs.keys().cloned().collect())
    }

    fn remove(&self, project_id: &str) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        docs.remove(project_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("project", project_id).into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::engine_error;
    use crate::model::{ChapterStatus, ChapterUpdate, Strategy};
    use crate::state::ProjectStatus;
    use crate::store::testutil::seed;

    #[test]
    fn chapters_are_ordered_and_updatable() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["a", "b", "c"]);
        let chapters = store.list_chapters(&pid).unwrap();
        assert_eq!(chapters.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);

        let ch = store
            .update_chapter(&pid, &ids[1], ChapterUpdate::status(ChapterStatus::Translated))
            .unwrap();
        assert_eq!(ch.status, ChapterStatus::Translated);
        assert_eq!(store.get_chapter(&pid, &ids[1]).unwrap().status, ChapterStatus::Translated);
    }

    #[test]
    fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        let err = store.get_project("nope").unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::NotFound { .. })));
        let (pid, _) = seed(&store, &["a"]);
        let err = store.get_chapter(&pid, "nope").unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::NotFound { kind: "chapter", .. })));
    }

    #[test]
    fn illegal_transition_is_rejected_and_not_persisted() {
        let store = MemoryStore::new();
        let (pid, _) = seed(&store, &["a"]);
        let err = store
            .transition_project(&pid, ProjectStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::InvalidTransition { .. })));
        assert_eq!(store.get_project(&pid).unwrap().status, ProjectStatus::Uploaded);
        store
            .transition_project(&pid, ProjectStatus::Analyzing, None)
            .unwrap();
        assert_eq!(store.get_project(&pid).unwrap().status, ProjectStatus::Analyzing);
    }

    #[test]
    fn strategy_versions_increase() {
        let store = MemoryStore::new();
        let (pid, _) = seed(&store, &["a"]);
        assert_eq!(store.save_strategy(&pid, Strategy::default()).unwrap().version, 1);
        assert_eq!(store.save_strategy(&pid, Strategy::default()).unwrap().version, 2);
    }

    #[test]
    fn concurrent_name_map_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let (pid, _) = seed(store.as_ref(), &["a"]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let pid = pid.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .update_name_map(&pid, &mut |m| {
                                m.entry_mut("Holmes").total += 1;
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let map = store.get_project(&pid).unwrap().name_map;
        assert_eq!(map.get("Holmes").unwrap().total, 400);
    }
}
