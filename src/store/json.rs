use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};

use super::{DocEdit, ProjectDoc, Store};
use crate::error::EngineError;

/// One pretty-printed JSON document per project under `<data_dir>/projects/`.
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let dir = data_dir.join("projects");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create data dir: {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{project_id}.json"))
    }

    fn read_doc(&self, project_id: &str) -> anyhow::Result<ProjectDoc> {
        let path = self.path_for(project_id);
        if !path.exists() {
            return Err(EngineError::not_found("project", project_id).into());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read project: {}", path.display()))?;
        let doc: ProjectDoc = serde_json::from_str(&text)
            .with_context(|| format!("parse project: {}", path.display()))?;
        Ok(doc)
    }

    fn write_doc(&self, doc: &ProjectDoc) -> anyhow::Result<()> {
        let path = self.path_for(&doc.project.id);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(doc).context("serialize project")?;
        std::fs::write(&tmp, text).with_context(|| format!("write: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn insert(&self, doc: ProjectDoc) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        self.write_doc(&doc)
    }

    fn load(&self, project_id: &str) -> anyhow::Result<ProjectDoc> {
        self.read_doc(project_id)
    }

    fn modify(&self, project_id: &str, edit: &mut DocEdit<'_>) -> anyhow::Result<ProjectDoc> {
        let _guard = self.write_lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let mut doc = self.read_doc(project_id)?;
        edit(&mut doc)?;
        self.write_doc(&doc)?;
        Ok(doc)
    }

    fn project_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("list projects: {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn remove(&self, project_id: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let path = self.path_for(project_id);
        if !path.exists() {
            return Err(EngineError::not_found("project", project_id).into());
        }
        std::fs::remove_file(&path).with_context(|| format!("remove: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterStatus, ChapterUpdate};
    use crate::store::testutil::seed;

    #[test]
    fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (pid, ids) = {
            let store = JsonStore::open(dir.path()).unwrap();
            let (pid, ids) = seed(&store, &["Holmes sat.", "Watson stood."]);
            store
                .update_chapter(
                    &pid,
                    &ids[0],
                    ChapterUpdate {
                        status: Some(ChapterStatus::Translated),
                        translated_text: Some(Some("福尔摩斯坐着。".into())),
                        ..ChapterUpdate::default()
                    },
                )
                .unwrap();
            (pid, ids)
        };
        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.project_ids().unwrap(), vec![pid.clone()]);
        let ch = store.get_chapter(&pid, &ids[0]).unwrap();
        assert_eq!(ch.translation(), Some("福尔摩斯坐着。"));
        assert!(!dir.path().join("projects").join(format!("{pid}.json.tmp")).exists());
    }

    #[test]
    fn failed_edit_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let (pid, _) = seed(&store, &["a"]);
        let before = std::fs::read_to_string(store.path_for(&pid)).unwrap();
        let res = store.modify(&pid, &mut |d| {
            d.project.name = "changed".into();
            Err(anyhow!("boom"))
        });
        assert!(res.is_err());
        let after = std::fs::read_to_string(store.path_for(&pid)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_deletes_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let (pid, _) = seed(&store, &["a"]);
        store.remove(&pid).unwrap();
        assert!(store.load(&pid).is_err());
        assert!(store.project_ids().unwrap().is_empty());
    }
}
