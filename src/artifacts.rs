//! Downstream outputs built from translated chapters.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::model::{Chapter, Project};
use crate::textutil::{bilingual_title, safe_file_name};

const MAX_NAME_CHARS: usize = 80;

pub trait ArtifactSink: Send + Sync {
    /// Builds the output for one chapter; returns where it was written.
    fn build_chapter(
        &self,
        project: &Project,
        chapter: &Chapter,
        display_title: &str,
        text: &str,
    ) -> anyhow::Result<PathBuf>;

    /// Builds the whole-book output from translated chapters in index order.
    fn build_book(&self, project: &Project, chapters: &[Chapter]) -> anyhow::Result<PathBuf>;
}

/// Plain-text outputs under `<output_dir>/<book name>/`.
pub struct TextArtifactWriter {
    output_dir: PathBuf,
}

impl TextArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn book_dir(&self, project: &Project) -> PathBuf {
        self.output_dir.join(safe_file_name(&project.name, MAX_NAME_CHARS))
    }

    pub fn chapter_path(&self, project: &Project, chapter: &Chapter) -> PathBuf {
        self.book_dir(project).join(format!(
            "Ch{:03}_{}.txt",
            chapter.index + 1,
            safe_file_name(&chapter.title, MAX_NAME_CHARS)
        ))
    }
}

fn write_text(path: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("write output: {}", path.display()))
}

impl ArtifactSink for TextArtifactWriter {
    fn build_chapter(
        &self,
        project: &Project,
        chapter: &Chapter,
        display_title: &str,
        text: &str,
    ) -> anyhow::Result<PathBuf> {
        let path = self.chapter_path(project, chapter);
        write_text(&path, &format!("{display_title}\n\n{}\n", text.trim_end()))?;
        Ok(path)
    }

    fn build_book(&self, project: &Project, chapters: &[Chapter]) -> anyhow::Result<PathBuf> {
        let mut out = String::new();
        out.push_str(&project.name);
        out.push_str("\n\n");
        for ch in chapters {
            let Some(text) = ch.translation() else {
                continue;
            };
            out.push('\n');
            out.push_str(&bilingual_title(&ch.title, &ch.translated_title));
            out.push_str("\n\n");
            out.push_str(text.trim_end());
            out.push_str("\n\n");
        }
        let name = safe_file_name(&project.name, MAX_NAME_CHARS);
        let path = self.book_dir(project).join(format!("{name}_complete.txt"));
        write_text(&path, &out)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_and_book_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = TextArtifactWriter::new(dir.path());
        let project = Project::new("A Study: In Scarlet?", "English", "简体中文");
        let mut one = Chapter::new(&project.id, 0, "Mr. Holmes", "src");
        one.translated_title = "福尔摩斯先生".into();
        one.translated_text = Some("正文一".into());
        let two = Chapter::new(&project.id, 1, "Untranslated", "src");

        let p = w
            .build_chapter(&project, &one, &bilingual_title(&one.title, &one.translated_title), "正文一")
            .unwrap();
        assert!(p.ends_with("Ch001_Mr. Holmes.txt"));
        let body = std::fs::read_to_string(&p).unwrap();
        assert!(body.starts_with("福尔摩斯先生 / Mr. Holmes\n\n正文一"));

        let book = w.build_book(&project, &[one, two]).unwrap();
        let text = std::fs::read_to_string(&book).unwrap();
        assert!(text.contains("正文一"));
        assert!(!text.contains("Untranslated"));
        assert!(!book.to_string_lossy().contains('?'));
    }
}
