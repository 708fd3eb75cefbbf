//! Project creation from a plain-text book.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;
use crate::model::{Chapter, Project};
use crate::store::{ProjectDoc, Store};

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*((?:chapter|part|book)[ \t]+(?:\d+|[ivxlc]+)\b[^\n]*|第[0-9一二三四五六七八九十百千零〇两]+[章回节卷][^\n]*)$",
    )
    .expect("chapter heading regex")
});

const FRONT_MATTER_TITLE: &str = "Front Matter";

/// Splits a book into `(title, body)` pairs on chapter heading lines.
///
/// Text before the first heading becomes a front-matter chapter; headings with no body
/// are dropped. A book without headings is one chapter.
pub fn split_chapters(text: &str) -> Vec<(String, String)> {
    let text = text.replace("\r\n", "\n");
    let headings: Vec<_> = HEADING_RE.find_iter(&text).collect();
    if headings.is_empty() {
        let body = text.trim();
        return if body.is_empty() {
            Vec::new()
        } else {
            vec![("Chapter 1".to_string(), body.to_string())]
        };
    }

    let mut out = Vec::new();
    let front = text[..headings[0].start()].trim();
    if !front.is_empty() {
        out.push((FRONT_MATTER_TITLE.to_string(), front.to_string()));
    }
    for (i, h) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map_or(text.len(), |n| n.start());
        let body = text[h.end()..end].trim();
        if body.is_empty() {
            continue;
        }
        out.push((h.as_str().trim().to_string(), body.to_string()));
    }
    out
}

/// Creates and stores a project with one chapter per detected heading.
pub fn import_text_book(
    store: &dyn Store,
    name: &str,
    text: &str,
    source_language: &str,
    target_language: &str,
) -> anyhow::Result<Project> {
    let parts = split_chapters(text);
    if parts.is_empty() {
        return Err(EngineError::Precondition("book has no text".to_string()).into());
    }
    let project = Project::new(name, source_language, target_language);
    let chapters: Vec<Chapter> = parts
        .into_iter()
        .enumerate()
        .map(|(i, (title, body))| Chapter::new(&project.id, i, title, body))
        .collect();
    tracing::info!(project = %project.id, name, chapters = chapters.len(), "book imported");
    store.insert(ProjectDoc::new(project.clone(), chapters))?;
    Ok(project)
}
