//! Cleanup of raw model output for one chunk.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Annotation;

/// Line that separates the translation body from the annotation list.
pub const ANNOTATION_SEPARATOR: &str = "<<<ANNOTATIONS>>>";

static BOX_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*──.*──\s*$").expect("box header regex"));
static PART_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(part \d+/\d+\)\s*$").expect("part suffix regex"));
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex"));

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkOutput {
    pub body: String,
    pub annotations: Vec<Annotation>,
}

/// Splits off the annotation payload and strips prompt scaffolding the model echoed back.
pub fn clean_chunk_output(raw: &str, chunk_index: usize, title: &str, label: &str) -> ChunkOutput {
    let (body, annotations) = split_annotations(raw);
    let body = strip_leaked_headers(&body, chunk_index, title, label);
    ChunkOutput { body, annotations }
}

/// Returns `(body, annotations)`. A malformed payload yields an empty list; the body is kept.
pub fn split_annotations(raw: &str) -> (String, Vec<Annotation>) {
    let Some(pos) = raw.find(ANNOTATION_SEPARATOR) else {
        return (raw.trim_end().to_string(), Vec::new());
    };
    let body = raw[..pos].trim_end().to_string();
    let payload = raw[pos + ANNOTATION_SEPARATOR.len()..].trim();
    let annotations = parse_annotations(payload).unwrap_or_else(|| {
        tracing::warn!(len = payload.len(), "unparseable annotation payload, ignoring");
        Vec::new()
    });
    (body, annotations)
}

fn parse_annotations(payload: &str) -> Option<Vec<Annotation>> {
    if payload.is_empty() {
        return Some(Vec::new());
    }
    let inner = FENCE_RE
        .captures(payload)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(payload);
    if let Ok(v) = serde_json::from_str::<Vec<Annotation>>(inner) {
        return Some(v);
    }
    let start = inner.find('[')?;
    let end = inner.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<Annotation>>(&inner[start..=end]).ok()
}

pub fn strip_leaked_headers(text: &str, chunk_index: usize, title: &str, label: &str) -> String {
    let title = title.trim();
    let label = label.trim();
    let mut out: Vec<&str> = Vec::new();
    let mut seen_content = false;
    for line in text.lines() {
        let t = line.trim();
        let is_header = BOX_HEADER_RE.is_match(t)
            || (!label.is_empty() && t == label)
            || PART_SUFFIX_RE.is_match(t)
            || (chunk_index > 0 && !seen_content && !title.is_empty() && t == title);
        if is_header {
            continue;
        }
        if !t.is_empty() {
            seen_content = true;
        }
        out.push(line);
    }
    let joined = out.join("\n");
    joined.trim_matches('\n').to_string()
}
