//! Pattern-based name heuristics, kept behind [`NameDetector`] so the reconciler does not
//! depend on how names are found.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::dictionary::{is_known_name, is_leading_stopword, is_transliteration_glyph};
use crate::textutil::has_cjk;

static SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-ZÀ-Ý][a-zà-ÿ]+)\b").expect("single name regex"));
static PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-ZÀ-Ý][a-zà-ÿ]+(?:[ \t]+[A-ZÀ-Ý][a-zà-ÿ]+)+\b").expect("name phrase regex")
});
/// A non-Latin rendering immediately followed by a parenthesized Latin gloss.
static ANNOTATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([\p{L}\p{M}·・&&[^\p{Latin}]]+)[ \t]*[（(][ \t]*(\p{Latin}[\p{Latin}'’. \-]{0,48}?)[ \t]*[)）]",
    )
    .expect("annotation pair regex")
});

const MAX_PHRASE_CHARS: usize = 50;
const MIN_RUN_CHARS: usize = 2;
const MAX_RUN_CHARS: usize = 8;
const MAX_PLAIN_RENDERING_CHARS: usize = 6;
const MIN_RENDERING_CHARS: usize = 2;

/// Characters that end a walk back from a gloss in unspaced scripts.
const FUNCTION_CHARS: &str = "的了着是在和说与及把被给向对从他她它们这那也都就又见看";

/// `福尔摩斯（Holmes）`: a target rendering glossed with its source name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationPair {
    pub rendering: String,
    pub source: String,
    /// The whole letter run before the gloss. In unspaced scripts it may carry the
    /// preceding words, so a known rendering it ends with beats `rendering`.
    pub lead: String,
}

impl AnnotationPair {
    /// The longest known rendering `lead` ends with, else the heuristic `rendering`.
    pub fn rendering_given<'k>(&self, known: impl IntoIterator<Item = &'k str>) -> String {
        known
            .into_iter()
            .filter(|k| k.chars().count() >= MIN_RENDERING_CHARS && self.lead.ends_with(*k))
            .max_by_key(|k| k.chars().count())
            .map_or_else(|| self.rendering.clone(), str::to_string)
    }
}

pub trait NameDetector: Send + Sync {
    /// Candidate source-language names with occurrence counts.
    fn source_names(&self, text: &str) -> BTreeMap<String, usize>;

    fn annotation_pairs(&self, translated: &str) -> Vec<AnnotationPair>;

    /// Translated text with parenthesized source glosses removed, renderings kept.
    fn strip_annotations(&self, translated: &str) -> String;

    /// Maximal runs of transliteration glyphs with counts (logographic targets).
    fn transliteration_runs(&self, translated: &str) -> BTreeMap<String, usize>;
}

/// Dictionary + regex detector.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegexNameDetector;

impl NameDetector for RegexNameDetector {
    fn source_names(&self, text: &str) -> BTreeMap<String, usize> {
        let mut hits: BTreeMap<String, usize> = BTreeMap::new();
        for m in SINGLE_RE.captures_iter(text) {
            let word = &m[1];
            if is_known_name(word) {
                *hits.entry(word.to_string()).or_insert(0) += 1;
            }
        }
        for m in PHRASE_RE.find_iter(text) {
            let parts: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .skip_while(|w| is_leading_stopword(w))
                .collect();
            if parts.len() < 2 || !parts.iter().any(|p| is_known_name(p)) {
                continue;
            }
            let phrase = parts.join(" ");
            if phrase.chars().count() < MAX_PHRASE_CHARS {
                *hits.entry(phrase).or_insert(0) += 1;
            }
        }
        hits
    }

    fn annotation_pairs(&self, translated: &str) -> Vec<AnnotationPair> {
        ANNOTATION_RE
            .captures_iter(translated)
            .filter_map(|c| {
                let rendering = trim_rendering(&c[1])?;
                Some(AnnotationPair {
                    rendering,
                    source: c[2].trim().to_string(),
                    lead: c[1].to_string(),
                })
            })
            .collect()
    }

    fn strip_annotations(&self, translated: &str) -> String {
        ANNOTATION_RE.replace_all(translated, "${1}").into_owned()
    }

    fn transliteration_runs(&self, translated: &str) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut run = String::new();
        let mut flush = |run: &mut String| {
            let n = run.chars().count();
            if (MIN_RUN_CHARS..=MAX_RUN_CHARS).contains(&n) {
                *counts.entry(std::mem::take(run)).or_insert(0) += 1;
            } else {
                run.clear();
            }
        };
        for ch in translated.chars() {
            if is_transliteration_glyph(ch) {
                run.push(ch);
            } else {
                flush(&mut run);
            }
        }
        flush(&mut run);
        counts
    }
}

fn is_rendering_char(ch: char) -> bool {
    is_transliteration_glyph(ch) || is_kana(ch) || ch == '·'
}

fn is_han(ch: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&ch)
}

fn is_kana(ch: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&ch)
}

/// The regex captures the whole run of non-Latin letters before the gloss, which in
/// unspaced scripts includes the preceding words. Walk back from the gloss over
/// transliteration glyphs, bridging a single other Han character between two of them
/// (`雷斯垂德`), and stop at function characters. Renderings under two characters are
/// dropped.
fn trim_rendering(raw: &str) -> Option<String> {
    let raw = raw.trim_matches(|c: char| c == '·' || c == '・');
    if raw.is_empty() {
        return None;
    }
    if !has_cjk(raw) && !raw.chars().any(is_kana) {
        return Some(raw.to_string());
    }
    let chars: Vec<char> = raw.chars().collect();
    let mut start = chars.len();
    while start > 0 && chars.len() - start < MAX_RUN_CHARS {
        let ch = chars[start - 1];
        let bridge = start >= 2
            && start < chars.len()
            && !FUNCTION_CHARS.contains(ch)
            && is_han(ch)
            && is_rendering_char(chars[start - 2]);
        if is_rendering_char(ch) || bridge {
            start -= 1;
        } else {
            break;
        }
    }
    let suffix: String = chars[start..]
        .iter()
        .collect::<String>()
        .trim_start_matches('·')
        .to_string();
    let rendering = if suffix.is_empty() {
        if chars.len() > MAX_PLAIN_RENDERING_CHARS {
            return None;
        }
        raw.to_string()
    } else {
        suffix
    };
    (rendering.chars().count() >= MIN_RENDERING_CHARS).then_some(rendering)
}
