use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static CJK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[一-鿿㐀-䶿]").expect("cjk regex"));
static UNSAFE_FILE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("file chars regex"));

const TITLE_MAX_CHARS: usize = 120;

/// Characters after which a line reads as a sentence, not a heading.
const SENTENCE_END: [char; 9] = ['。', '.', '！', '!', '？', '?', '」', '"', '…'];

pub fn has_cjk(text: &str) -> bool {
    CJK_RE.is_match(text)
}

/// Whether a language label names a logographic target (names get transliterated).
pub fn is_logographic_language(label: &str) -> bool {
    let l = label.trim().to_lowercase();
    if has_cjk(&l) {
        return true;
    }
    ["zh", "chinese", "mandarin", "cantonese", "ja", "japanese"]
        .iter()
        .any(|k| l == *k || l.starts_with(&format!("{k}-")) || l.starts_with(&format!("{k} ")))
}

pub fn is_sentence_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '。' | '！' | '？')
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`.
pub fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    let skip = len - n;
    match s.char_indices().nth(skip) {
        Some((i, _)) => &s[i..],
        None => "",
    }
}

/// `s` without its first `n` characters.
pub fn skip_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[i..],
        None => "",
    }
}

/// First `n` characters of `s`.
pub fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// First non-blank line if it looks like a heading, else an empty string.
#[must_use]
pub fn extract_title(translated: &str) -> String {
    let Some(line) = translated.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return String::new();
    };
    if char_len(line) < TITLE_MAX_CHARS && !line.ends_with(SENTENCE_END) {
        line.to_string()
    } else {
        String::new()
    }
}

/// Display title `translated / original`, or the original alone.
#[must_use]
pub fn bilingual_title(original: &str, translated: &str) -> String {
    let t = translated.trim();
    if t.is_empty() || t == original.trim() {
        original.to_string()
    } else {
        format!("{t} / {original}")
    }
}

/// Cuts `text` after `max_words` whitespace-separated words, preferring the last
/// paragraph break when it lies in the final 30% of the cut.
///
/// Returns the cut text and whether anything was removed.
pub fn truncate_to_words(text: &str, max_words: usize) -> (String, bool) {
    let mut words = 0usize;
    let mut in_word = false;
    let mut cut_at: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                in_word = false;
                if words == max_words {
                    cut_at = Some(i);
                    break;
                }
            }
        } else if !in_word {
            in_word = true;
            words += 1;
        }
    }
    let Some(end) = cut_at else {
        return (text.to_string(), false);
    };
    if text[end..].trim().is_empty() {
        return (text.to_string(), false);
    }
    let mut cut = &text[..end];
    if let Some(p) = cut.rfind("\n\n") {
        if p as f64 > cut.len() as f64 * 0.7 {
            cut = &cut[..p];
        }
    }
    (cut.trim_end().to_string(), true)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Replaces characters that are not allowed in file names and caps the length.
pub fn safe_file_name(name: &str, max_chars: usize) -> String {
    let cleaned = UNSAFE_FILE_CHARS_RE.replace_all(name, "_");
    let s = head_chars(&cleaned, max_chars).trim().to_string();
    if s.is_empty() {
        "untitled".to_string()
    } else {
        s
    }
}

#[must_use]
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
