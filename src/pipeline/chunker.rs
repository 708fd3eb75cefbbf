//! Splits chapter text into size-bounded, order-preserving chunks.
//!
//! Paragraphs (separated by one or more blank lines) are packed greedily. A paragraph
//! longer than the limit is split into sentences, which are packed the same way and
//! re-joined with a single space.

use crate::textutil::{char_len, is_sentence_terminal};

pub const PARAGRAPH_SEPARATOR: &str = "\n\n";
const SEP_LEN: usize = 2;

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// A single sentence longer than `max_chars` becomes its own oversized chunk.
#[must_use]
pub fn plan(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= max_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for para in split_paragraphs(text) {
        let len = char_len(&para);
        if current_len + len + SEP_LEN > max_chars && !current.is_empty() {
            chunks.push(current.join(PARAGRAPH_SEPARATOR));
            current.clear();
            current_len = 0;
        }
        if len <= max_chars {
            current.push(para);
            current_len += len + SEP_LEN;
            continue;
        }

        let mut buf: Vec<&str> = Vec::new();
        let mut buf_len = 0usize;
        for sentence in split_sentences(&para) {
            let slen = char_len(sentence);
            if buf_len + slen > max_chars && !buf.is_empty() {
                chunks.push(buf.join(" "));
                buf.clear();
                buf_len = 0;
            }
            buf.push(sentence);
            buf_len += slen + 1;
        }
        if !buf.is_empty() {
            // The tail of a split paragraph may share a chunk with what follows.
            current.push(buf.join(" "));
            current_len = buf_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(PARAGRAPH_SEPARATOR));
    }
    chunks
}

/// Non-blank paragraphs; any run of whitespace-only lines is one boundary.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                out.push(lines.join("\n"));
                lines.clear();
            }
        } else {
            lines.push(line.trim_end());
        }
    }
    if !lines.is_empty() {
        out.push(lines.join("\n"));
    }
    out
}

/// Sentences of one paragraph, without the whitespace between them.
///
/// A Latin terminator ends a sentence only when whitespace follows; a CJK terminator
/// always does. Closing quotes and brackets stay with their sentence.
pub fn split_sentences(para: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut iter = para.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        if !is_sentence_terminal(ch) {
            continue;
        }
        let mut end = i + ch.len_utf8();
        while let Some(&(j, next)) = iter.peek() {
            if is_sentence_terminal(next) || is_closing(next) {
                end = j + next.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        let followed_by_ws = para[end..].chars().next().is_some_and(char::is_whitespace);
        let cjk = matches!(ch, '。' | '！' | '？');
        if !(followed_by_ws || cjk) {
            continue;
        }
        let sentence = para[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        let rest = &para[end..];
        let skipped = rest.len() - rest.trim_start().len();
        start = end + skipped;
        while let Some(&(j, _)) = iter.peek() {
            if j < start {
                iter.next();
            } else {
                break;
            }
        }
    }
    let tail = para[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn is_closing(ch: char) -> bool {
    matches!(ch, '"' | '\'' | ')' | '”' | '’' | '」' | '』' | '）' | '》')
}
