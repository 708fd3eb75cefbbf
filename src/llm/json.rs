use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").expect("fence regex"));

/// Pulls a JSON object out of free-form model output.
///
/// Order: the whole text, then the first fenced block, then the largest balanced
/// `{...}` that parses. Falls back to `{"raw": text}`.
pub fn extract_json(text: &str) -> Value {
    let text = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return v;
    }
    if let Some(inner) = FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            return v;
        }
    }
    let mut best: Option<Map<String, Value>> = None;
    for (start, end) in balanced_objects(text) {
        if let Ok(Value::Object(m)) = serde_json::from_str::<Value>(&text[start..end]) {
            if best.as_ref().map_or(true, |b| m.len() > b.len()) {
                best = Some(m);
            }
        }
    }
    match best {
        Some(m) if !m.is_empty() => Value::Object(m),
        _ => {
            let mut m = Map::new();
            m.insert("raw".to_string(), Value::String(text.to_string()));
            Value::Object(m)
        }
    }
}

/// Like [`extract_json`], but a top-level array is accepted too. `None` when neither an
/// array nor an object can be recovered.
pub fn extract_json_any(text: &str) -> Option<Value> {
    let text = text.trim().trim_matches('`').trim();
    let structured = |s: &str| match serde_json::from_str::<Value>(s.trim()) {
        Ok(v @ (Value::Array(_) | Value::Object(_))) => Some(v),
        _ => None,
    };
    if let Some(v) = structured(text) {
        return Some(v);
    }
    if let Some(inner) = FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        if let Some(v) = structured(inner.as_str()) {
            return Some(v);
        }
    }
    if let (Some(a), Some(b)) = (text.find('['), text.rfind(']')) {
        if let Some(v) = (a < b).then(|| structured(&text[a..=b])).flatten() {
            return Some(v);
        }
    }
    balanced_objects(text)
        .into_iter()
        .filter_map(|(start, end)| match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Object(m)) if !m.is_empty() => Some(m),
            _ => None,
        })
        .max_by_key(|m| m.len())
        .map(Value::Object)
}

pub fn has_any_key(v: &Value, keys: &[&str]) -> bool {
    v.as_object()
        .is_some_and(|m| keys.iter().any(|k| m.contains_key(*k)))
}

/// Byte ranges of top-level `{...}` spans, skipping braces inside string literals.
fn balanced_objects(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_str {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_str = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push((s, i + 1));
                    }
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_object() {
        let v = extract_json(r#" {"names": []} "#);
        assert!(has_any_key(&v, &["names"]));
    }

    #[test]
    fn fenced_block() {
        let v = extract_json("Here you go:\n```json\n{\"genre\": \"mystery\"}\n```\nThanks");
        assert_eq!(v["genre"], "mystery");
    }

    #[test]
    fn largest_balanced_object_wins() {
        let v = extract_json(r#"note {"a":1} and then {"b":2,"c":"}{"} done"#);
        assert_eq!(v["b"], 2);
        assert_eq!(v["c"], "}{");
    }

    #[test]
    fn arrays_survive_prose_and_fences() {
        let v = extract_json_any("Sure:\n[{\"index\": 0, \"translated_title\": \"第一章\"}]\nDone.").unwrap();
        assert_eq!(v[0]["translated_title"], "第一章");
        let v = extract_json_any("```json\n{\"1\": \"第二章\"}\n```").unwrap();
        assert_eq!(v["1"], "第二章");
        assert!(extract_json_any("no json here").is_none());
    }

    #[test]
    fn garbage_becomes_raw() {
        let v = extract_json("sorry, I cannot");
        assert_eq!(v["raw"], "sorry, I cannot");
        assert!(!has_any_key(&v, &["names"]));
    }
}
