//! Weak signals for matching a source name to an unexplained target-script token.

use std::collections::BTreeSet;

use pinyin::ToPinyin;

/// Consonant substitutions that transliteration into Chinese makes systematically.
const EQUIVALENT_ONSETS: &[&[&str]] = &[
    &["l", "r", "n"],
    &["b", "p"],
    &["d", "t"],
    &["g", "k"],
    &["v", "w", "f"],
    &["s", "z", "c", "x"],
    &["sh", "x", "s"],
    &["h", "f", "hu"],
    &["j", "zh", "g"],
];

const LCS_MAX_CHARS: usize = 20;
pub const COOCCURRENCE_WEIGHT: f64 = 0.6;
pub const PHONETIC_WEIGHT: f64 = 0.4;
pub const ACCEPT_THRESHOLD: f64 = 0.35;

/// Toneless pinyin of the Han characters; other letters are lowercased as-is.
pub fn romanize(token: &str) -> String {
    let mut out = String::new();
    for ch in token.chars() {
        match ch.to_pinyin() {
            Some(p) => out.push_str(p.plain()),
            None if ch.is_alphanumeric() => out.extend(ch.to_lowercase()),
            None => {}
        }
    }
    out
}

fn onsets_match(a: &str, b: &str) -> bool {
    a == b
        || EQUIVALENT_ONSETS
            .iter()
            .any(|g| g.contains(&a) && g.contains(&b))
}

/// Normalized longest common subsequence; 0 when either side is too long to bother.
pub fn lcs_ratio(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 || a.len() > LCS_MAX_CHARS || b.len() > LCS_MAX_CHARS {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()] as f64 / longest as f64
}

/// 0..=1 similarity between a Latin-script name and a target token.
pub fn phonetic_similarity(name: &str, token: &str) -> f64 {
    let py: Vec<char> = romanize(token).chars().collect();
    let en: Vec<char> = name.to_lowercase().chars().collect();
    if py.is_empty() || en.is_empty() {
        return 0.0;
    }

    let mut onset = if py[0] == en[0] { 1.0 } else { 0.0 };
    if onset == 0.0 {
        'outer: for plen in [2, 1] {
            for elen in [2, 1] {
                if plen > py.len() || elen > en.len() {
                    continue;
                }
                let p: String = py[..plen].iter().collect();
                let e: String = en[..elen].iter().collect();
                if onsets_match(&p, &e) {
                    onset = 0.7;
                    break 'outer;
                }
            }
        }
    }
    onset * 0.5 + lcs_ratio(&py, &en) * 0.5
}

/// Mean of recall and precision between the chapters a name and a token appear in.
/// `None` when they never share a chapter.
pub fn cooccurrence(name_chapters: &BTreeSet<usize>, token_chapters: &BTreeSet<usize>) -> Option<f64> {
    let shared = name_chapters.intersection(token_chapters).count();
    if shared == 0 {
        return None;
    }
    let recall = shared as f64 / name_chapters.len() as f64;
    let precision = shared as f64 / token_chapters.len() as f64;
    Some((recall + precision) / 2.0)
}

pub fn combined_score(cooccurrence: f64, phonetic: f64) -> f64 {
    cooccurrence * COOCCURRENCE_WEIGHT + phonetic * PHONETIC_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn romanizes_han() {
        assert_eq!(romanize("福尔摩斯"), "fuermosi");
        assert_eq!(romanize("华生"), "huasheng");
    }

    #[test]
    fn holmes_scores_through_h_f_equivalence() {
        // onset h~f = 0.7, lcs("fuermosi", "holmes") = 2/8
        let s = phonetic_similarity("Holmes", "福尔摩斯");
        assert!((s - 0.475).abs() < 1e-9, "{s}");
    }

    #[test]
    fn exact_onset_beats_equivalence() {
        assert!(phonetic_similarity("Mary", "玛丽") > phonetic_similarity("Holmes", "福尔摩斯"));
    }

    #[test]
    fn lcs_skips_long_strings() {
        let long: Vec<char> = "a".repeat(21).chars().collect();
        assert_eq!(lcs_ratio(&long, &long), 0.0);
        let a: Vec<char> = "abc".chars().collect();
        assert_eq!(lcs_ratio(&a, &a), 1.0);
    }

    #[test]
    fn cooccurrence_requires_overlap() {
        let a: BTreeSet<usize> = [0, 1, 2, 3].into();
        let b: BTreeSet<usize> = [2, 3].into();
        assert_eq!(cooccurrence(&a, &b), Some(0.75));
        let c: BTreeSet<usize> = [7].into();
        assert_eq!(cooccurrence(&a, &c), None);
    }
}
