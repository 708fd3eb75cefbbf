//! Book-wide name consistency: which target-language strings render each source name.

pub mod classify;
pub mod detector;
pub mod dictionary;
pub mod phonetic;
pub mod reconciler;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use detector::{AnnotationPair, NameDetector, RegexNameDetector};
pub use reconciler::NameReconciler;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Occurrences of the source name across scanned chapter sources.
    pub total: u64,
    /// Target rendering -> occurrences in translated text.
    #[serde(default)]
    pub translations: BTreeMap<String, u64>,
}

impl NameRecord {
    pub fn add_variant(&mut self, variant: &str, count: u64) {
        if count == 0 || variant.is_empty() {
            return;
        }
        *self.translations.entry(variant.to_string()).or_insert(0) += count;
    }

    /// Renderings ordered by descending count.
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut v: Vec<(&str, u64)> = self
            .translations
            .iter()
            .map(|(k, c)| (k.as_str(), *c))
            .collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        v
    }
}

/// What one scanned chapter added to the map, kept so a re-translation can replace it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContribution {
    /// Source occurrences per name.
    #[serde(default)]
    pub totals: BTreeMap<String, u64>,
    /// Name -> rendering -> occurrences in this chapter's translation.
    #[serde(default)]
    pub renderings: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Stored name map. Entries seen only once in the source stay in `entries` so later
/// chapters can add to them, but every reader below sees only names with `total > 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMap {
    #[serde(default)]
    pub entries: BTreeMap<String, NameRecord>,
    /// Chapter id -> its contribution to `entries`.
    #[serde(default)]
    pub chapters: BTreeMap<String, ChapterContribution>,
}

fn recurring(rec: &NameRecord) -> bool {
    rec.total > 1
}

impl NameMap {
    pub fn get(&self, name: &str) -> Option<&NameRecord> {
        self.entries.get(name).filter(|r| recurring(r))
    }

    pub fn entry_mut(&mut self, name: &str) -> &mut NameRecord {
        self.entries.entry(name.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NameRecord)> {
        self.entries.iter().filter(|(_, r)| recurring(r))
    }

    pub fn is_scanned(&self, chapter_id: &str) -> bool {
        self.chapters.contains_key(chapter_id)
    }

    /// Replaces a chapter's previous contribution with `next`.
    ///
    /// Rendering counts from the earlier translation are subtracted first. A name's
    /// source total is added only the first time the chapter reports it, since the
    /// source text does not change between translations.
    pub fn record_chapter(&mut self, chapter_id: &str, mut next: ChapterContribution) {
        let old = self.chapters.remove(chapter_id).unwrap_or_default();
        for (name, variants) in &old.renderings {
            let Some(rec) = self.entries.get_mut(name) else {
                continue;
            };
            for (v, n) in variants {
                if let Some(have) = rec.translations.get_mut(v) {
                    *have = have.saturating_sub(*n);
                    if *have == 0 {
                        rec.translations.remove(v);
                    }
                }
            }
        }
        for (name, n) in &next.totals {
            if !old.totals.contains_key(name) {
                self.entry_mut(name).total += n;
            }
        }
        for (name, n) in old.totals {
            next.totals.entry(name).or_insert(n);
        }
        for (name, variants) in &next.renderings {
            let rec = self.entry_mut(name);
            for (v, n) in variants {
                rec.add_variant(v, *n);
            }
        }
        self.chapters.insert(chapter_id.to_string(), next);
    }

    /// Folds the counts of `find` into `replace` for every name that used it.
    pub fn merge_variant(&mut self, find: &str, replace: &str) {
        let records = self.entries.values_mut().map(|r| &mut r.translations);
        let contributions = self
            .chapters
            .values_mut()
            .flat_map(|c| c.renderings.values_mut());
        for counts in records.chain(contributions) {
            if let Some(n) = counts.remove(find) {
                *counts.entry(replace.to_string()).or_insert(0) += n;
            }
        }
    }

    /// Names with more than one rendering in use, most frequent first.
    pub fn inconsistent(&self) -> Vec<(&str, &NameRecord)> {
        let mut v: Vec<(&str, &NameRecord)> = self
            .iter()
            .filter(|(_, r)| r.translations.len() > 1)
            .map(|(k, r)| (k.as_str(), r))
            .collect();
        v.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
        v
    }
}
