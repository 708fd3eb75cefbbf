//! Whole-book reconciliation of source names with their renderings.
//!
//! Candidates come from the strategy's entity list, the analysis character list and the
//! detector. After optional LLM classification, every chapter pair is scanned once
//! (annotation pairs, annotation-free text, transliteration runs) and each verified name
//! collects the renderings actually present in the translation. Names with no direct
//! match can pick up to three renderings through chapter co-occurrence and phonetics.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Context;

use super::classify::NameClassifier;
use super::detector::{AnnotationPair, NameDetector};
use super::phonetic::{combined_score, cooccurrence, phonetic_similarity, ACCEPT_THRESHOLD};
use super::{ChapterContribution, NameMap, NameRecord};
use crate::config::NameSettings;
use crate::error::EngineError;
use crate::llm::ChatClient;
use crate::model::{Analysis, Strategy};
use crate::pipeline::prompts::PromptSet;
use crate::state::Operation;
use crate::store::{ProjectDoc, Store};
use crate::textutil::{has_cjk, head_chars, is_logographic_language};

const MAX_FALLBACK_VARIANTS: usize = 3;
const MIN_PART_CHARS: usize = 3;
const SCRIPT_SNIFF_CHARS: usize = 500;
const MIN_CJK_RENDERING_CHARS: usize = 2;

/// A name worth tracking and the renderings already suggested for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub variants: Vec<String>,
    pub trusted: bool,
}

/// Declared names from the strategy entity list (with their chosen rendering), then
/// analysis characters. First declaration wins.
pub fn trusted_names(strategy: Option<&Strategy>, analysis: Option<&Analysis>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let declared = strategy
        .into_iter()
        .flat_map(|s| s.character_names.iter())
        .map(|e| (e.original.trim(), e.translated.trim()));
    let characters = analysis
        .into_iter()
        .flat_map(|a| a.characters.iter())
        .map(|c| (c.name.trim(), ""));
    for (name, rendering) in declared.chain(characters) {
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        out.push(Candidate {
            name: name.to_string(),
            variants: if rendering.is_empty() {
                Vec::new()
            } else {
                vec![rendering.to_string()]
            },
            trusted: true,
        });
    }
    out
}

/// One translated chapter as the reconciler sees it.
#[derive(Clone, Copy, Debug)]
pub struct ChapterText<'a> {
    pub id: &'a str,
    pub source: &'a str,
    pub translated: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct ReconcileOptions {
    pub logographic: bool,
    pub phonetic_fallback: bool,
}

struct ChapterScan<'a> {
    source: &'a str,
    clean: String,
    pairs: Vec<AnnotationPair>,
    runs: BTreeMap<String, usize>,
}

fn annotation_matches(pair_source: &str, name: &str) -> bool {
    let p = pair_source.to_lowercase();
    p == name.to_lowercase() || name.split_whitespace().any(|part| part.to_lowercase() == p)
}

/// Counts each known rendering, the untranslated name, and (for multi-word names) its
/// longer parts in annotation-free translated text.
pub fn scan_variants<'k>(
    name: &str,
    clean: &str,
    known: impl IntoIterator<Item = &'k str>,
) -> BTreeMap<String, u64> {
    let parts: Vec<&str> = name.split_whitespace().collect();
    let retained: Vec<&str> = if parts.len() >= 2 {
        parts
            .iter()
            .copied()
            .filter(|p| p.chars().count() >= MIN_PART_CHARS)
            .collect()
    } else {
        Vec::new()
    };
    let known: BTreeSet<&str> = known
        .into_iter()
        .filter(|k| !k.is_empty() && *k != name && !retained.contains(k))
        .filter(|k| !has_cjk(k) || k.chars().count() >= MIN_CJK_RENDERING_CHARS)
        .collect();

    let mut out = BTreeMap::new();
    for v in known.into_iter().chain(std::iter::once(name)).chain(retained) {
        let n = clean.matches(v).count() as u64;
        if n > 0 {
            *out.entry(v.to_string()).or_insert(0) += n;
        }
    }
    out
}

/// Rebuilds the name map from scratch over translated chapters.
pub fn reconcile(
    candidates: &[Candidate],
    chapters: &[ChapterText<'_>],
    detector: &dyn NameDetector,
    opts: ReconcileOptions,
) -> NameMap {
    let scans: Vec<ChapterScan<'_>> = chapters
        .iter()
        .map(|c| {
            let clean = detector.strip_annotations(c.translated);
            let runs = if opts.logographic {
                detector.transliteration_runs(&clean)
            } else {
                BTreeMap::new()
            };
            ChapterScan {
                source: c.source,
                pairs: detector.annotation_pairs(c.translated),
                clean,
                runs,
            }
        })
        .collect();

    let mut records: Vec<(String, NameRecord, Vec<usize>)> = Vec::new();
    let mut contributions = vec![ChapterContribution::default(); scans.len()];
    for cand in candidates {
        let mut known: Vec<String> = cand.variants.clone();
        for scan in &scans {
            for p in &scan.pairs {
                if annotation_matches(&p.source, &cand.name) {
                    let r = p.rendering_given(cand.variants.iter().map(String::as_str));
                    if !known.contains(&r) {
                        known.push(r);
                    }
                }
            }
        }
        let mut rec = NameRecord::default();
        let mut per_chapter = Vec::with_capacity(scans.len());
        for (i, scan) in scans.iter().enumerate() {
            let n = scan.source.matches(cand.name.as_str()).count();
            per_chapter.push(n);
            rec.total += n as u64;
            if n > 0 {
                *contributions[i].totals.entry(cand.name.clone()).or_insert(0) += n as u64;
            }
            let variants = scan_variants(&cand.name, &scan.clean, known.iter().map(String::as_str));
            for (v, c) in &variants {
                rec.add_variant(v, *c);
                *contributions[i]
                    .renderings
                    .entry(cand.name.clone())
                    .or_default()
                    .entry(v.clone())
                    .or_insert(0) += c;
            }
        }
        records.push((cand.name.clone(), rec, per_chapter));
    }

    if opts.logographic && opts.phonetic_fallback {
        for (idx, token, counts) in phonetic_fallback(&mut records, &scans) {
            for (i, n) in counts.into_iter().enumerate().filter(|(_, n)| *n > 0) {
                *contributions[i]
                    .renderings
                    .entry(records[idx].0.clone())
                    .or_default()
                    .entry(token.clone())
                    .or_insert(0) += n as u64;
            }
        }
    }

    let mut map = NameMap::default();
    let mut kept = BTreeSet::new();
    for (name, rec, _) in records {
        if rec.total > 1 {
            kept.insert(name.clone());
            map.entries.insert(name, rec);
        }
    }
    for (chapter, mut c) in chapters.iter().zip(contributions) {
        c.totals.retain(|name, _| kept.contains(name));
        c.renderings.retain(|name, _| kept.contains(name));
        map.chapters.insert(chapter.id.to_string(), c);
    }
    map
}

/// Admits unexplained transliteration runs for names that matched nothing directly.
/// Returns `(record index, token, per-chapter counts)` for every admitted run.
fn phonetic_fallback(
    records: &mut [(String, NameRecord, Vec<usize>)],
    scans: &[ChapterScan<'_>],
) -> Vec<(usize, String, Vec<usize>)> {
    let mut vectors: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, scan) in scans.iter().enumerate() {
        for (token, n) in &scan.runs {
            vectors.entry(token.as_str()).or_insert_with(|| vec![0; scans.len()])[i] = *n;
        }
    }
    let mut claimed: HashSet<String> = records
        .iter()
        .flat_map(|(_, r, _)| r.translations.keys().cloned())
        .collect();

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| records[*b].1.total.cmp(&records[*a].1.total));

    let mut admitted = Vec::new();
    for idx in order {
        let (name, rec, per_chapter) = &mut records[idx];
        if rec.total == 0 || !rec.translations.is_empty() {
            continue;
        }
        let name_chapters: BTreeSet<usize> = per_chapter
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(i, _)| i)
            .collect();

        let mut scored: Vec<(&str, f64, &Vec<usize>)> = Vec::new();
        for (token, vec) in &vectors {
            if claimed.contains(*token) {
                continue;
            }
            let token_chapters: BTreeSet<usize> = vec
                .iter()
                .enumerate()
                .filter(|(_, n)| **n > 0)
                .map(|(i, _)| i)
                .collect();
            let Some(co) = cooccurrence(&name_chapters, &token_chapters) else {
                continue;
            };
            let score = combined_score(co, phonetic_similarity(name, token));
            if score >= ACCEPT_THRESHOLD {
                scored.push((*token, score, vec));
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (token, score, counts) in scored.into_iter().take(MAX_FALLBACK_VARIANTS) {
            tracing::debug!(name = %name, token, score, "phonetic/co-occurrence match");
            rec.add_variant(token, counts.iter().sum::<usize>() as u64);
            claimed.insert(token.to_string());
            admitted.push((idx, token.to_string(), counts.clone()));
        }
    }
    admitted
}

/// Store-backed entry points.
pub struct NameReconciler<'a> {
    pub store: &'a dyn Store,
    pub client: &'a dyn ChatClient,
    pub detector: &'a dyn NameDetector,
    pub prompts: &'a PromptSet,
    pub settings: &'a NameSettings,
}

impl NameReconciler<'_> {
    /// Rebuilds and stores the project's name map. Without translated chapters nothing
    /// is stored and an empty map is returned.
    pub async fn rescan_all_names(&self, project_id: &str) -> anyhow::Result<NameMap> {
        let doc = self.store.load(project_id)?;
        Operation::RescanNames.check(doc.project.status)?;

        let chapters: Vec<ChapterText<'_>> = doc
            .chapters
            .iter()
            .filter(|c| !c.source_text.trim().is_empty())
            .filter_map(|c| {
                Some(ChapterText {
                    id: &c.id,
                    source: &c.source_text,
                    translated: c.translation()?,
                })
            })
            .collect();
        if chapters.is_empty() {
            tracing::info!(project = %project_id, "no translated chapters, nothing to rescan");
            return Ok(NameMap::default());
        }

        let candidates = self.discover(&doc).await;
        let logographic = is_logographic_language(&doc.project.target_language)
            || has_cjk(head_chars(chapters[0].translated, SCRIPT_SNIFF_CHARS));
        let map = reconcile(
            &candidates,
            &chapters,
            self.detector,
            ReconcileOptions {
                logographic,
                phonetic_fallback: self.settings.phonetic_fallback,
            },
        );

        let mut next = Some(map.clone());
        self.store
            .update_name_map(project_id, &mut |m| {
                if let Some(n) = next.take() {
                    *m = n;
                }
            })
            .context("store rebuilt name map")?;
        tracing::info!(
            project = %project_id,
            names = map.len(),
            candidates = candidates.len(),
            "name map rebuilt"
        );
        Ok(map)
    }

    /// Trusted names are always kept; detected ones only when they recur and, with
    /// classification on, when the classifier accepts them.
    async fn discover(&self, doc: &ProjectDoc) -> Vec<Candidate> {
        let mut candidates = trusted_names(doc.strategy.as_ref(), doc.analysis.as_ref());
        let all_source = doc
            .chapters
            .iter()
            .map(|c| c.source_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let organic: Vec<String> = self
            .detector
            .source_names(&all_source)
            .into_iter()
            .filter(|(n, count)| *count > 1 && !candidates.iter().any(|c| c.name == *n))
            .map(|(n, _)| n)
            .collect();

        if !self.settings.classify {
            candidates.extend(organic.into_iter().map(|name| Candidate {
                name,
                variants: Vec::new(),
                trusted: false,
            }));
            return candidates;
        }

        let names: Vec<String> = candidates
            .iter()
            .map(|c| c.name.clone())
            .chain(organic.iter().cloned())
            .collect();
        let verdicts = NameClassifier {
            client: self.client,
            prompts: self.prompts,
            source_lang: &doc.project.source_language,
            target_lang: &doc.project.target_language,
            batch_size: self.settings.classify_batch_size,
        }
        .classify(&names)
        .await;
        if verdicts.failed_batches > 0 {
            tracing::warn!(failed = verdicts.failed_batches, "some name batches were not classified");
        }

        for c in &mut candidates {
            if let Some(v) = verdicts.get(&c.name) {
                for s in &v.variants {
                    if !c.variants.contains(s) {
                        c.variants.push(s.clone());
                    }
                }
            }
        }
        for name in organic {
            if let Some(v) = verdicts.get(&name).filter(|v| v.is_name) {
                candidates.push(Candidate {
                    variants: v.variants.clone(),
                    name,
                    trusted: false,
                });
            }
        }
        candidates
    }

    /// Folds one freshly translated chapter into the stored map.
    ///
    /// A re-translated chapter replaces what its previous translation contributed, and
    /// source totals count each chapter once.
    pub fn update_from_chapter(
        &self,
        project_id: &str,
        chapter_id: &str,
        source: &str,
        translated: &str,
    ) -> anyhow::Result<()> {
        let doc = self.store.load(project_id)?;
        let mut candidates = trusted_names(doc.strategy.as_ref(), doc.analysis.as_ref());
        for name in self.detector.source_names(source).into_keys() {
            if !candidates.iter().any(|c| c.name == name) {
                candidates.push(Candidate {
                    name,
                    variants: Vec::new(),
                    trusted: false,
                });
            }
        }

        let clean = self.detector.strip_annotations(translated);
        let pairs = self.detector.annotation_pairs(translated);
        let found: Vec<(Candidate, u64)> = candidates
            .into_iter()
            .filter_map(|mut c| {
                let n = source.matches(c.name.as_str()).count() as u64;
                if n == 0 {
                    return None;
                }
                for p in &pairs {
                    if annotation_matches(&p.source, &c.name) {
                        let r = p.rendering_given(c.variants.iter().map(String::as_str));
                        if !c.variants.contains(&r) {
                            c.variants.push(r);
                        }
                    }
                }
                Some((c, n))
            })
            .collect();
        if found.is_empty() && !doc.project.name_map.is_scanned(chapter_id) {
            return Ok(());
        }

        self.store.update_name_map(project_id, &mut |map| {
            let mut next = ChapterContribution::default();
            for (cand, n) in &found {
                next.totals.insert(cand.name.clone(), *n);
                let existing: Vec<String> = map
                    .entries
                    .get(&cand.name)
                    .map(|r| r.translations.keys().cloned().collect())
                    .unwrap_or_default();
                let known = cand
                    .variants
                    .iter()
                    .map(String::as_str)
                    .chain(existing.iter().map(String::as_str));
                let variants = scan_variants(&cand.name, &clean, known);
                if !variants.is_empty() {
                    next.renderings.insert(cand.name.clone(), variants);
                }
            }
            map.record_chapter(chapter_id, next);
        })?;
        tracing::debug!(project = %project_id, chapter = %chapter_id, names = found.len(), "name map updated");
        Ok(())
    }

    /// Replaces one rendering with another in every translated chapter and merges its
    /// counts in the name map. Returns the number of replacements.
    pub fn unify_name(&self, project_id: &str, find: &str, replace: &str) -> anyhow::Result<usize> {
        let find = find.trim();
        let replace = replace.trim();
        if find.is_empty() || replace.is_empty() || find == replace {
            return Err(EngineError::Precondition(
                "find and replace must be non-empty and different".to_string(),
            )
            .into());
        }
        let status = self.store.get_project(project_id)?.status;
        Operation::UnifyName.check(status)?;

        let mut replaced = 0usize;
        self.store.modify(project_id, &mut |doc| {
            replaced = 0;
            for ch in &mut doc.chapters {
                let Some(text) = ch.translated_text.as_mut() else {
                    continue;
                };
                let n = text.matches(find).count();
                if n > 0 {
                    *text = text.replace(find, replace);
                    replaced += n;
                }
            }
            doc.project.name_map.merge_variant(find, replace);
            Ok(())
        })?;
        tracing::info!(project = %project_id, find, replace, replaced, "name unified");
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    use super::*;
    use crate::llm::mock::{Reply, ScriptedClient};
    use crate::model::{ChapterUpdate, EntityEntry};
    use crate::names::RegexNameDetector;
    use crate::state::ProjectStatus;
    use crate::store::testutil::seed;
    use crate::store::MemoryStore;

    const OPTS: ReconcileOptions = ReconcileOptions {
        logographic: true,
        phonetic_fallback: true,
    };

    fn cand(name: &str, variants: &[&str]) -> Candidate {
        Candidate {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
            trusted: false,
        }
    }

    #[test]
    fn holmes_counts_come_from_clean_text() {
        // 20 source mentions over 4 chapters; one annotated mention; an AI suggestion
        // that never occurs in the translation.
        let src = "Holmes said. ".repeat(5);
        let plain = "福尔摩斯说。".repeat(5);
        let annotated = format!("福尔摩斯（Holmes）说。{}", "福尔摩斯说。".repeat(4));
        let chapters = [
            ChapterText { id: "c0", source: &src, translated: &annotated },
            ChapterText { id: "c1", source: &src, translated: &plain },
            ChapterText { id: "c2", source: &src, translated: &plain },
            ChapterText { id: "c3", source: &src, translated: &plain },
        ];
        let map = reconcile(
            &[cand("Holmes", &["夏洛克", "福尔摩斯"])],
            &chapters,
            &RegexNameDetector,
            OPTS,
        );
        let rec = map.get("Holmes").unwrap();
        assert_eq!(rec.total, 20);
        assert!(rec.translations["福尔摩斯"] >= 20);
        assert!(!rec.translations.contains_key("夏洛克"));
        // The echoed source name inside the gloss is not counted as retention.
        assert!(!rec.translations.contains_key("Holmes"));
    }

    #[test]
    fn annotation_pair_matches_name_part() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Sherlock Holmes arrived. Sherlock Holmes left.",
            translated: "夏洛克·福尔摩斯（Holmes）到了。他走了。",
        }];
        let map = reconcile(&[cand("Sherlock Holmes", &[])], &chapters, &RegexNameDetector, OPTS);
        assert_eq!(map.get("Sherlock Holmes").unwrap().translations["夏洛克·福尔摩斯"], 1);
    }

    #[test]
    fn single_mentions_are_dropped() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Watson came.",
            translated: "华生来了。",
        }];
        let map = reconcile(&[cand("Watson", &["华生"])], &chapters, &RegexNameDetector, OPTS);
        assert!(map.is_empty());
        assert!(map.is_scanned("c0"));
    }

    #[test]
    fn partial_glyph_rendering_is_not_cut_to_one_char() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Lestrade came. He left. Lestrade spoke.",
            translated: "雷斯垂德（Lestrade）来了。他走了。德国人说德语。",
        }];
        let map = reconcile(&[cand("Lestrade", &[])], &chapters, &RegexNameDetector, OPTS);
        let rec = map.get("Lestrade").unwrap();
        assert_eq!(rec.translations["雷斯垂德"], 1);
        assert!(!rec.translations.contains_key("德"));
    }

    #[test]
    fn one_char_suggestions_are_never_counted() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Lestrade came. Lestrade left.",
            translated: "雷斯垂德来了。德国人说德语。",
        }];
        let map = reconcile(&[cand("Lestrade", &["德", "雷斯垂德"])], &chapters, &RegexNameDetector, OPTS);
        let rec = map.get("Lestrade").unwrap();
        assert_eq!(rec.translations.len(), 1);
        assert_eq!(rec.translations["雷斯垂德"], 1);
    }

    #[test]
    fn declared_rendering_overrides_trimmed_annotation() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Hastings came. Hastings smiled.",
            translated: "他看见黑斯廷斯（Hastings）。黑斯廷斯笑了。",
        }];
        let map = reconcile(&[cand("Hastings", &["黑斯廷斯"])], &chapters, &RegexNameDetector, OPTS);
        let rec = map.get("Hastings").unwrap();
        assert_eq!(rec.translations["黑斯廷斯"], 2);
        assert!(!rec.translations.contains_key("斯廷斯"));
    }

    #[test]
    fn contributions_sum_to_records() {
        let src = "Watson came. Watson laughed.";
        let chapters = [
            ChapterText { id: "c0", source: src, translated: "华生（Watson）来了。华生笑了。" },
            ChapterText { id: "c1", source: src, translated: "沃森来了。华生笑了。" },
        ];
        let map = reconcile(&[cand("Watson", &["沃森"])], &chapters, &RegexNameDetector, OPTS);
        let rec = map.get("Watson").unwrap();
        for (v, n) in &rec.translations {
            let sum: u64 = map
                .chapters
                .values()
                .filter_map(|c| c.renderings.get("Watson")?.get(v))
                .sum();
            assert_eq!(sum, *n, "{v}");
        }
        assert_eq!(map.chapters["c1"].totals["Watson"], 2);
    }

    #[test]
    fn retention_counts_name_and_long_parts() {
        let chapters = [ChapterText {
            id: "c0",
            source: "Sherlock Holmes. Sherlock Holmes.",
            translated: "Sherlock Holmes ist hier. Holmes lacht. Al",
        }];
        let map = reconcile(
            &[cand("Sherlock Holmes", &[])],
            &chapters,
            &RegexNameDetector,
            ReconcileOptions {
                logographic: false,
                phonetic_fallback: true,
            },
        );
        let rec = map.get("Sherlock Holmes").unwrap();
        assert_eq!(rec.translations["Sherlock Holmes"], 1);
        assert_eq!(rec.translations["Holmes"], 2);
        assert_eq!(rec.translations["Sherlock"], 1);
    }

    #[test]
    fn fallback_finds_unannotated_transliteration() {
        let src = "Watson came. Watson laughed.";
        let chapters = [
            ChapterText { id: "c0", source: src, translated: "华生来了。华生笑了。" },
            ChapterText { id: "c1", source: src, translated: "华生来了。华生笑了。" },
            ChapterText { id: "c2", source: "He slept.", translated: "他睡了。" },
        ];
        let map = reconcile(&[cand("Watson", &[])], &chapters, &RegexNameDetector, OPTS);
        assert_eq!(map.get("Watson").unwrap().translations["华生"], 4);

        let off = reconcile(
            &[cand("Watson", &[])],
            &chapters,
            &RegexNameDetector,
            ReconcileOptions {
                logographic: true,
                phonetic_fallback: false,
            },
        );
        assert!(off.get("Watson").unwrap().translations.is_empty());
    }

    #[test]
    fn fallback_never_reuses_a_claimed_token() {
        let chapters = [
            ChapterText { id: "c0", source: "Watson. Watson. Mary.", translated: "华生。华生。" },
            ChapterText { id: "c1", source: "Mary. Watson.", translated: "华生。" },
        ];
        let map = reconcile(
            &[cand("Watson", &["华生"]), cand("Mary", &[])],
            &chapters,
            &RegexNameDetector,
            OPTS,
        );
        assert_eq!(map.get("Watson").unwrap().translations["华生"], 3);
        assert!(map.get("Mary").unwrap().translations.is_empty());
    }

    #[test]
    fn trusted_names_prefer_strategy_entries() {
        let s = Strategy {
            character_names: vec![EntityEntry {
                original: "Holmes".into(),
                translated: "福尔摩斯".into(),
                note: String::new(),
            }],
            ..Strategy::default()
        };
        let a = Analysis {
            characters: vec![
                crate::model::AnalysisCharacter {
                    name: "Holmes".into(),
                    description: String::new(),
                },
                crate::model::AnalysisCharacter {
                    name: "Irene Adler".into(),
                    description: String::new(),
                },
            ],
            ..Analysis::default()
        };
        let t = trusted_names(Some(&s), Some(&a));
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].variants, vec!["福尔摩斯".to_string()]);
        assert!(t[1].variants.is_empty());
    }

    fn reconciler<'a>(
        store: &'a MemoryStore,
        client: &'a ScriptedClient,
        prompts: &'a PromptSet,
        settings: &'a NameSettings,
    ) -> NameReconciler<'a> {
        NameReconciler {
            store,
            client,
            detector: &RegexNameDetector,
            prompts,
            settings,
        }
    }

    fn translate(store: &MemoryStore, pid: &str, id: &str, text: &str) {
        store
            .update_chapter(
                pid,
                id,
                ChapterUpdate {
                    translated_text: Some(Some(text.to_string())),
                    ..ChapterUpdate::default()
                },
            )
            .unwrap();
    }

    fn ready(store: &MemoryStore, pid: &str) {
        for s in [
            ProjectStatus::Analyzing,
            ProjectStatus::Analyzed,
            ProjectStatus::GeneratingStrategy,
            ProjectStatus::StrategyGenerated,
        ] {
            store.transition_project(pid, s, None).unwrap();
        }
    }

    #[tokio::test]
    async fn rescan_keeps_trusted_names_the_classifier_rejects() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["Holmes met Lestrade. Holmes nodded. Lestrade left."]);
        ready(&store, &pid);
        translate(&store, &pid, &ids[0], "福尔摩斯见了雷斯垂德。福尔摩斯点头。雷斯垂德走了。");
        store
            .save_strategy(
                &pid,
                Strategy {
                    character_names: vec![EntityEntry {
                        original: "Holmes".into(),
                        translated: "福尔摩斯".into(),
                        note: String::new(),
                    }],
                    ..Strategy::default()
                },
            )
            .unwrap();
        let client = ScriptedClient::new(|_, _| {
            Reply::text(
                r#"{"names":[{"name":"holmes","is_name":false},
                             {"name":"Lestrade","is_name":true,"variants":["雷斯垂德"]}]}"#,
            )
        });
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let map = reconciler(&store, &client, &prompts, &settings)
            .rescan_all_names(&pid)
            .await
            .unwrap();
        assert_eq!(map.get("Holmes").unwrap().translations["福尔摩斯"], 2);
        assert_eq!(map.get("Lestrade").unwrap().translations["雷斯垂德"], 2);
        assert_eq!(store.get_project(&pid).unwrap().name_map, map);
    }

    #[tokio::test]
    async fn rescan_without_translations_is_empty() {
        let store = MemoryStore::new();
        let (pid, _) = seed(&store, &["Holmes. Holmes."]);
        ready(&store, &pid);
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let map = reconciler(&store, &client, &prompts, &settings)
            .rescan_all_names(&pid)
            .await
            .unwrap();
        assert!(map.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn rescan_is_gated_by_status() {
        let store = MemoryStore::new();
        let (pid, _) = seed(&store, &["Holmes. Holmes."]);
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let err = reconciler(&store, &client, &prompts, &settings)
            .rescan_all_names(&pid)
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::engine_error(&err),
            Some(EngineError::IllegalState { .. })
        ));
    }

    #[test]
    fn incremental_update_never_double_counts_totals() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["Holmes and Holmes."]);
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let r = reconciler(&store, &client, &prompts, &settings);
        r.update_from_chapter(&pid, &ids[0], "Holmes and Holmes.", "福尔摩斯（Holmes）和福尔摩斯。")
            .unwrap();
        r.update_from_chapter(&pid, &ids[0], "Holmes and Holmes.", "福尔摩斯和福尔摩斯。")
            .unwrap();
        let map = store.get_project(&pid).unwrap().name_map;
        let rec = map.get("Holmes").unwrap();
        assert_eq!(rec.total, 2);
        // The second pass replaces the first one's counts.
        assert_eq!(rec.translations["福尔摩斯"], 2);
    }

    #[test]
    fn retranslation_drops_superseded_renderings() {
        let store = MemoryStore::new();
        let source = "Holmes came. Holmes left.";
        let (pid, ids) = seed(&store, &[source]);
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let r = reconciler(&store, &client, &prompts, &settings);
        r.update_from_chapter(&pid, &ids[0], source, "霍姆斯（Holmes）来了。霍姆斯走了。")
            .unwrap();
        r.update_from_chapter(&pid, &ids[0], source, "福尔摩斯（Holmes）来了。福尔摩斯走了。")
            .unwrap();
        let map = store.get_project(&pid).unwrap().name_map;
        let rec = map.get("Holmes").unwrap();
        assert_eq!(rec.total, 2);
        assert_eq!(rec.translations, BTreeMap::from([("福尔摩斯".to_string(), 2)]));
    }

    #[test]
    fn single_mention_names_wait_for_a_second_chapter() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["Watson came.", "Watson left."]);
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let r = reconciler(&store, &client, &prompts, &settings);
        r.update_from_chapter(&pid, &ids[0], "Watson came.", "华生（Watson）来了。")
            .unwrap();
        let map = store.get_project(&pid).unwrap().name_map;
        assert!(map.get("Watson").is_none());
        assert!(map.is_empty());

        r.update_from_chapter(&pid, &ids[1], "Watson left.", "华生走了。").unwrap();
        let map = store.get_project(&pid).unwrap().name_map;
        let rec = map.get("Watson").unwrap();
        assert_eq!(rec.total, 2);
        assert_eq!(rec.translations["华生"], 2);
    }

    #[test]
    fn unify_replaces_and_merges() {
        let store = MemoryStore::new();
        let (pid, ids) = seed(&store, &["Holmes.", "Holmes."]);
        ready(&store, &pid);
        translate(&store, &pid, &ids[0], "霍姆斯来了，霍姆斯走了。");
        translate(&store, &pid, &ids[1], "福尔摩斯来了。");
        store
            .update_name_map(&pid, &mut |m| {
                let rec = m.entry_mut("Holmes");
                rec.total = 2;
                rec.add_variant("霍姆斯", 2);
                rec.add_variant("福尔摩斯", 1);
            })
            .unwrap();
        let client = ScriptedClient::echo();
        let prompts = PromptSet::builtin();
        let settings = NameSettings::default();
        let r = reconciler(&store, &client, &prompts, &settings);
        assert_eq!(r.unify_name(&pid, " 霍姆斯 ", "福尔摩斯").unwrap(), 2);
        let ch = store.get_chapter(&pid, &ids[0]).unwrap();
        assert_eq!(ch.translation(), Some("福尔摩斯来了，福尔摩斯走了。"));
        let rec = store.get_project(&pid).unwrap().name_map;
        assert_eq!(rec.get("Holmes").unwrap().translations["福尔摩斯"], 3);

        let err = r.unify_name(&pid, "福尔摩斯", "福尔摩斯").unwrap_err();
        assert!(matches!(
            crate::error::engine_error(&err),
            Some(EngineError::Precondition(_))
        ));
    }

    proptest! {
        #[test]
        fn annotated_variant_always_recorded(c in 2usize..12, prefix in "[他她们说看着的]{0,6}") {
            let source = "Holmes spoke. ".repeat(c);
            let translated = format!("{prefix}福尔摩斯（Holmes）说话了。");
            let store = MemoryStore::new();
            let (pid, ids) = seed(&store, &[source.as_str()]);
            let client = ScriptedClient::echo();
            let prompts = PromptSet::builtin();
            let settings = NameSettings::default();
            reconciler(&store, &client, &prompts, &settings)
                .update_from_chapter(&pid, &ids[0], &source, &translated)
                .unwrap();
            let map = store.get_project(&pid).unwrap().name_map;
            let rec = map.get("Holmes").unwrap();
            prop_assert_eq!(rec.total, c as u64);
            prop_assert!(rec.translations.get("福尔摩斯").copied().unwrap_or(0) >= 1);

            let rebuilt = reconcile(
                &[cand("Holmes", &[])],
                &[ChapterText { id: "c", source: &source, translated: &translated }],
                &RegexNameDetector,
                OPTS,
            );
            prop_assert!(rebuilt.get("Holmes").unwrap().translations.get("福尔摩斯").copied().unwrap_or(0) >= 1);
        }
    }
}
