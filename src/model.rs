use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::names::NameMap;
use crate::state::ProjectStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Pending,
    Translating,
    Translated,
    Reviewed,
}

impl ChapterStatus {
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Translated | Self::Reviewed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Translating => "translating",
            Self::Translated => "translated",
            Self::Reviewed => "reviewed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub sample_chapter_index: Option<usize>,
    #[serde(default)]
    pub name_map: NameMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            status: ProjectStatus::Uploaded,
            error_message: None,
            sample_chapter_index: None,
            name_map: NameMap::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub project_id: String,
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub translated_title: String,
    pub source_text: String,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub status: ChapterStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub translation_version: u32,
    #[serde(default)]
    pub strategy_version: Option<u32>,
    /// The stored translation covers only the opening excerpt (a truncated sample).
    #[serde(default)]
    pub excerpt: bool,
}

impl Chapter {
    pub fn new(
        project_id: impl Into<String>,
        index: usize,
        title: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            index,
            title: title.into(),
            translated_title: String::new(),
            source_text: source_text.into(),
            translated_text: None,
            status: ChapterStatus::Pending,
            summary: None,
            annotations: Vec::new(),
            translation_version: 0,
            strategy_version: None,
            excerpt: false,
        }
    }

    /// Translated text, treating an empty string as absent.
    pub fn translation(&self) -> Option<&str> {
        self.translated_text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GlossaryEntry {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EntityEntry {
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub translated: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationDensity {
    Light,
    #[default]
    Normal,
    Dense,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Strategy {
    #[serde(default)]
    pub overall_approach: String,
    #[serde(default)]
    pub tone_and_style: String,
    #[serde(default)]
    pub cultural_adaptation: String,
    #[serde(default)]
    pub special_considerations: String,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub character_names: Vec<EntityEntry>,
    #[serde(default)]
    pub glossary: Vec<GlossaryEntry>,
    #[serde(default)]
    pub annotate_terms: bool,
    #[serde(default)]
    pub annotate_names: bool,
    #[serde(default)]
    pub annotation_density: AnnotationDensity,
    #[serde(default)]
    pub free_translation: bool,
    #[serde(default)]
    pub version: u32,
}

impl Strategy {
    #[must_use]
    pub fn annotations_enabled(&self) -> bool {
        self.annotate_terms || self.annotate_names
    }

    /// Applies per-call overrides field by field; unset fields keep the stored value.
    #[must_use]
    pub fn with_overrides(&self, o: &StrategyOverrides) -> Strategy {
        let mut s = self.clone();
        if let Some(v) = &o.overall_approach {
            s.overall_approach = v.clone();
        }
        if let Some(v) = &o.tone_and_style {
            s.tone_and_style = v.clone();
        }
        if let Some(v) = &o.custom_instructions {
            s.custom_instructions = v.clone();
        }
        if let Some(v) = o.annotate_terms {
            s.annotate_terms = v;
        }
        if let Some(v) = o.annotate_names {
            s.annotate_names = v;
        }
        if let Some(v) = o.annotation_density {
            s.annotation_density = v;
        }
        if let Some(v) = o.free_translation {
            s.free_translation = v;
        }
        s
    }
}

/// Per-call adjustments to the stored strategy. Never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StrategyOverrides {
    #[serde(default)]
    pub overall_approach: Option<String>,
    #[serde(default)]
    pub tone_and_style: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub annotate_terms: Option<bool>,
    #[serde(default)]
    pub annotate_names: Option<bool>,
    #[serde(default)]
    pub annotation_density: Option<AnnotationDensity>,
    #[serde(default)]
    pub free_translation: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AnalysisCharacter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KeyTerm {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Analysis {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub writing_style: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub cultural_notes: String,
    #[serde(default)]
    pub characters: Vec<AnalysisCharacter>,
    #[serde(default)]
    pub key_terms: Vec<KeyTerm>,
    #[serde(default)]
    pub research_report: String,
}

/// One translator note emitted after the annotation separator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Annotation {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionRecord {
    pub chapter_id: String,
    pub version: u32,
    pub strategy_version: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub digest: String,
    pub translated_title: String,
    #[serde(default)]
    pub feedback: Option<String>,
    pub content: String,
}

/// Field-by-field chapter mutation. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct ChapterUpdate {
    pub status: Option<ChapterStatus>,
    /// `Some(None)` clears the translation.
    pub translated_text: Option<Option<String>>,
    pub translated_title: Option<String>,
    pub summary: Option<String>,
    pub annotations: Option<Vec<Annotation>>,
    pub translation_version: Option<u32>,
    pub strategy_version: Option<u32>,
    pub excerpt: Option<bool>,
}

impl ChapterUpdate {
    pub fn status(status: ChapterStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(self, ch: &mut Chapter) {
        if let Some(v) = self.status {
            ch.status = v;
        }
        if let Some(v) = self.translated_text {
            ch.translated_text = v;
        }
        if let Some(v) = self.translated_title {
            ch.translated_title = v;
        }
        if let Some(v) = self.summary {
            ch.summary = Some(v);
        }
        if let Some(v) = self.annotations {
            ch.annotations = v;
        }
        if let Some(v) = self.translation_version {
            ch.translation_version = v;
        }
        if let Some(v) = self.strategy_version {
            ch.strategy_version = Some(v);
        }
        if let Some(v) = self.excerpt {
            ch.excerpt = v;
        }
    }
}

/// Field-by-field project mutation. Status changes go through the state machine first.
#[derive(Clone, Debug, Default)]
pub struct ProjectUpdate {
    pub status: Option<ProjectStatus>,
    /// `Some(None)` clears the message.
    pub error_message: Option<Option<String>>,
    pub sample_chapter_index: Option<usize>,
    pub source_language: Option<String>,
}

impl ProjectUpdate {
    pub fn apply(self, p: &mut Project) {
        if let Some(v) = self.status {
            p.status = v;
        }
        if let Some(v) = self.error_message {
            p.error_message = v;
        }
        if let Some(v) = self.sample_chapter_index {
            p.sample_chapter_index = Some(v);
        }
        if let Some(v) = self.source_language {
            p.source_language = v;
        }
        p.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_touch_only_set_fields() {
        let base = Strategy {
            overall_approach: "faithful".into(),
            tone_and_style: "dry".into(),
            annotate_names: true,
            version: 4,
            ..Strategy::default()
        };
        let o = StrategyOverrides {
            tone_and_style: Some("playful".into()),
            free_translation: Some(true),
            ..StrategyOverrides::default()
        };
        let s = base.with_overrides(&o);
        assert_eq!(s.overall_approach, "faithful");
        assert_eq!(s.tone_and_style, "playful");
        assert!(s.annotate_names);
        assert!(s.free_translation);
        assert_eq!(s.version, 4);
    }

    #[test]
    fn chapter_update_can_clear_translation() {
        let mut ch = Chapter::new("p", 0, "One", "text");
        ch.translated_text = Some("译文".into());
        ChapterUpdate {
            translated_text: Some(None),
            status: Some(ChapterStatus::Pending),
            ..ChapterUpdate::default()
        }
        .apply(&mut ch);
        assert!(ch.translation().is_none());
        assert_eq!(ch.status, ChapterStatus::Pending);
    }

    #[test]
    fn strategy_tolerates_partial_json() {
        let s: Strategy =
            serde_json::from_str(r#"{"overall_approach":"x","character_names":[{"original":"Holmes"}]}"#)
                .unwrap();
        assert_eq!(s.character_names[0].original, "Holmes");
        assert_eq!(s.character_names[0].translated, "");
        assert_eq!(s.annotation_density, AnnotationDensity::Normal);
    }
}
