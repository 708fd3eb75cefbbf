use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};

pub const CONFIG_FILE_NAME: &str = "book-translator.toml";
pub const CONFIG_ENV: &str = "BOOK_TRANSLATOR_CONFIG";
pub const API_KEY_ENV: &str = "BOOK_TRANSLATOR_API_KEY";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub translation: TranslationSection,
    #[serde(default)]
    pub names: NamesSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LlmSection {
    /// "openai" (any OpenAI-compatible endpoint) or "ollama".
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Model used for chapter translation; falls back to `model`.
    #[serde(default)]
    pub translation_model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub translation_max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslationSection {
    #[serde(default)]
    pub max_chunk_chars: Option<usize>,
    /// Chunks dispatched concurrently per batch.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_continuations: Option<usize>,
    #[serde(default)]
    pub sample_max_words: Option<usize>,
    #[serde(default)]
    pub context_summaries: Option<usize>,
    #[serde(default)]
    pub summary_max_chars: Option<usize>,
    #[serde(default)]
    pub analysis_max_words: Option<usize>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct NamesSection {
    #[serde(default)]
    pub classify: Option<bool>,
    #[serde(default)]
    pub classify_batch_size: Option<usize>,
    #[serde(default)]
    pub phonetic_fallback: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate_system: Option<String>,
    #[serde(default)]
    pub translate_user: Option<String>,
    #[serde(default)]
    pub continuation_system: Option<String>,
    #[serde(default)]
    pub continuation_user: Option<String>,
    #[serde(default)]
    pub summary_system: Option<String>,
    #[serde(default)]
    pub classify_names: Option<String>,
    #[serde(default)]
    pub analysis_system: Option<String>,
    #[serde(default)]
    pub strategy_system: Option<String>,
    #[serde(default)]
    pub title_system: Option<String>,
    #[serde(default)]
    pub qa_system: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("openai").trim().to_ascii_lowercase().as_str() {
            "ollama" => Self::Ollama,
            _ => Self::OpenAi,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub translation_model: String,
    pub max_tokens: u32,
    pub translation_max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TranslationSettings {
    pub max_chunk_chars: usize,
    pub concurrency: usize,
    pub max_continuations: usize,
    pub sample_max_words: usize,
    pub context_summaries: usize,
    pub summary_max_chars: usize,
    pub analysis_max_words: usize,
    pub source_language: String,
    pub target_language: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: 12_000,
            concurrency: 3,
            max_continuations: 3,
            sample_max_words: 1500,
            context_summaries: 5,
            summary_max_chars: 15_000,
            analysis_max_words: 20_000,
            source_language: "English".to_string(),
            target_language: "简体中文".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NameSettings {
    pub classify: bool,
    pub classify_batch_size: usize,
    pub phonetic_fallback: bool,
}

impl Default for NameSettings {
    fn default() -> Self {
        Self {
            classify: true,
            classify_batch_size: 40,
            phonetic_fallback: true,
        }
    }
}

/// Fully resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub config_path: Option<PathBuf>,
    pub llm: LlmSettings,
    pub translation: TranslationSettings,
    pub names: NameSettings,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub prompts: PromptSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default(), None, Path::new("."), PromptSet::builtin())
    }
}

impl EngineConfig {
    /// Resolves the config the way the CLI does: explicit path, then env var, then
    /// an upward search from `workdir` and the executable directory.
    pub fn load(explicit: Option<PathBuf>, workdir: &Path) -> anyhow::Result<Self> {
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(workdir, CONFIG_FILE_NAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                tracing::info!(path = %p.display(), "loaded config");
            } else {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
            }
        }
        let base_dir = cfg_file
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.to_path_buf());

        let prompts = PromptSet::load(&base_dir, &file_cfg.prompts).context("load prompts")?;
        Ok(Self::from_app_config(
            &file_cfg,
            cfg_file.filter(|p| p.exists()),
            &base_dir,
            prompts,
        ))
    }

    pub fn from_app_config(
        cfg: &AppConfig,
        config_path: Option<PathBuf>,
        base_dir: &Path,
        prompts: PromptSet,
    ) -> Self {
        let provider = Provider::parse(cfg.llm.provider.as_deref());
        let base_url = non_empty(cfg.llm.base_url.as_deref()).unwrap_or_else(|| match provider {
            Provider::Ollama => "http://localhost:11434/v1".to_string(),
            Provider::OpenAi => "https://api.openai.com/v1".to_string(),
        });
        let api_key = non_empty(cfg.llm.api_key.as_deref())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|s| !s.is_empty()))
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()))
            .or_else(|| (provider == Provider::Ollama).then(|| "ollama".to_string()));
        let model = non_empty(cfg.llm.model.as_deref()).unwrap_or_else(|| "gpt-4o".to_string());
        let translation_model =
            non_empty(cfg.llm.translation_model.as_deref()).unwrap_or_else(|| model.clone());

        let llm = LlmSettings {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            translation_model,
            max_tokens: cfg.llm.max_tokens.unwrap_or(4096),
            translation_max_tokens: cfg.llm.translation_max_tokens.unwrap_or(16_384),
            temperature: cfg.llm.temperature.unwrap_or(0.3),
            timeout_secs: cfg.llm.timeout_secs.unwrap_or(300).max(1),
        };

        let d = TranslationSettings::default();
        let t = &cfg.translation;
        let translation = TranslationSettings {
            max_chunk_chars: t.max_chunk_chars.unwrap_or(d.max_chunk_chars).max(1),
            concurrency: t.concurrency.unwrap_or(d.concurrency).max(1),
            max_continuations: t.max_continuations.unwrap_or(d.max_continuations),
            sample_max_words: t.sample_max_words.unwrap_or(d.sample_max_words).max(1),
            context_summaries: t.context_summaries.unwrap_or(d.context_summaries),
            summary_max_chars: t.summary_max_chars.unwrap_or(d.summary_max_chars),
            analysis_max_words: t.analysis_max_words.unwrap_or(d.analysis_max_words),
            source_language: non_empty(t.source_language.as_deref())
                .unwrap_or(d.source_language),
            target_language: non_empty(t.target_language.as_deref())
                .unwrap_or(d.target_language),
        };

        let nd = NameSettings::default();
        let names = NameSettings {
            classify: cfg.names.classify.unwrap_or(nd.classify),
            classify_batch_size: cfg
                .names
                .classify_batch_size
                .unwrap_or(nd.classify_batch_size)
                .max(1),
            phonetic_fallback: cfg.names.phonetic_fallback.unwrap_or(nd.phonetic_fallback),
        };

        let resolve = |p: Option<&PathBuf>, default: &str| {
            let p = p.cloned().unwrap_or_else(|| PathBuf::from(default));
            if p.is_relative() {
                base_dir.join(p)
            } else {
                p
            }
        };

        Self {
            config_path,
            llm,
            translation,
            names,
            data_dir: resolve(cfg.storage.data_dir.as_ref(), "data"),
            output_dir: resolve(cfg.storage.output_dir.as_ref(), "output"),
            prompts,
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Writes the default config file and prompt templates into `dir`.
///
/// Existing files are kept unless `force` is set.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[llm]
provider = "openai"
base_url = "https://api.openai.com/v1"
# api_key = ""             # or set BOOK_TRANSLATOR_API_KEY / OPENAI_API_KEY
model = "gpt-4o"
# translation_model = ""   # defaults to model
max_tokens = 4096
translation_max_tokens = 16384
temperature = 0.3
timeout_secs = 300

[translation]
max_chunk_chars = 12000
concurrency = 3
max_continuations = 3
sample_max_words = 1500
context_summaries = 5
summary_max_chars = 15000
analysis_max_words = 20000
source_language = "English"
target_language = "简体中文"

[names]
classify = true
classify_batch_size = 40
phonetic_fallback = true

[storage]
data_dir = "data"
output_dir = "output"

[prompts]
translate_system = "prompts/translate_system.txt"
translate_user = "prompts/translate_user.txt"
continuation_system = "prompts/continuation_system.txt"
continuation_user = "prompts/continuation_user.txt"
summary_system = "prompts/summary_system.txt"
classify_names = "prompts/classify_names.txt"
analysis_system = "prompts/analysis_system.txt"
strategy_system = "prompts/strategy_system.txt"
title_system = "prompts/title_system.txt"
qa_system = "prompts/qa_system.txt"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.translation.max_chunk_chars, 12_000);
        assert_eq!(cfg.translation.concurrency, 3);
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.llm.translation_model, "gpt-4o");
        assert_eq!(cfg.names.classify_batch_size, 40);
    }

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_default_config(dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(dir.path().join("prompts/translate_system.txt").exists());

        let cfg = EngineConfig::load(Some(path), dir.path()).unwrap();
        assert_eq!(cfg.translation.target_language, "简体中文");
        assert_eq!(cfg.data_dir, dir.path().join("data"));
        assert!(cfg.prompts.translate_system.contains("{{strategy_text}}"));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let app: AppConfig = toml::from_str(
            "[translation]\nconcurrency = 0\n[llm]\nprovider = \"ollama\"\nmodel = \"qwen2.5\"\n",
        )
        .unwrap();
        let cfg = EngineConfig::from_app_config(&app, None, Path::new("/tmp"), PromptSet::builtin());
        assert_eq!(cfg.translation.concurrency, 1);
        assert_eq!(cfg.llm.provider, Provider::Ollama);
        assert_eq!(cfg.llm.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn init_keeps_existing_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&p, "[llm]\nmodel = \"custom\"\n").unwrap();
        init_default_config(dir.path(), false).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.contains("custom"));
    }
}
