use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use book_translator::artifacts::TextArtifactWriter;
use book_translator::config::{init_default_config, EngineConfig};
use book_translator::consult::Question;
use book_translator::import::import_text_book;
use book_translator::llm::OpenAiClient;
use book_translator::model::{Strategy, StrategyOverrides};
use book_translator::pipeline::{BatchOutcome, ChapterOutcome, Orchestrator};
use book_translator::progress::ConsoleProgress;
use book_translator::store::{JsonStore, Store};

#[derive(Parser, Debug)]
#[command(name = "book-translator")]
#[command(about = "Whole-book LLM translator with consistent names and resumable runs", long_about = None)]
struct Args {
    /// Config file path (default: search for book-translator.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hide chunk progress lines
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate default config + prompt files, then exit
    InitConfig {
        /// Directory to write config/prompt files (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Create a project from a plain-text book (chapters split on heading lines)
    Import {
        #[arg(value_name = "TXT")]
        input: PathBuf,
        /// Project name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        source_lang: Option<String>,
        #[arg(long)]
        target_lang: Option<String>,
    },
    /// List projects, or show one project's chapters and name map
    Status { project: Option<String> },
    /// Research and analyze the book; with --feedback, refine the existing analysis
    Analyze {
        project: String,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Generate the translation strategy, regenerate it with feedback, or import one
    Strategy {
        project: String,
        #[arg(long, conflicts_with = "import")]
        feedback: Option<String>,
        /// Strategy JSON file to store instead of generating
        #[arg(long, value_name = "JSON")]
        import: Option<PathBuf>,
    },
    /// Translate the opening of one chapter as a preview
    Sample {
        project: String,
        /// 1-based chapter number (default: 1)
        #[arg(long)]
        chapter: Option<usize>,
    },
    /// Translate a chapter range, skipping finished chapters (Ctrl-C stops after the current batch)
    Translate {
        project: String,
        /// First chapter, 1-based
        #[arg(long, default_value_t = 1)]
        from: usize,
        /// Last chapter, 1-based (default: last)
        #[arg(long)]
        to: Option<usize>,
    },
    /// Translate or retranslate one chapter
    TranslateChapter {
        project: String,
        /// 1-based chapter number
        chapter: usize,
        /// Reviewer feedback for a retranslation
        #[arg(long)]
        feedback: Option<String>,
        /// Prefer idiomatic phrasing for this run only
        #[arg(long)]
        free: bool,
    },
    /// Rebuild the name map from all translated chapters
    RescanNames { project: String },
    /// Replace one rendering of a name with another in every translated chapter
    UnifyName {
        project: String,
        find: String,
        replace: String,
    },
    /// Translate every chapter title (five per request)
    TranslateTitles { project: String },
    /// Ask about the translation: word choices, names, cultural references
    Ask {
        project: String,
        question: String,
        /// 1-based chapter number the selection comes from
        #[arg(long)]
        chapter: Option<usize>,
        /// Selected passage of the original
        #[arg(long)]
        original: Option<String>,
        /// Selected passage of the translation
        #[arg(long)]
        translation: Option<String>,
    },
    /// Write the whole-book output from translated chapters
    Combine { project: String },
    /// List stored translation versions of a chapter
    Versions {
        project: String,
        /// 1-based chapter number
        chapter: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if let Command::InitConfig { dir, force } = &args.command {
        let dir = dir.clone().unwrap_or_else(|| cwd.clone());
        let cfg_path = init_default_config(&dir, *force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let cfg = EngineConfig::load(args.config.clone(), &cwd).context("load config")?;
    let store = Arc::new(JsonStore::open(&cfg.data_dir)?);
    let client = Arc::new(OpenAiClient::from_settings(&cfg.llm)?);
    let artifacts = Arc::new(TextArtifactWriter::new(cfg.output_dir.clone()));
    let defaults = cfg.translation.clone();
    let orch = Orchestrator::new(cfg, store.clone(), client, artifacts)
        .with_observer(Arc::new(ConsoleProgress::new(!args.quiet)));

    match args.command {
        Command::InitConfig { .. } => {}
        Command::Import {
            input,
            name,
            source_lang,
            target_lang,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("read book: {}", input.display()))?;
            let name = name.unwrap_or_else(|| {
                input
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("book")
                    .to_string()
            });
            let project = import_text_book(
                store.as_ref(),
                &name,
                &text,
                source_lang.as_deref().unwrap_or(&defaults.source_language),
                target_lang.as_deref().unwrap_or(&defaults.target_language),
            )?;
            println!("{}", project.id);
        }
        Command::Status { project: None } => {
            for p in store.list_projects()? {
                println!("{}  {:<20}  {}", p.id, p.status.as_str(), p.name);
            }
        }
        Command::Status { project: Some(key) } => {
            let pid = resolve_project(store.as_ref(), &key)?;
            print_status(store.as_ref(), &pid)?;
        }
        Command::Analyze { project, feedback } => {
            let pid = prepare(&orch, &project)?;
            let analysis = match feedback {
                Some(fb) => orch.refine_analysis(&pid, &fb).await?,
                None => orch.analyze_book(&pid).await?,
            };
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Strategy {
            project,
            feedback,
            import,
        } => {
            let pid = prepare(&orch, &project)?;
            let strategy = if let Some(path) = import {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("read strategy: {}", path.display()))?;
                let s: Strategy = serde_json::from_str(&text).context("parse strategy json")?;
                orch.import_strategy(&pid, s)?
            } else if let Some(fb) = feedback {
                orch.regenerate_strategy(&pid, &fb).await?
            } else {
                orch.generate_strategy(&pid).await?
            };
            println!("{}", serde_json::to_string_pretty(&strategy)?);
        }
        Command::Sample { project, chapter } => {
            let pid = prepare(&orch, &project)?;
            let text = orch
                .translate_sample(&pid, chapter.map(|c| c.saturating_sub(1)))
                .await?;
            println!("{text}");
        }
        Command::Translate { project, from, to } => {
            let pid = prepare(&orch, &project)?;
            let run = orch.translate_all(&pid, from.saturating_sub(1), to.map(|t| t.saturating_sub(1)));
            match stoppable(&orch, &pid, run).await? {
                BatchOutcome::Completed { translated } => {
                    eprintln!("Book complete ({translated} chapters translated this run)");
                    if let Some(path) = orch.combine_book(&pid)? {
                        eprintln!("Wrote {}", path.display());
                    }
                }
                BatchOutcome::Partial { translated } => {
                    eprintln!("Range complete ({translated} chapters translated)");
                }
                BatchOutcome::Stopped { translated } => {
                    eprintln!("Stopped after {translated} chapters; run again to resume");
                }
            }
        }
        Command::TranslateChapter {
            project,
            chapter,
            feedback,
            free,
        } => {
            let pid = prepare(&orch, &project)?;
            let cid = chapter_id(store.as_ref(), &pid, chapter)?;
            let overrides = free.then(|| StrategyOverrides {
                free_translation: Some(true),
                ..StrategyOverrides::default()
            });
            let run = orch.translate_chapter(&pid, &cid, feedback.as_deref(), overrides.as_ref());
            match stoppable(&orch, &pid, run).await? {
                ChapterOutcome::Completed(text) => println!("{text}"),
                ChapterOutcome::Stopped {
                    chunks_done,
                    chunks_total,
                } => eprintln!("Stopped at chunk {chunks_done}/{chunks_total}"),
            }
        }
        Command::RescanNames { project } => {
            let pid = prepare(&orch, &project)?;
            let map = orch.rescan_all_names(&pid).await?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        Command::UnifyName {
            project,
            find,
            replace,
        } => {
            let pid = prepare(&orch, &project)?;
            let n = orch.unify_name(&pid, &find, &replace)?;
            eprintln!("Replaced {n} occurrence(s) of {find} with {replace}");
        }
        Command::TranslateTitles { project } => {
            let pid = prepare(&orch, &project)?;
            let n = orch.translate_titles(&pid).await?;
            eprintln!("Translated {n} chapter title(s)");
        }
        Command::Ask {
            project,
            question,
            chapter,
            original,
            translation,
        } => {
            let pid = resolve_project(store.as_ref(), &project)?;
            let cid = chapter
                .map(|n| chapter_id(store.as_ref(), &pid, n))
                .transpose()?;
            let q = Question {
                text: question,
                chapter_id: cid,
                selected_original: original,
                selected_translation: translation,
            };
            println!("{}", orch.ask_about_translation(&pid, &q).await?);
        }
        Command::Combine { project } => {
            let pid = resolve_project(store.as_ref(), &project)?;
            match orch.combine_book(&pid)? {
                Some(path) => eprintln!("Wrote {}", path.display()),
                None => eprintln!("Nothing translated yet"),
            }
        }
        Command::Versions { project, chapter } => {
            let pid = resolve_project(store.as_ref(), &project)?;
            let cid = chapter_id(store.as_ref(), &pid, chapter)?;
            for v in orch.list_versions(&pid, &cid)? {
                println!(
                    "v{}  {}  strategy {}  {}  {}",
                    v.version,
                    v.created_at.format("%Y-%m-%d %H:%M"),
                    v.strategy_version.map_or_else(|| "-".to_string(), |s| format!("v{s}")),
                    &v.digest[..v.digest.len().min(12)],
                    v.feedback.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

/// Resolves the project and clears a status left behind by a killed process.
fn prepare(orch: &Orchestrator, key: &str) -> anyhow::Result<String> {
    let pid = resolve_project(orch.store(), key)?;
    if orch.recover_interrupted(&pid)? {
        eprintln!("Previous run was interrupted; project marked as error");
    }
    Ok(pid)
}

/// Accepts a full id, a unique id prefix, or an exact project name.
fn resolve_project(store: &dyn Store, key: &str) -> anyhow::Result<String> {
    let projects = store.list_projects()?;
    if let Some(p) = projects.iter().find(|p| p.id == key) {
        return Ok(p.id.clone());
    }
    let matches: Vec<_> = projects
        .iter()
        .filter(|p| p.id.starts_with(key) || p.name == key)
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => Err(anyhow::anyhow!("no project matches {key:?}")),
        _ => Err(anyhow::anyhow!("{key:?} matches {} projects", matches.len())),
    }
}

fn chapter_id(store: &dyn Store, project_id: &str, number: usize) -> anyhow::Result<String> {
    store
        .list_chapters(project_id)?
        .into_iter()
        .find(|c| c.index + 1 == number)
        .map(|c| c.id)
        .with_context(|| format!("no chapter {number}"))
}

fn print_status(store: &dyn Store, project_id: &str) -> anyhow::Result<()> {
    let p = store.get_project(project_id)?;
    println!("{} ({})", p.name, p.id);
    println!("status: {}", p.status);
    if let Some(msg) = &p.error_message {
        println!("message: {msg}");
    }
    println!("languages: {} -> {}", p.source_language, p.target_language);
    for c in store.list_chapters(project_id)? {
        println!(
            "{:>4}  {:<11}  v{:<3}  {}{}",
            c.index + 1,
            c.status.as_str(),
            c.translation_version,
            c.title,
            if c.excerpt { "  (sample excerpt)" } else { "" }
        );
    }
    let inconsistent = p.name_map.inconsistent();
    if !inconsistent.is_empty() {
        println!("\nnames with several renderings:");
        for (name, rec) in inconsistent {
            let variants: Vec<String> = rec
                .ranked()
                .into_iter()
                .map(|(v, n)| format!("{v} x{n}"))
                .collect();
            println!("  {name}: {}", variants.join(", "));
        }
    }
    Ok(())
}

/// Runs a stoppable job; Ctrl-C asks it to stop at the next batch boundary.
async fn stoppable<T>(
    orch: &Orchestrator,
    project_id: &str,
    run: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::pin!(run);
    tokio::select! {
        out = &mut run => out,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("stop requested, finishing the current batch");
            orch.request_stop(project_id);
            run.await
        }
    }
}
