use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

/// Chunk-level progress of the chapter a job is currently translating.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    pub chapter_index: usize,
    pub chapter_title: String,
    pub chunks_done: usize,
    pub chunks_total: usize,
}

pub trait ProgressObserver: Send + Sync {
    fn on_chunk_progress(&self, progress: &ChunkProgress);

    fn on_message(&self, _msg: &str) {}
}

/// Shared progress slot for one job, optionally mirrored to an observer.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    slot: Arc<Mutex<Option<ChunkProgress>>>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            observer,
        }
    }

    pub fn set(&self, chapter_index: usize, chapter_title: &str, done: usize, total: usize) {
        let p = ChunkProgress {
            chapter_index,
            chapter_title: chapter_title.to_string(),
            chunks_done: done,
            chunks_total: total,
        };
        if let Some(obs) = &self.observer {
            obs.on_chunk_progress(&p);
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(p);
        }
    }

    pub fn message(&self, msg: &str) {
        if let Some(obs) = &self.observer {
            obs.on_message(msg);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    pub fn snapshot(&self) -> Option<ChunkProgress> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }
}

pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_chunk_progress(&self, p: &ChunkProgress) {
        let label = format!("ch{:03} {}", p.chapter_index + 1, p.chapter_title);
        self.progress(&label, p.chunks_done, p.chunks_total);
    }

    fn on_message(&self, msg: &str) {
        self.info(msg);
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
