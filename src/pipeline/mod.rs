pub mod chunker;
pub mod continuation;
pub mod orchestrator;
pub mod postprocess;
pub mod prompts;

pub use continuation::{ContinuationLoop, Recovered};
pub use orchestrator::{BatchOutcome, ChapterOutcome, Orchestrator};
pub use prompts::PromptSet;
