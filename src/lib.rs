pub mod artifacts;
pub mod config;
pub mod consult;
pub mod error;
pub mod import;
pub mod jobs;
pub mod llm;
pub mod model;
pub mod names;
pub mod pipeline;
pub mod planning;
pub mod progress;
pub mod state;
pub mod store;
pub mod textutil;
pub mod titles;

pub use error::EngineError;
pub use pipeline::Orchestrator;
