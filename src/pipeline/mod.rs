// Data processing pipeline: processing stages, orchestration, and test storage

pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use orchestrator::{Orchestrator, OrchestratorSettings, PipelinePorts, RunContext, RunOutcome, RunState};
