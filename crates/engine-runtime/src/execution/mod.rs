pub mod download;
pub mod orchestrator;
pub mod phase;
pub mod runner;
pub mod status;
