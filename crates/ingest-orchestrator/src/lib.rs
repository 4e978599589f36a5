pub mod orchestrator;

pub use orchestrator::{Orchestrator, UpdateOptions};
