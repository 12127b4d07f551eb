mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{build_manager, open_registry, LiveDetectOrchestrator};
pub use types::{ComponentState, ShutdownReason};
