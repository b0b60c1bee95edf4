pub mod backend;
pub mod hosted;
pub mod local;
pub mod orchestrator;
pub mod prompt;
pub mod reply;
pub mod selector;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{BackendError, ModelParams, ResolutionBackend, ResolutionRequest, ResolutionResponse};
pub use hosted::HostedBackend;
pub use local::LocalBackend;
pub use orchestrator::{BatchResult, BatchSummary, CancelFlag, ResolutionOrchestrator, ALTERNATIVE_TEMPERATURES};
pub use selector::{BackendFactory, BackendSelector, HttpBackendFactory, SwitchOutcome};
