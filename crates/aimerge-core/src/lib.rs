pub mod config;
pub mod document;
pub mod language;
pub mod logging;
pub mod markers;
pub mod secrets;

pub use config::{BackendKind, Settings};
pub use document::{Document, FileDocument, GitWorkspace, Workspace};
pub use language::Language;
pub use markers::Conflict;
pub use secrets::{FileSecretStore, NoPrompt, SecretPrompt, SecretStore};
