//! In-memory fakes for the collaborators the resolver talks to.

use crate::backend::{BackendError, ModelParams, ResolutionBackend, ResolutionRequest, ResolutionResponse};
use crate::orchestrator::CancelFlag;
use crate::selector::BackendFactory;
use crate::transport::Transport;
use aimerge_core::{markers, BackendKind, Document, SecretPrompt, SecretStore, Settings, Workspace};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct ScriptedTransport {
    reply: Option<String>,
    models: Vec<String>,
    pub sent: Mutex<Vec<(String, ModelParams)>>,
}

impl ScriptedTransport {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            models: Vec::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            models: Vec::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, instruction: &str, params: &ModelParams) -> anyhow::Result<String> {
        self.sent.lock().unwrap().push((instruction.to_string(), *params));
        self.reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))
    }

    async fn probe(&self) -> anyhow::Result<()> {
        match self.reply {
            Some(_) => Ok(()),
            None => anyhow::bail!("connection refused"),
        }
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        match self.reply {
            Some(_) => Ok(self.models.clone()),
            None => anyhow::bail!("connection refused"),
        }
    }
}

/// What a [`ScriptedBackend`] saw on each call.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub request: ResolutionRequest,
    pub params: ModelParams,
}

/// Backend answering from a queue of outcomes. Once the queue is empty
/// every call succeeds with `"resolved"`.
#[derive(Clone)]
pub struct ScriptedBackend {
    kind: BackendKind,
    valid: bool,
    outcomes: Arc<Mutex<VecDeque<Result<String, String>>>>,
    cancel_on_call: Arc<Mutex<Option<CancelFlag>>>,
    pub calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            valid: true,
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            cancel_on_call: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Trip `flag` during the next call.
    pub fn cancel_on_call(&self, flag: CancelFlag) {
        *self.cancel_on_call.lock().unwrap() = Some(flag);
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn push_ok(&self, resolution: &str) -> &Self {
        self.outcomes.lock().unwrap().push_back(Ok(resolution.to_string()));
        self
    }

    pub fn push_err(&self, message: &str) -> &Self {
        self.outcomes.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ResolutionBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn resolve_with(
        &self,
        request: &ResolutionRequest,
        params: &ModelParams,
    ) -> Result<ResolutionResponse, BackendError> {
        self.calls.lock().unwrap().push(BackendCall {
            request: request.clone(),
            params: *params,
        });
        if let Some(flag) = self.cancel_on_call.lock().unwrap().take() {
            flag.cancel();
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("resolved".to_string()));
        match outcome {
            Ok(resolution) => Ok(ResolutionResponse {
                resolution,
                explanation: "scripted".into(),
                confidence: 0.9,
                alternatives: None,
            }),
            Err(message) => Err(BackendError::request(self.kind, anyhow::anyhow!(message))),
        }
    }

    async fn validate_config(&self) -> bool {
        self.valid
    }

    async fn list_models(&self) -> Vec<String> {
        vec!["scripted".to_string()]
    }
}

/// Factory handing out [`ScriptedBackend`]s and recording each build.
#[derive(Default)]
pub struct ScriptedFactory {
    pub invalid: bool,
    pub builds: Mutex<Vec<(BackendKind, Option<String>)>>,
    pub backends: Mutex<Vec<ScriptedBackend>>,
}

impl ScriptedFactory {
    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn last_build(&self) -> Option<(BackendKind, Option<String>)> {
        self.builds.lock().unwrap().last().cloned()
    }
}

impl BackendFactory for ScriptedFactory {
    fn build(
        &self,
        kind: BackendKind,
        _settings: &Settings,
        credential: Option<&str>,
    ) -> anyhow::Result<Box<dyn ResolutionBackend>> {
        self.builds
            .lock()
            .unwrap()
            .push((kind, credential.map(str::to_string)));
        let mut backend = ScriptedBackend::new(kind);
        if self.invalid {
            backend = backend.invalid();
        }
        self.backends.lock().unwrap().push(backend.clone());
        Ok(Box::new(backend))
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.secrets.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> anyhow::Result<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Prompt that always answers with the same secret and counts how often
/// it was asked.
pub struct ScriptedPrompt {
    answer: Option<String>,
    pub asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn answering(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(str::to_string),
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn prompt_for_secret(&self, _kind: BackendKind) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// A line edit performed on a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub path: PathBuf,
    pub start: usize,
    pub end: usize,
}

/// Shared "disk" behind [`MemoryWorkspace`] and its documents.
#[derive(Default, Clone)]
pub struct MemoryDisk {
    pub files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    pub failing_saves: Arc<Mutex<HashMap<PathBuf, usize>>>,
    pub edits: Arc<Mutex<Vec<Edit>>>,
    pub save_attempts: Arc<AtomicUsize>,
}

impl MemoryDisk {
    pub fn write(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), content.to_string());
    }

    pub fn read(&self, path: &str) -> String {
        self.files
            .lock()
            .unwrap()
            .get(Path::new(path))
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `count` saves of `path` fail.
    pub fn fail_saves(&self, path: &str, count: usize) {
        self.failing_saves
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), count);
    }

    pub fn edits(&self) -> Vec<Edit> {
        self.edits.lock().unwrap().clone()
    }

    pub fn open(&self, path: &str) -> MemoryDocument {
        MemoryDocument {
            path: PathBuf::from(path),
            lines: self.read(path).lines().map(str::to_string).collect(),
            dirty: false,
            disk: self.clone(),
        }
    }
}

pub struct MemoryDocument {
    path: PathBuf,
    lines: Vec<String>,
    dirty: bool,
    disk: MemoryDisk,
}

#[async_trait::async_trait]
impl Document for MemoryDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn language_id(&self) -> Option<&str> {
        aimerge_core::Language::from_path(&self.path).map(|l| l.as_str())
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    fn replace_lines(&mut self, start: usize, end: usize, text: &str) -> anyhow::Result<()> {
        if start > end || end >= self.lines.len() {
            anyhow::bail!("span {}..={} out of range", start, end);
        }
        self.lines
            .splice(start..=end, text.lines().map(str::to_string));
        self.dirty = true;
        self.disk.edits.lock().unwrap().push(Edit {
            path: self.path.clone(),
            start,
            end,
        });
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn revert(&mut self) {
        self.lines = self.disk.read(&self.path.to_string_lossy()).lines().map(str::to_string).collect();
        self.dirty = false;
    }

    async fn save(&mut self) -> anyhow::Result<()> {
        self.disk.save_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut failing = self.disk.failing_saves.lock().unwrap();
            if let Some(remaining) = failing.get_mut(&self.path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("disk full");
                }
            }
        }
        self.disk
            .files
            .lock()
            .unwrap()
            .insert(self.path.clone(), self.lines.join("\n"));
        self.dirty = false;
        Ok(())
    }
}

pub struct MemoryWorkspace {
    pub disk: MemoryDisk,
}

#[async_trait::async_trait]
impl Workspace for MemoryWorkspace {
    async fn find_conflicted_documents(&self) -> anyhow::Result<Vec<Box<dyn Document>>> {
        let paths: Vec<PathBuf> = self
            .disk
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, content)| markers::has_conflicts(content))
            .map(|(path, _)| path.clone())
            .collect();
        Ok(paths
            .iter()
            .map(|p| Box::new(self.disk.open(&p.to_string_lossy())) as Box<dyn Document>)
            .collect())
    }
}
