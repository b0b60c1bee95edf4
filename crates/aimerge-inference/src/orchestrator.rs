use crate::backend::{BackendError, ModelParams, ResolutionRequest, ResolutionResponse};
use crate::selector::BackendSelector;
use aimerge_core::markers::{self, Conflict};
use aimerge_core::{Document, Workspace};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Creativity presets for alternative suggestions, in ascending order.
pub const ALTERNATIVE_TEMPERATURES: [f32; 3] = [0.3, 0.7, 1.0];

/// Cooperative cancellation for batch runs. Checked between units of
/// work; an in-flight backend call is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one conflict in a batch run.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub file_path: PathBuf,
    pub conflict: Conflict,
    pub resolution: Option<ResolutionResponse>,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: usize,
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchResult], started_at: DateTime<Utc>) -> Self {
        let mut files: Vec<&PathBuf> = results.iter().map(|r| &r.file_path).collect();
        files.sort();
        files.dedup();
        let applied = results.iter().filter(|r| r.applied).count();
        Self {
            started_at,
            finished_at: Utc::now(),
            files: files.len(),
            attempted: results.len(),
            applied,
            failed: results.len() - applied,
        }
    }
}

/// Turns detected conflicts into backend requests and writes accepted
/// resolutions back into documents.
pub struct ResolutionOrchestrator {
    selector: BackendSelector,
    workspace: Arc<dyn Workspace>,
}

impl ResolutionOrchestrator {
    pub fn new(selector: BackendSelector, workspace: Arc<dyn Workspace>) -> Self {
        Self { selector, workspace }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut BackendSelector {
        &mut self.selector
    }

    pub fn auto_apply(&self) -> bool {
        self.selector.settings().auto_apply
    }

    fn model_params(&self) -> ModelParams {
        ModelParams {
            max_tokens: self.selector.settings().max_tokens,
            ..ModelParams::default()
        }
    }

    pub fn build_request(&self, document: &dyn Document, conflict: &Conflict) -> ResolutionRequest {
        let context = markers::extract_context(
            &document.text(),
            conflict,
            self.selector.settings().context_lines,
        );
        ResolutionRequest {
            current_content: conflict.current_content.clone(),
            incoming_content: conflict.incoming_content.clone(),
            base_content: conflict.base_content.clone(),
            context,
            file_path: conflict.file_path.display().to_string(),
            language: document.language_id().map(str::to_string),
        }
    }

    /// Resolve one conflict with the active backend. Backend failures are
    /// returned unchanged.
    pub async fn resolve_one(
        &self,
        document: &dyn Document,
        conflict: &Conflict,
    ) -> Result<ResolutionResponse, BackendError> {
        let backend = self.selector.current()?;
        let request = self.build_request(document, conflict);
        tracing::info!(
            file = %conflict.file_path.display(),
            line = conflict.start_line,
            backend = %backend.kind(),
            "Resolving conflict"
        );
        backend.resolve_with(&request, &self.model_params()).await
    }

    /// Replace the conflict's full-line span with `resolution` and save.
    ///
    /// Returns `false` on any failure. A failed save reverts the document's
    /// unsaved edits, so the conflict is still in place and the call can be
    /// retried.
    pub async fn apply(&self, document: &mut dyn Document, conflict: &Conflict, resolution: &str) -> bool {
        match try_apply(document, conflict, resolution).await {
            Ok(()) => {
                tracing::info!(
                    file = %conflict.file_path.display(),
                    start = conflict.start_line,
                    end = conflict.end_line,
                    "Applied resolution"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    file = %conflict.file_path.display(),
                    start = conflict.start_line,
                    error = %e,
                    "Failed to apply resolution"
                );
                false
            }
        }
    }

    /// Resolve and apply every conflict in every conflicted document.
    ///
    /// Files are processed one after another; within a file, conflicts run
    /// bottom-up so earlier spans keep their line numbers. Backend failures
    /// are recorded and skipped. Returns everything gathered before
    /// completion or cancellation.
    pub async fn resolve_all_in_workspace(&self, cancel: &CancelFlag) -> Vec<BatchResult> {
        let run_id = uuid::Uuid::new_v4();
        let mut results = Vec::new();

        let documents = match self.workspace.find_conflicted_documents().await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(run = %run_id, error = %e, "Failed to discover conflicted files");
                return results;
            }
        };
        tracing::info!(run = %run_id, files = documents.len(), "Batch resolution started");

        for mut document in documents {
            if cancel.is_cancelled() {
                tracing::info!(run = %run_id, "Batch resolution cancelled");
                break;
            }
            self.resolve_document(document.as_mut(), cancel, &mut results).await;
        }

        tracing::info!(
            run = %run_id,
            attempted = results.len(),
            applied = results.iter().filter(|r| r.applied).count(),
            "Batch resolution finished"
        );
        results
    }

    async fn resolve_document(
        &self,
        document: &mut dyn Document,
        cancel: &CancelFlag,
        results: &mut Vec<BatchResult>,
    ) {
        let mut conflicts = markers::detect(&document.text(), document.path());
        conflicts.sort_by(|a, b| b.start_line.cmp(&a.start_line));

        for conflict in conflicts {
            if cancel.is_cancelled() {
                return;
            }
            let file_path = document.path().to_path_buf();

            match self.resolve_one(&*document, &conflict).await {
                Ok(response) => {
                    let mut applied = self.apply(document, &conflict, &response.resolution).await;
                    if !applied {
                        tracing::info!(file = %file_path.display(), line = conflict.start_line, "Retrying apply");
                        applied = self.apply(document, &conflict, &response.resolution).await;
                    }
                    results.push(BatchResult {
                        file_path,
                        conflict,
                        resolution: Some(response),
                        applied,
                        error: (!applied).then(|| "failed to apply resolution".to_string()),
                    });
                }
                Err(e) => {
                    tracing::error!(
                        file = %file_path.display(),
                        line = conflict.start_line,
                        error = %e,
                        "Resolution failed"
                    );
                    results.push(BatchResult {
                        file_path,
                        conflict,
                        resolution: None,
                        applied: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    /// Ask for up to `count` independent resolutions at increasing
    /// temperatures. Individual failures are skipped.
    pub async fn suggest_alternatives(
        &self,
        document: &dyn Document,
        conflict: &Conflict,
        count: usize,
    ) -> Result<Vec<ResolutionResponse>, BackendError> {
        let backend = self.selector.current()?;
        let request = self.build_request(document, conflict);
        let base_params = self.model_params();

        let mut suggestions = Vec::new();
        for temperature in ALTERNATIVE_TEMPERATURES.iter().take(count) {
            let params = base_params.with_temperature(*temperature);
            match backend.resolve_with(&request, &params).await {
                Ok(response) => suggestions.push(response),
                Err(e) => {
                    tracing::warn!(temperature = *temperature, error = %e, "Alternative suggestion failed");
                }
            }
        }
        Ok(suggestions)
    }
}

async fn try_apply(document: &mut dyn Document, conflict: &Conflict, resolution: &str) -> anyhow::Result<()> {
    let span_intact = document
        .line_text(conflict.start_line)
        .is_some_and(markers::is_start_marker)
        && document
            .line_text(conflict.end_line)
            .is_some_and(markers::is_end_marker);
    if !span_intact {
        anyhow::bail!(
            "lines {}..={} no longer hold the conflict",
            conflict.start_line,
            conflict.end_line
        );
    }

    document.replace_lines(conflict.start_line, conflict.end_line, resolution)?;
    if let Err(e) = document.save().await {
        document.revert();
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDisk, MemorySecretStore, MemoryWorkspace, ScriptedFactory, ScriptedPrompt};
    use aimerge_core::{BackendKind, GitWorkspace, Settings};

    const TWO_CONFLICTS: &str = "<<<<<<< HEAD\na1\na2\n=======\nb1\n>>>>>>> topic\nkeep\nkeep\nkeep\nkeep\n<<<<<<< HEAD\nc1\n=======\nd1\nd2\n>>>>>>> topic";

    struct Harness {
        disk: MemoryDisk,
        factory: Arc<ScriptedFactory>,
        orchestrator: ResolutionOrchestrator,
    }

    impl Harness {
        async fn new(settings: Settings) -> Self {
            let disk = MemoryDisk::default();
            let factory = Arc::new(ScriptedFactory::default());
            let selector = BackendSelector::with_factory(
                settings,
                Arc::new(MemorySecretStore::default()),
                Arc::new(ScriptedPrompt::answering(None)),
                factory.clone(),
            );
            let workspace = Arc::new(MemoryWorkspace { disk: disk.clone() });
            let mut orchestrator = ResolutionOrchestrator::new(selector, workspace);
            orchestrator
                .selector_mut()
                .switch_to(BackendKind::Local)
                .await
                .unwrap();
            Self {
                disk,
                factory,
                orchestrator,
            }
        }

        fn backend(&self) -> crate::testing::ScriptedBackend {
            self.factory.backends.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[tokio::test]
    async fn test_resolve_one_builds_request_with_context() {
        let mut settings = Settings::default();
        settings.context_lines = 1;
        let harness = Harness::new(settings).await;
        harness.disk.write("src/lib.rs", "before0\nbefore1\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\nafter0\nafter1");

        let document = harness.disk.open("src/lib.rs");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        harness.orchestrator.resolve_one(&document, &conflict).await.unwrap();

        let calls = harness.backend().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let request = &calls[0].request;
        assert_eq!(request.current_content, "x");
        assert_eq!(request.incoming_content, "y");
        assert_eq!(request.file_path, "src/lib.rs");
        assert_eq!(request.language.as_deref(), Some("rust"));
        assert!(request.context.contains("before1"));
        assert!(!request.context.contains("before0"));
        assert!(request.context.contains("after0"));
        assert!(!request.context.contains("after1"));
    }

    #[tokio::test]
    async fn test_resolve_one_propagates_backend_failure() {
        let harness = Harness::new(Settings::default()).await;
        harness.backend().push_err("connection refused");
        harness.disk.write("a.txt", TWO_CONFLICTS);

        let document = harness.disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        let err = harness.orchestrator.resolve_one(&document, &conflict).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_resolve_one_without_backend() {
        let selector = BackendSelector::with_factory(
            Settings::default(),
            Arc::new(MemorySecretStore::default()),
            Arc::new(ScriptedPrompt::answering(None)),
            Arc::new(ScriptedFactory::default()),
        );
        let disk = MemoryDisk::default();
        disk.write("a.txt", TWO_CONFLICTS);
        let orchestrator = ResolutionOrchestrator::new(selector, Arc::new(MemoryWorkspace { disk: disk.clone() }));

        let document = disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        assert!(matches!(
            orchestrator.resolve_one(&document, &conflict).await,
            Err(BackendError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_apply_replaces_span_and_saves() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", "top\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\nbottom");

        let mut document = harness.disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        assert!(harness.orchestrator.apply(&mut document, &conflict, "xy").await);
        assert_eq!(harness.disk.read("a.txt"), "top\nxy\nbottom");

        // The recorded span is stale now and the document is clean.
        assert!(!harness.orchestrator.apply(&mut document, &conflict, "again").await);
        assert_eq!(harness.disk.read("a.txt"), "top\nxy\nbottom");
    }

    #[tokio::test]
    async fn test_apply_save_failure_leaves_conflict_in_place() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", "<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\nbottom");
        harness.disk.fail_saves("a.txt", 1);

        let mut document = harness.disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        assert!(!harness.orchestrator.apply(&mut document, &conflict, "merged").await);
        assert!(!document.is_dirty());
        assert_eq!(document.line_text(0), Some("<<<<<<< HEAD"));

        assert!(harness.orchestrator.apply(&mut document, &conflict, "merged").await);
        assert_eq!(harness.disk.read("a.txt"), "merged\nbottom");
        assert_eq!(document.text(), "merged\nbottom");
    }

    #[tokio::test]
    async fn test_batch_applies_bottom_conflict_first() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.backend().push_ok("second").push_ok("first");

        let results = harness
            .orchestrator
            .resolve_all_in_workspace(&CancelFlag::new())
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.applied && r.error.is_none()));
        assert_eq!(results[0].conflict.start_line, 10);
        assert_eq!(results[1].conflict.start_line, 0);

        let edits = harness.disk.edits();
        assert_eq!(edits.len(), 2);
        assert_eq!((edits[0].start, edits[0].end), (10, 15));
        assert_eq!((edits[1].start, edits[1].end), (0, 5));
        assert_eq!(harness.disk.read("a.txt"), "first\nkeep\nkeep\nkeep\nkeep\nsecond");
    }

    #[tokio::test]
    async fn test_batch_records_backend_failure_and_continues() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.backend().push_err("timeout").push_ok("first");

        let results = harness
            .orchestrator
            .resolve_all_in_workspace(&CancelFlag::new())
            .await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].applied);
        assert!(results[0].resolution.is_none());
        assert!(results[0].error.as_deref().unwrap().contains("timeout"));
        assert!(results[1].applied);
        assert!(harness.disk.read("a.txt").starts_with("first\nkeep"));
        assert!(harness.disk.read("a.txt").contains(">>>>>>> topic"));
    }

    #[tokio::test]
    async fn test_batch_retries_failed_apply_once() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.disk.fail_saves("a.txt", 3);

        let results = harness
            .orchestrator
            .resolve_all_in_workspace(&CancelFlag::new())
            .await;

        // Bottom conflict: initial save and retry both fail. Top conflict:
        // first save fails, retry succeeds.
        assert_eq!(results.len(), 2);
        assert!(!results[0].applied);
        assert!(results[0].error.is_some());
        assert!(results[1].applied);
        assert_eq!(harness.disk.save_attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            harness.disk.read("a.txt"),
            "resolved\nkeep\nkeep\nkeep\nkeep\n<<<<<<< HEAD\nc1\n=======\nd1\nd2\n>>>>>>> topic"
        );
    }

    #[tokio::test]
    async fn test_unapplied_resolution_never_reaches_disk() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.disk.fail_saves("a.txt", 2);
        harness.backend().push_ok("BOTTOM").push_ok("TOP");

        let results = harness
            .orchestrator
            .resolve_all_in_workspace(&CancelFlag::new())
            .await;

        assert!(!results[0].applied);
        assert!(results[1].applied);
        let disk = harness.disk.read("a.txt");
        assert!(!disk.contains("BOTTOM"));
        assert!(disk.starts_with("TOP\nkeep"));
        assert!(disk.ends_with(">>>>>>> topic"));

        let summary = BatchSummary::from_results(&results, Utc::now());
        assert_eq!((summary.applied, summary.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_batch_cancelled_before_start_returns_empty() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let results = harness.orchestrator.resolve_all_in_workspace(&cancel).await;
        assert!(results.is_empty());
        assert_eq!(harness.backend().call_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_cancelled_midway_keeps_partial_results() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.disk.write("b.txt", TWO_CONFLICTS);

        let cancel = CancelFlag::new();
        harness.backend().cancel_on_call(cancel.clone());

        let results = harness.orchestrator.resolve_all_in_workspace(&cancel).await;

        // The in-flight conflict finishes; nothing after it starts.
        assert_eq!(results.len(), 1);
        assert!(results[0].applied);
        assert_eq!(results[0].file_path, PathBuf::from("a.txt"));
        assert_eq!(harness.backend().call_count(), 1);
        assert_eq!(harness.disk.read("b.txt"), TWO_CONFLICTS);
    }

    #[tokio::test]
    async fn test_batch_covers_multiple_files() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.disk.write("b.txt", TWO_CONFLICTS);
        harness.disk.write("clean.txt", "nothing here");

        let started = Utc::now();
        let results = harness
            .orchestrator
            .resolve_all_in_workspace(&CancelFlag::new())
            .await;
        let summary = BatchSummary::from_results(&results, started);

        assert_eq!(summary.files, 2);
        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.applied, 4);
        assert_eq!(summary.failed, 0);
        assert!(summary.finished_at >= summary.started_at);
    }

    #[tokio::test]
    async fn test_suggest_alternatives_uses_ascending_temperatures() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);
        harness.backend().push_ok("one").push_err("flaky").push_ok("three");

        let document = harness.disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        let suggestions = harness
            .orchestrator
            .suggest_alternatives(&document, &conflict, 3)
            .await
            .unwrap();

        let resolutions: Vec<&str> = suggestions.iter().map(|s| s.resolution.as_str()).collect();
        assert_eq!(resolutions, vec!["one", "three"]);

        let temperatures: Vec<f32> = harness
            .backend()
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.params.temperature)
            .collect();
        assert_eq!(temperatures, vec![0.3, 0.7, 1.0]);
    }

    #[tokio::test]
    async fn test_suggest_alternatives_caps_count() {
        let harness = Harness::new(Settings::default()).await;
        harness.disk.write("a.txt", TWO_CONFLICTS);

        let document = harness.disk.open("a.txt");
        let conflict = markers::detect(&document.text(), document.path()).remove(0);
        let one = harness.orchestrator.suggest_alternatives(&document, &conflict, 1).await.unwrap();
        assert_eq!(one.len(), 1);
        let many = harness.orchestrator.suggest_alternatives(&document, &conflict, 10).await.unwrap();
        assert_eq!(many.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_over_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), format!("{}\n", TWO_CONFLICTS)).unwrap();
        std::fs::write(
            dir.path().join("notes.txt"),
            "intro\r\n<<<<<<< HEAD\r\nmine\r\n=======\r\ntheirs\r\n>>>>>>> topic\r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("clean.rs"), "fn main() {}\n").unwrap();

        let factory = Arc::new(ScriptedFactory::default());
        let mut selector = BackendSelector::with_factory(
            Settings::default(),
            Arc::new(MemorySecretStore::default()),
            Arc::new(ScriptedPrompt::answering(None)),
            factory.clone(),
        );
        selector.switch_to(BackendKind::Local).await.unwrap();
        let orchestrator = ResolutionOrchestrator::new(selector, Arc::new(GitWorkspace::new(dir.path())));

        let results = orchestrator.resolve_all_in_workspace(&CancelFlag::new()).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.applied));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "resolved\nkeep\nkeep\nkeep\nkeep\nresolved\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "intro\r\nresolved\r\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("clean.rs")).unwrap(),
            "fn main() {}\n"
        );
        let requests = factory.backends.lock().unwrap()[0].calls.lock().unwrap().clone();
        assert!(requests.iter().any(|c| c.request.language.as_deref() == Some("rust")));
    }
}
