use crate::language::Language;
use crate::markers;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("line span {start}..={end} is outside the document ({line_count} lines)")]
    OutOfRange {
        start: usize,
        end: usize,
        line_count: usize,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A text document the resolver can read, edit by whole lines and persist.
#[async_trait::async_trait]
pub trait Document: Send + Sync {
    fn path(&self) -> &Path;

    /// Language tag (e.g. "rust"), if known.
    fn language_id(&self) -> Option<&str>;

    fn text(&self) -> String;

    fn line_count(&self) -> usize;

    fn line_text(&self, index: usize) -> Option<&str>;

    /// Replace lines `start..=end` with `text`. An empty `text` deletes them.
    fn replace_lines(&mut self, start: usize, end: usize, text: &str) -> anyhow::Result<()>;

    /// Whether there are edits not yet persisted.
    fn is_dirty(&self) -> bool;

    /// Drop unsaved edits, going back to the content last loaded or saved.
    fn revert(&mut self);

    async fn save(&mut self) -> anyhow::Result<()>;
}

/// Source of documents that currently contain conflict markers.
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    async fn find_conflicted_documents(&self) -> anyhow::Result<Vec<Box<dyn Document>>>;
}

/// A document backed by a file on disk.
pub struct FileDocument {
    path: PathBuf,
    lines: Vec<String>,
    saved: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
    language: Option<Language>,
    dirty: bool,
}

impl FileDocument {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path)
            .await
            .map_err(|source| DocumentError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(Self::from_text(path, &content))
    }

    pub fn from_text(path: PathBuf, content: &str) -> Self {
        let line_ending = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        Self {
            language: Language::from_path(&path),
            saved: lines.clone(),
            lines,
            trailing_newline: content.ends_with('\n'),
            line_ending,
            path,
            dirty: false,
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join(self.line_ending);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.line_ending);
        }
        out
    }
}

#[async_trait::async_trait]
impl Document for FileDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn language_id(&self) -> Option<&str> {
        self.language.map(|l| l.as_str())
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
            return Err(DocumentError::OutOfRange {
                start,
                end,
                line_count: self.lines.len(),
            }
            .into());
        }
        let replacement: Vec<String> = text.lines().map(str::to_string).collect();
        self.lines.splice(start..=end, replacement);
        self.dirty = true;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn revert(&mut self) {
        self.lines = self.saved.clone();
        self.dirty = false;
    }

    async fn save(&mut self) -> anyhow::Result<()> {
        // write to a sibling file, then rename over the original
        let file_name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self.path.with_file_name(format!(".{}.aimerge.tmp", file_name));
        fs::write(&tmp, self.render()).await?;
        fs::rename(&tmp, &self.path).await?;
        self.saved = self.lines.clone();
        self.dirty = false;
        Ok(())
    }
}

/// Conflicted-file discovery rooted at a working tree.
///
/// Asks git for unmerged paths first and falls back to walking the tree
/// when git is not available or the root is not a repository.
pub struct GitWorkspace {
    root: PathBuf,
}

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn unmerged_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["diff", "--name-only", "--diff-filter=U"])
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "git diff exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let toplevel = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["rev-parse", "--show-toplevel"])
            .output()
            .await?;
        let base = if toplevel.status.success() {
            PathBuf::from(String::from_utf8_lossy(&toplevel.stdout).trim())
        } else {
            self.root.clone()
        };

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| base.join(l.trim()))
            .collect())
    }

    async fn scan_tree(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_str()) {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }
}

#[async_trait::async_trait]
impl Workspace for GitWorkspace {
    async fn find_conflicted_documents(&self) -> anyhow::Result<Vec<Box<dyn Document>>> {
        // Files staged with markers still in them are no longer unmerged.
        let candidates = match self.unmerged_paths().await {
            Ok(paths) if !paths.is_empty() => paths,
            Ok(_) => self.scan_tree().await?,
            Err(e) => {
                tracing::debug!(error = %e, root = %self.root.display(), "git unavailable, scanning tree");
                self.scan_tree().await?
            }
        };

        let mut documents: Vec<FileDocument> = Vec::new();
        for path in candidates {
            // Binary and non-UTF-8 files are not candidates.
            let content = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            if content.contains('\0') || !markers::has_conflicts(&content) {
                continue;
            }
            documents.push(FileDocument::from_text(path, &content));
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!(count = documents.len(), "Found conflicted files");

        Ok(documents
            .into_iter()
            .map(|d| Box::new(d) as Box<dyn Document>)
            .collect())
    }
}
