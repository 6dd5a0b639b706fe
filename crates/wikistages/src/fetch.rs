use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::fail;
use wikicore::{
    DirEntry, ErrorMarker, RawContent, RepoKind, RepoReference, RunState, SourceFile, Stage,
    StageContext, StageError, StageId,
};

/// Configuration for repository acquisition.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Parent directory for per-run clone scratch space.
    pub scratch_root: PathBuf,
    pub clone_timeout: Duration,
    pub excluded_dirs: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub max_tree_depth: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("wikigen-repos"),
            clone_timeout: Duration::from_secs(300),
            excluded_dirs: [
                "node_modules",
                ".git",
                "__pycache__",
                "venv",
                "dist",
                "build",
                "target",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_extensions: [".lock", ".log", ".tmp", ".cache", ".gitignore"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_tree_depth: 5,
        }
    }
}

/// Acquires raw repository content for a reference.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, reference: &RepoReference) -> Result<RawContent, StageError>;
}

/// Default backend: shallow `git clone` for remote references, in-place
/// scan for local directories.
pub struct GitFetcher {
    config: FetchConfig,
}

impl GitFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    async fn fetch_git(&self, reference: &RepoReference) -> Result<RawContent, StageError> {
        let scratch = ScratchDir::create(&self.config.scratch_root, reference.name())?;
        tracing::info!(
            "Cloning {} into {}",
            reference.location,
            scratch.path().display()
        );

        let child = Command::new("git")
            .arg("clone")
            .arg("--depth=1")
            .arg(&reference.location)
            .arg(scratch.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StageError::CommandFailed(format!("failed to spawn git: {}", e)))?;

        // Dropping the timed-out future kills the clone via kill_on_drop.
        let output =
            match tokio::time::timeout(self.config.clone_timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StageError::Timeout {
                        seconds: self.config.clone_timeout.as_secs(),
                    })
                }
            };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::CommandFailed(format!(
                "git clone failed for {}: {}",
                reference.location,
                stderr.trim()
            )));
        }

        let branch = current_branch(scratch.path()).await;
        self.scan_repository(reference, branch, scratch.path())
        // Scratch directory is removed on drop, on success and error alike.
    }

    async fn fetch_local(&self, reference: &RepoReference) -> Result<RawContent, StageError> {
        let root = PathBuf::from(&reference.location);
        if !root.is_dir() {
            return Err(StageError::InvalidReference(format!(
                "not a directory: {}",
                reference.location
            )));
        }
        let branch = current_branch(&root).await;
        self.scan_repository(reference, branch, &root)
    }

    fn scan_repository(
        &self,
        reference: &RepoReference,
        branch: Option<String>,
        root: &Path,
    ) -> Result<RawContent, StageError> {
        let mut files = Vec::new();
        self.collect_files(root, root, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for file in &files {
            if let Some(language) = &file.language {
                *counts.entry(language.clone()).or_insert(0) += 1;
            }
        }
        let mut languages: Vec<(String, usize)> = counts.into_iter().collect();
        languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let total_files = files.len();
        let total_lines = files.iter().map(|f| f.content.lines().count()).sum();
        let structure = build_tree(
            root,
            reference.name().to_string(),
            0,
            self.config.max_tree_depth,
        );

        Ok(RawContent {
            url: reference.location.clone(),
            name: reference.name().to_string(),
            branch,
            files,
            languages,
            structure,
            total_files,
            total_lines,
        })
    }

    fn collect_files(
        &self,
        base: &Path,
        dir: &Path,
        files: &mut Vec<SourceFile>,
    ) -> Result<(), StageError> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let entry_name = entry.file_name().to_string_lossy().to_string();

            if file_type.is_dir() {
                if self.config.excluded_dirs.iter().any(|d| d == &entry_name) {
                    continue;
                }
                self.collect_files(base, &path, files)?;
            } else if file_type.is_file() {
                if self
                    .config
                    .excluded_extensions
                    .iter()
                    .any(|ext| entry_name.ends_with(ext.as_str()))
                {
                    continue;
                }
                let rel = path
                    .strip_prefix(base)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let bytes = std::fs::read(&path)?;
                let content = String::from_utf8_lossy(&bytes).into_owned();
                let language = language_for_path(&rel).map(|s| s.to_string());
                files.push(SourceFile {
                    path: rel,
                    content,
                    language,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FetchBackend for GitFetcher {
    async fn fetch(&self, reference: &RepoReference) -> Result<RawContent, StageError> {
        match reference.kind {
            RepoKind::Git => self.fetch_git(reference).await,
            RepoKind::Local => self.fetch_local(reference).await,
        }
    }
}

/// Acquires raw repository content as the first pipeline stage.
pub struct FetchStage {
    backend: Arc<dyn FetchBackend>,
}

impl FetchStage {
    pub fn new(backend: Arc<dyn FetchBackend>) -> Self {
        Self { backend }
    }

    pub fn with_defaults(config: FetchConfig) -> Self {
        Self::new(Arc::new(GitFetcher::new(config)))
    }
}

#[async_trait]
impl Stage for FetchStage {
    fn id(&self) -> StageId {
        StageId::FetchRepository
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        if ctx.is_cancelled() {
            return state.with_error(ErrorMarker::for_stage(self.id(), "run cancelled"));
        }

        let reference = state.reference().clone();
        ctx.events
            .info(format!("Fetching repository: {}", reference.location));

        match self.backend.fetch(&reference).await {
            Ok(raw) => {
                ctx.events.info(format!(
                    "Fetched {} files ({} lines)",
                    raw.total_files, raw.total_lines
                ));
                state.with_raw_content(raw)
            }
            Err(err) => fail(state, StageId::FetchRepository, err),
        }
    }
}

/// Scratch clone directory, removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path, name: &str) -> Result<Self, StageError> {
        let path = root.join(format!("{}-{}", name, uuid::Uuid::new_v4().simple()));
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

async fn current_branch(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() {
        None
    } else {
        Some(branch)
    }
}

/// Language detection by file extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    let language = match ext.as_str() {
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "java" => "Java",
        "go" => "Go",
        "rs" => "Rust",
        "cpp" => "C++",
        "c" => "C",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" => "Kotlin",
        "scala" => "Scala",
        "r" => "R",
        "m" => "MATLAB",
        "jl" => "Julia",
        "vue" => "Vue",
        "jsx" => "React",
        "tsx" => "TypeScript React",
        _ => return None,
    };
    Some(language)
}

/// Directory tree to a bounded depth, directories first, hidden entries
/// skipped except `.github`.
fn build_tree(path: &Path, name: String, depth: usize, max_depth: usize) -> DirEntry {
    let mut node = DirEntry::directory(name);
    if depth >= max_depth {
        return node;
    }
    let read = match std::fs::read_dir(path) {
        Ok(read) => read,
        Err(_) => return node,
    };

    let mut items: Vec<_> = read.flatten().collect();
    items.sort_by_key(|e| {
        let is_file = e.file_type().map(|t| !t.is_dir()).unwrap_or(true);
        (is_file, e.file_name())
    });

    for item in items {
        let item_name = item.file_name().to_string_lossy().to_string();
        if item_name.starts_with('.') && item_name != ".github" {
            continue;
        }
        let file_type = match item.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            if matches!(
                item_name.as_str(),
                "node_modules" | "__pycache__" | "venv" | "target"
            ) {
                continue;
            }
            node.children
                .push(build_tree(&item.path(), item_name, depth + 1, max_depth));
        } else {
            let size = item.metadata().map(|m| m.len()).unwrap_or(0);
            node.children.push(DirEntry::file(item_name, size));
        }
    }
    node
}
