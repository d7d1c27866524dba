//! Background file worker.
//!
//! Scripts must never block the audio thread, so `Load`, `Save`, `Diff`,
//! `Echo` and `Prompt` are shipped here as [`Job`]s.  Each job runs as its
//! own tokio task and reports a single [`Completion`] through an unbounded
//! channel that the audio side drains with [`FileWorker::poll`] (never
//! blocks) or the CLI awaits with [`FileWorker::next`].
//!
//! The worker keeps one in-memory project document: `Load` replaces it with
//! a file's contents and `Save` writes it out.

use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::engine::{Job, ThreadEventId};

/// Answers a prompt: 1 for yes/ok, 0 for no/cancel.
pub type Prompter = Arc<dyn Fn(&str) -> i64 + Send + Sync>;

/// Result of one job.  `code` becomes the script's `returnCode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: ThreadEventId,
    pub code: i64,
    pub data: Option<String>,
}

pub const CODE_OK: i64 = 0;
pub const CODE_DIFFERENT: i64 = 1;
pub const CODE_ERROR: i64 = -1;

pub struct FileWorker {
    handle: Handle,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    prompter: Prompter,
    project: Arc<Mutex<String>>,
    pending: usize,
}

impl std::fmt::Debug for FileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWorker").field("pending", &self.pending).finish_non_exhaustive()
    }
}

impl FileWorker {
    /// Jobs are spawned on `handle`.  Prompts are answered "yes" until a
    /// prompter is installed.
    pub fn new(handle: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        FileWorker {
            handle,
            tx,
            rx,
            prompter: Arc::new(|_: &str| 1),
            project: Arc::new(Mutex::new(String::new())),
            pending: 0,
        }
    }

    pub fn with_prompter(mut self, prompter: Prompter) -> Self {
        self.prompter = prompter;
        self
    }

    /// Current project document.
    pub fn project(&self) -> String {
        self.project.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn set_project(&self, text: &str) {
        if let Ok(mut p) = self.project.lock() {
            *p = text.to_owned();
        }
    }

    /// Jobs submitted and not yet collected.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn submit(&mut self, id: ThreadEventId, job: Job) {
        debug!("worker: {} job {}", job.name(), id.0);
        self.pending += 1;
        let tx = self.tx.clone();
        let prompter = Arc::clone(&self.prompter);
        let project = Arc::clone(&self.project);
        self.handle.spawn(async move {
            let (code, data) = perform(job, prompter, project).await;
            // The receiver only goes away with the worker itself.
            let _ = tx.send(Completion { id, code, data });
        });
    }

    /// Completions that have arrived so far.
    pub fn poll(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        while let Ok(c) = self.rx.try_recv() {
            done.push(c);
        }
        self.pending -= done.len().min(self.pending);
        done
    }

    /// Wait for the next completion.  `None` when nothing is pending.
    pub async fn next(&mut self) -> Option<Completion> {
        if self.pending == 0 {
            return None;
        }
        let c = self.rx.recv().await?;
        self.pending -= 1;
        Some(c)
    }
}

async fn perform(job: Job, prompter: Prompter, project: Arc<Mutex<String>>) -> (i64, Option<String>) {
    match job {
        Job::Load { path } => match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                if let Ok(mut p) = project.lock() {
                    *p = text.clone();
                }
                (CODE_OK, Some(text))
            }
            Err(e) => {
                warn!("load {path}: {e}");
                (CODE_ERROR, None)
            }
        },
        Job::Save { path } => {
            let text = project.lock().map(|p| p.clone()).unwrap_or_default();
            match tokio::fs::write(&path, text).await {
                Ok(()) => (CODE_OK, None),
                Err(e) => {
                    warn!("save {path}: {e}");
                    (CODE_ERROR, None)
                }
            }
        }
        Job::Diff { left, right } => (diff(Path::new(&left), Path::new(&right)).await, None),
        Job::Echo { text } => {
            let mut out = tokio::io::stdout();
            let line = format!("{text}\n");
            match out.write_all(line.as_bytes()).await {
                Ok(()) => (CODE_OK, None),
                Err(_) => (CODE_ERROR, None),
            }
        }
        Job::Prompt { text } => {
            let answer = tokio::task::spawn_blocking(move || prompter(&text)).await;
            (answer.unwrap_or(0), None)
        }
    }
}

/// 0 when both files hold the same bytes, 1 when they differ, -1 when
/// either cannot be read.
async fn diff(left: &Path, right: &Path) -> i64 {
    let (a, b) = tokio::join!(tokio::fs::read(left), tokio::fs::read(right));
    match (a, b) {
        (Ok(a), Ok(b)) if a == b => CODE_OK,
        (Ok(_), Ok(_)) => CODE_DIFFERENT,
        (Err(e), _) | (_, Err(e)) => {
            warn!("diff {} {}: {e}", left.display(), right.display());
            CODE_ERROR
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(worker: &mut FileWorker) -> Vec<Completion> {
        let mut all = Vec::new();
        while let Some(c) = worker.next().await {
            all.push(c);
        }
        all.sort_by_key(|c| c.id.0);
        all
    }

    #[tokio::test]
    async fn diff_codes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        std::fs::write(&a, "same").unwrap();
        std::fs::write(&b, "same").unwrap();
        std::fs::write(&c, "other").unwrap();
        let s = |p: &std::path::PathBuf| p.display().to_string();

        let mut worker = FileWorker::new(Handle::current());
        worker.submit(ThreadEventId(1), Job::Diff { left: s(&a), right: s(&b) });
        worker.submit(ThreadEventId(2), Job::Diff { left: s(&a), right: s(&c) });
        worker.submit(ThreadEventId(3), Job::Diff { left: s(&a), right: s(&dir.path().join("missing")) });
        let codes: Vec<i64> = collect(&mut worker).await.iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![CODE_OK, CODE_DIFFERENT, CODE_ERROR]);
        assert_eq!(worker.pending(), 0);
    }

    #[tokio::test]
    async fn load_then_save_copies_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.proj");
        let dst = dir.path().join("out.proj");
        std::fs::write(&src, "tracks 4\n").unwrap();

        let mut worker = FileWorker::new(Handle::current());
        worker.submit(ThreadEventId(1), Job::Load { path: src.display().to_string() });
        let loaded = collect(&mut worker).await;
        assert_eq!(loaded[0].data.as_deref(), Some("tracks 4\n"));
        assert_eq!(worker.project(), "tracks 4\n");

        worker.submit(ThreadEventId(2), Job::Save { path: dst.display().to_string() });
        assert_eq!(collect(&mut worker).await[0].code, CODE_OK);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "tracks 4\n");
    }

    #[tokio::test]
    async fn prompt_uses_prompter() {
        let mut worker = FileWorker::new(Handle::current()).with_prompter(Arc::new(|text| {
            if text.contains("delete") { 0 } else { 1 }
        }));
        worker.submit(ThreadEventId(7), Job::Prompt { text: "delete all?".into() });
        worker.submit(ThreadEventId(8), Job::Prompt { text: "continue?".into() });
        let codes: Vec<i64> = collect(&mut worker).await.iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![0, 1]);
    }

    #[tokio::test]
    async fn echo_completes_ok() {
        let mut worker = FileWorker::new(Handle::current());
        worker.submit(ThreadEventId(3), Job::Echo { text: "from the worker".into() });
        let done = collect(&mut worker).await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, ThreadEventId(3));
        assert_eq!(done[0].code, CODE_OK);
    }

    #[tokio::test]
    async fn poll_never_blocks() {
        let mut worker = FileWorker::new(Handle::current());
        assert!(worker.poll().is_empty());
        worker.submit(ThreadEventId(1), Job::Load { path: "/definitely/not/here".into() });
        let done = loop {
            let done = worker.poll();
            if !done.is_empty() {
                break done;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(done[0].code, CODE_ERROR);
    }
}
