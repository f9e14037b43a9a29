//! Per-job scratch workspaces.
//!
//! Each job gets its own directory `<root>/<job id>/` holding a fixed set of file names
//! derived from the id. The [`Workspace`] handle removes all of it when released or
//! dropped, so every exit path of a request tears its files down.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::job::JobId;

const MAX_ALLOCATION_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not allocate a unique workspace after {attempts} attempts")]
    Exhausted { attempts: usize },
}

/// File locations belonging to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    dir: PathBuf,
    source: PathBuf,
    document: PathBuf,
    log: PathBuf,
    aux: PathBuf,
    out: PathBuf,
    raster: PathBuf,
}

impl WorkspacePaths {
    fn new(root: &Path, id: JobId) -> Self {
        let stem = id.to_string();
        let dir = root.join(&stem);
        let file = |extension: &str| dir.join(format!("{stem}.{extension}"));
        Self {
            source: file("tex"),
            document: file("pdf"),
            log: file("log"),
            aux: file("aux"),
            out: file("out"),
            raster: file("png"),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn raster(&self) -> &Path {
        &self.raster
    }

    /// Every named file in the set, in removal order.
    pub fn files(&self) -> [&Path; 6] {
        [
            &self.source,
            &self.document,
            &self.log,
            &self.aux,
            &self.out,
            &self.raster,
        ]
    }
}

/// Outcome of a cleanup pass; failures are logged, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Allocates workspaces under a single scratch root.
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create the manager, creating the scratch root if it does not exist.
    ///
    /// The root is stored absolute: external programs run with the job directory as their
    /// working directory and receive job paths as arguments.
    pub fn new(root: PathBuf) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&root)?;
        let root = std::fs::canonicalize(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh workspace with a random id.
    pub async fn allocate(&self) -> Result<Workspace, WorkspaceError> {
        self.allocate_with(JobId::random).await
    }

    async fn allocate_with(
        &self,
        mut next_id: impl FnMut() -> JobId,
    ) -> Result<Workspace, WorkspaceError> {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let id = next_id();
            let paths = WorkspacePaths::new(&self.root, id);
            // create_dir fails on an existing directory, which is what detects a collision.
            match fs::create_dir(paths.dir()).await {
                Ok(()) => {
                    debug!(
                        target = "infra::workspace",
                        op = "workspace::allocate",
                        job_id = %id,
                        attempt,
                        dir = %paths.dir().display(),
                        "Workspace allocated"
                    );
                    return Ok(Workspace {
                        id,
                        paths,
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    warn!(
                        target = "infra::workspace",
                        op = "workspace::allocate",
                        job_id = %id,
                        attempt,
                        "Workspace id collision; retrying with a new id"
                    );
                }
                Err(err) => return Err(WorkspaceError::Io(err)),
            }
        }

        Err(WorkspaceError::Exhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// Remove every file of `paths` that exists, then the job directory itself.
    ///
    /// Safe to call repeatedly and on partially populated workspaces.
    pub fn cleanup(paths: &WorkspacePaths) -> CleanupReport {
        let mut report = CleanupReport::default();

        for path in paths.files() {
            match std::fs::remove_file(path) {
                Ok(()) => report.removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "infra::workspace",
                        op = "workspace::cleanup",
                        path = %path.display(),
                        error = %err,
                        "Failed to remove workspace file"
                    );
                }
            }
        }

        // Sweeps byproducts outside the named set (e.g. .toc, .nav).
        match std::fs::remove_dir_all(paths.dir()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                report.failed += 1;
                warn!(
                    target = "infra::workspace",
                    op = "workspace::cleanup",
                    path = %paths.dir().display(),
                    error = %err,
                    "Failed to remove workspace directory"
                );
            }
        }

        report
    }
}

/// Scoped handle to one job's workspace. Dropping it removes the files.
#[derive(Debug)]
pub struct Workspace {
    id: JobId,
    paths: WorkspacePaths,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub async fn write_source(&self, source: &str) -> Result<(), WorkspaceError> {
        fs::write(self.paths.source(), source).await?;
        Ok(())
    }

    /// Remove the workspace now and report what happened.
    ///
    /// Removal runs on the blocking pool. If that task fails the handle stays armed and
    /// `Drop` retries.
    pub async fn release(mut self) -> CleanupReport {
        let paths = self.paths.clone();
        match tokio::task::spawn_blocking(move || WorkspaceManager::cleanup(&paths)).await {
            Ok(report) => {
                self.released = true;
                report
            }
            Err(err) => {
                warn!(
                    target = "infra::workspace",
                    op = "workspace::release",
                    job_id = %self.id,
                    error = %err,
                    "Workspace cleanup task failed; retrying on drop"
                );
                CleanupReport {
                    removed: 0,
                    failed: 1,
                }
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            WorkspaceManager::cleanup(&self.paths);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn manager() -> (TempDir, WorkspaceManager) {
        let dir = TempDir::new().expect("temp dir");
        let manager = WorkspaceManager::new(dir.path().join("scratch")).expect("manager");
        (dir, manager)
    }

    fn entries(root: &Path) -> usize {
        std::fs::read_dir(root).expect("read root").count()
    }

    #[tokio::test]
    async fn paths_are_derived_from_the_id() {
        let (_dir, manager) = manager();
        let workspace = manager.allocate().await.expect("allocate");
        let id = workspace.id().to_string();
        let paths = workspace.paths();

        assert_eq!(paths.dir(), manager.root().join(&id));
        assert_eq!(paths.source(), paths.dir().join(format!("{id}.tex")));
        assert_eq!(paths.document(), paths.dir().join(format!("{id}.pdf")));
        assert_eq!(paths.raster(), paths.dir().join(format!("{id}.png")));
        assert!(paths.files().iter().all(|path| path.starts_with(manager.root())));
    }

    #[tokio::test]
    async fn release_removes_everything() {
        let (_dir, manager) = manager();
        let workspace = manager.allocate().await.expect("allocate");
        workspace.write_source("\\relax").await.expect("write");
        std::fs::write(workspace.paths().document(), b"%PDF").expect("pdf");
        std::fs::write(workspace.paths().dir().join("extra.toc"), b"").expect("toc");

        let report = workspace.release().await;

        assert_eq!(report, CleanupReport { removed: 2, failed: 0 });
        assert_eq!(entries(manager.root()), 0);
    }

    #[tokio::test]
    async fn relative_root_is_made_absolute() {
        let base = TempDir::new_in(".").expect("temp dir in working directory");
        let cwd = std::env::current_dir().expect("cwd");
        let relative = base
            .path()
            .strip_prefix(&cwd)
            .unwrap_or(base.path())
            .join("scratch");
        assert!(relative.is_relative());

        let manager = WorkspaceManager::new(relative.clone()).expect("manager");
        let workspace = manager.allocate().await.expect("allocate");

        assert!(manager.root().is_absolute());
        assert!(workspace.paths().source().is_absolute());
        assert!(workspace.paths().dir().is_dir());
        assert_eq!(
            manager.root(),
            std::fs::canonicalize(&relative).expect("canonical")
        );
    }

    #[tokio::test]
    async fn drop_removes_everything() {
        let (_dir, manager) = manager();
        {
            let workspace = manager.allocate().await.expect("allocate");
            workspace.write_source("\\relax").await.expect("write");
        }
        assert_eq!(entries(manager.root()), 0);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (_dir, manager) = manager();
        let workspace = manager.allocate().await.expect("allocate");
        workspace.write_source("\\relax").await.expect("write");
        let paths = workspace.paths().clone();

        let first = WorkspaceManager::cleanup(&paths);
        let second = WorkspaceManager::cleanup(&paths);
        drop(workspace);

        assert_eq!(first.removed, 1);
        assert_eq!(second, CleanupReport::default());
        assert_eq!(entries(manager.root()), 0);
    }

    #[tokio::test]
    async fn collisions_retry_with_a_new_id() {
        let (_dir, manager) = manager();
        let taken = JobId::from_uuid(Uuid::from_u128(1));
        let fresh = JobId::from_uuid(Uuid::from_u128(2));
        std::fs::create_dir(manager.root().join(taken.to_string())).expect("occupy");

        let mut ids = vec![fresh, taken];
        let workspace = manager
            .allocate_with(|| ids.pop().expect("id available"))
            .await
            .expect("allocate");

        assert_eq!(workspace.id(), fresh);
        assert!(manager.root().join(taken.to_string()).is_dir());
    }

    #[tokio::test]
    async fn persistent_collisions_give_up() {
        let (_dir, manager) = manager();
        let taken = JobId::from_uuid(Uuid::from_u128(7));
        std::fs::create_dir(manager.root().join(taken.to_string())).expect("occupy");

        let err = manager
            .allocate_with(|| taken)
            .await
            .expect_err("every attempt collides");
        assert!(matches!(
            err,
            WorkspaceError::Exhausted {
                attempts: MAX_ALLOCATION_ATTEMPTS
            }
        ));
    }

    #[tokio::test]
    async fn concurrent_allocations_are_disjoint() {
        let (_dir, manager) = manager();
        let manager = std::sync::Arc::new(manager);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.allocate().await.expect("allocate") })
            })
            .collect();

        let mut workspaces = Vec::new();
        for handle in handles {
            workspaces.push(handle.await.expect("join"));
        }
        let dirs: std::collections::HashSet<_> = workspaces
            .iter()
            .map(|workspace| workspace.paths().dir().to_path_buf())
            .collect();
        assert_eq!(dirs.len(), 32);
        assert_eq!(entries(manager.root()), 32);

        drop(workspaces);
        assert_eq!(entries(manager.root()), 0);
    }
}
