//! Durable shutdown-attempt markers.
//!
//! Each marker is an empty file at `<base>/gpstop.<label>/<outcome>`. Its presence, not its
//! content, is the signal: an operator or a restarted hub reads these to learn what happened to
//! each cluster's shutdown independent of process memory.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::AppError;

/// The outcome recorded by a shutdown marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShutdownOutcome {
    /// The shutdown attempt is in flight.
    Running,
    /// The stop command succeeded.
    Completed,
    /// The stop command failed.
    Failed,
}

impl ShutdownOutcome {
    pub const ALL: [ShutdownOutcome; 3] = [ShutdownOutcome::Running, ShutdownOutcome::Completed, ShutdownOutcome::Failed];

    /// The marker name of this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownOutcome::Running => "running",
            ShutdownOutcome::Completed => "completed",
            ShutdownOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable key-value store of `label x outcome -> exists`.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Create the marker for the given label and outcome.
    async fn create(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError>;
    /// Remove the marker for the given label and outcome; removing an absent marker succeeds.
    async fn remove(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError>;
    /// Check whether the marker for the given label and outcome exists.
    async fn exists(&self, label: &str, outcome: ShutdownOutcome) -> Result<bool, AppError>;

    /// List all existing markers for the given label.
    async fn list(&self, label: &str) -> Result<Vec<ShutdownOutcome>, AppError> {
        let mut found = vec![];
        for outcome in ShutdownOutcome::ALL {
            if self.exists(label, outcome).await? {
                found.push(outcome);
            }
        }
        Ok(found)
    }
}

/// A marker store backed by empty files on the local filesystem.
pub struct FsMarkerStore {
    base: PathBuf,
}

impl FsMarkerStore {
    /// Create a new instance rooted at the given base directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The directory holding the markers of the given label.
    pub fn label_dir(&self, label: &str) -> PathBuf {
        self.base.join(format!("gpstop.{}", label))
    }

    /// The path of the marker for the given label and outcome.
    pub fn marker_path(&self, label: &str, outcome: ShutdownOutcome) -> PathBuf {
        self.label_dir(label).join(outcome.as_str())
    }
}

#[async_trait]
impl MarkerStore for FsMarkerStore {
    async fn create(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError> {
        let dir = self.label_dir(label);
        tokio::fs::create_dir_all(&dir).await.map_err(|err| AppError::filesystem(&dir, err))?;
        let path = self.marker_path(label, outcome);
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|err| AppError::filesystem(&path, err))?;
        Ok(())
    }

    async fn remove(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError> {
        let path = self.marker_path(label, outcome);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::filesystem(&path, err)),
        }
    }

    async fn exists(&self, label: &str, outcome: ShutdownOutcome) -> Result<bool, AppError> {
        let path = self.marker_path(label, outcome);
        path_exists(&path).await
    }
}

async fn path_exists(path: &Path) -> Result<bool, AppError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::filesystem(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn fs_markers_are_created_listed_and_removed() -> Result<()> {
        let (config, _tmpdir) = Config::new_test()?;
        let store = FsMarkerStore::new(config.state_dir());

        store.create("old", ShutdownOutcome::Running).await?;
        assert!(store.marker_path("old", ShutdownOutcome::Running).exists(), "expected running marker on disk");
        assert_eq!(store.list("old").await?, vec![ShutdownOutcome::Running]);
        assert!(store.list("new").await?.is_empty(), "expected no markers for the new cluster");

        store.remove("old", ShutdownOutcome::Running).await?;
        store.create("old", ShutdownOutcome::Completed).await?;
        assert_eq!(store.list("old").await?, vec![ShutdownOutcome::Completed]);

        // Removing an absent marker is not an error.
        store.remove("old", ShutdownOutcome::Failed).await?;
        Ok(())
    }

    #[test]
    fn marker_paths_follow_label_and_outcome() {
        let store = FsMarkerStore::new("path/to/gpstop");
        let path = store.marker_path("old", ShutdownOutcome::Completed);
        assert_eq!(path, PathBuf::from("path/to/gpstop/gpstop.old/completed"), "unexpected marker path {:?}", path);
    }
}
