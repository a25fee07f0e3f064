//! The upgrade checklist, tracking the status of every upgrade step.
//!
//! The checklist is the single source of truth for upgrade progress. Every read and write goes
//! through one exclusive lock, so a snapshot can never observe a partially applied transition.
//! Steps which have never been touched read as `Pending`.
//!
//! Legal transitions are `Pending -> Running`, `Running -> Complete` and `Running -> Failed`.
//! `Complete` and `Failed` are terminal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};

use crate::error::AppError;
use crate::utils;
use gpupgrade_core::{StepStatus, UpgradeStep};

/// The file name of the persisted checklist, relative to the state dir.
pub const CHECKLIST_FILE: &str = "checklist.json";

/// The upgrade checklist.
///
/// State changes are serialized under the state lock, but written to disk after it is released,
/// so readers never wait on the filesystem.
pub struct Checklist {
    inner: Mutex<ChecklistInner>,
    /// Serializes writes of the state file, holding the version last written.
    written: Mutex<u64>,
}

struct ChecklistInner {
    steps: BTreeMap<UpgradeStep, StepStatus>,
    /// The file to which every successful transition is persisted, if any.
    state_file: Option<PathBuf>,
    /// Incremented on every change staged for persistence.
    version: u64,
}

/// A serialized checklist state awaiting its write.
struct StagedWrite {
    path: PathBuf,
    version: u64,
    data: Vec<u8>,
}

impl Checklist {
    /// Create a new in-memory checklist.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChecklistInner { steps: BTreeMap::new(), state_file: None, version: 0 }),
            written: Mutex::new(0),
        }
    }

    /// Open a checklist persisted at the given path, loading any previously recorded state.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let steps = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice::<BTreeMap<UpgradeStep, StepStatus>>(&data)
                .with_context(|| format!("error parsing persisted checklist {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(AppError::filesystem(&path, err).into()),
        };
        Ok(Self {
            inner: Mutex::new(ChecklistInner { steps, state_file: Some(path), version: 0 }),
            written: Mutex::new(0),
        })
    }

    /// Set every tracked step to `Pending` if it has no status yet. Idempotent.
    pub fn initialize(&self) {
        let staged = {
            let mut inner = self.lock();
            for step in UpgradeStep::TRACKED {
                let status = inner.steps.entry(step).or_insert(StepStatus::Pending);
                if *status == StepStatus::Unknown {
                    *status = StepStatus::Pending;
                }
            }
            inner.stage()
        };
        self.persist(staged);
    }

    /// The current status of the given step.
    pub fn status(&self, step: UpgradeStep) -> StepStatus {
        self.lock().status(step)
    }

    /// Transition the given step from `Pending` to `Running`.
    ///
    /// Fails with `InvalidTransition` if the step is already running or has finished, leaving
    /// its status unchanged.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mark_running(&self, step: UpgradeStep) -> Result<(), AppError> {
        self.transition(step, StepStatus::Pending, StepStatus::Running)
    }

    /// Transition the given step from `Running` to `Complete`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mark_complete(&self, step: UpgradeStep) -> Result<(), AppError> {
        self.transition(step, StepStatus::Running, StepStatus::Complete)
    }

    /// Transition the given step from `Running` to `Failed`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mark_failed(&self, step: UpgradeStep) -> Result<(), AppError> {
        self.transition(step, StepStatus::Running, StepStatus::Failed)
    }

    /// A point-in-time copy of every tracked step's status, in step order.
    pub fn snapshot(&self) -> Vec<(UpgradeStep, StepStatus)> {
        let inner = self.lock();
        UpgradeStep::TRACKED.iter().map(|step| (*step, inner.status(*step))).collect()
    }

    /// Resolve steps left `Running` by a previous hub process.
    ///
    /// The background work behind such a step no longer exists, so the given closure decides
    /// the terminal status each interrupted step resolves to.
    pub fn resolve_interrupted<F>(&self, mut resolve: F) -> Vec<(UpgradeStep, StepStatus)>
    where
        F: FnMut(UpgradeStep) -> StepStatus,
    {
        let mut resolved = vec![];
        let staged = {
            let mut inner = self.lock();
            for (step, status) in inner.steps.iter_mut() {
                if *status != StepStatus::Running {
                    continue;
                }
                let outcome = match resolve(*step) {
                    StepStatus::Complete => StepStatus::Complete,
                    _ => StepStatus::Failed,
                };
                *status = outcome;
                resolved.push((*step, outcome));
            }
            if resolved.is_empty() {
                None
            } else {
                inner.stage()
            }
        };
        self.persist(staged);
        resolved
    }

    fn transition(&self, step: UpgradeStep, from: StepStatus, to: StepStatus) -> Result<(), AppError> {
        if !UpgradeStep::TRACKED.contains(&step) {
            return Err(AppError::UnknownStep(step));
        }
        let (current, staged) = {
            let mut inner = self.lock();
            let current = inner.status(step);
            if current != from {
                return Err(AppError::InvalidTransition { step, from: current, to });
            }
            inner.steps.insert(step, to);
            (current, inner.stage())
        };
        self.persist(staged);
        tracing::info!(?step, from = %current, %to, "upgrade step transitioned");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ChecklistInner> {
        // A panic while holding the lock can not leave a torn entry, as every write is a single insert.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the given staged state, unless a newer state has already been written.
    ///
    /// A failed write leaves the in-memory state authoritative and is logged; the next
    /// successful transition rewrites the whole file.
    fn persist(&self, staged: Option<StagedWrite>) {
        let staged = match staged {
            Some(staged) => staged,
            None => return,
        };
        let mut written = self.written.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *written >= staged.version {
            return;
        }
        match utils::write_file_atomic(&staged.path, &staged.data) {
            Ok(()) => *written = staged.version,
            Err(err) => tracing::error!(error = ?err, path = %staged.path.display(), "error persisting upgrade checklist"),
        }
    }
}

impl Default for Checklist {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecklistInner {
    fn status(&self, step: UpgradeStep) -> StepStatus {
        match self.steps.get(&step) {
            None | Some(StepStatus::Unknown) => StepStatus::Pending,
            Some(status) => *status,
        }
    }

    /// Serialize the current state for writing, if this checklist is backed by a file.
    fn stage(&mut self) -> Option<StagedWrite> {
        let path = self.state_file.clone()?;
        self.version += 1;
        match serde_json::to_vec_pretty(&self.steps) {
            Ok(data) => Some(StagedWrite { path, version: self.version, data }),
            Err(err) => {
                tracing::error!(error = ?err, "error serializing upgrade checklist");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "checklist_test.rs"]
mod checklist_test;
