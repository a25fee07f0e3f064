//! Lifecycle management of the old and new clusters taking part in an upgrade.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::oneshot;

use crate::error::AppError;
use crate::exec::{self, CommandExec};
use crate::markers::{MarkerStore, ShutdownOutcome};
use gpupgrade_core::cluster::{Cluster, SegmentConfigs, NEW_CLUSTER_CONFIG_FILE, OLD_CLUSTER_CONFIG_FILE};

/// Stops the cluster whose master data dir is `$2`, using the gpstop of bin dir `$1`.
const GPSTOP_SCRIPT: &str = r#""$1"/gpstop -a -d "$2""#;

/// The marker label of the cluster being upgraded from.
pub const LABEL_OLD: &str = "old";
/// The marker label of the cluster being upgraded to.
pub const LABEL_NEW: &str = "new";

/// The old and new clusters of an upgrade, managed together during cutover.
pub struct ClusterPair {
    old: Cluster,
    new: Cluster,
    exec: Arc<dyn CommandExec>,
}

/// The recorded outcome of shutting down both clusters.
#[derive(Debug)]
pub struct ShutdownReport {
    pub old: Result<(), AppError>,
    pub new: Result<(), AppError>,
}

impl ShutdownReport {
    /// Returns true if both clusters were shut down successfully.
    pub fn all_completed(&self) -> bool {
        self.old.is_ok() && self.new.is_ok()
    }
}

impl ClusterPair {
    /// Create a new instance.
    pub fn new(old: Cluster, new: Cluster, exec: Arc<dyn CommandExec>) -> Self {
        Self { old, new, exec }
    }

    /// Build a pair from the cluster configurations saved in the given state dir.
    pub async fn load(state_dir: &Path, old_bin_dir: &str, new_bin_dir: &str, exec: Arc<dyn CommandExec>) -> Result<Self> {
        let old = SegmentConfigs::load(state_dir.join(OLD_CLUSTER_CONFIG_FILE))
            .await
            .context("error loading old cluster configuration, has `check config` been run?")?;
        let new = SegmentConfigs::load(state_dir.join(NEW_CLUSTER_CONFIG_FILE))
            .await
            .context("error loading new cluster configuration, has `prepare init-cluster` been run?")?;
        Ok(Self::new(Cluster::new(old_bin_dir, old), Cluster::new(new_bin_dir, new), exec))
    }

    /// Shut down both clusters, recording the outcome of each attempt in the given marker store.
    ///
    /// Both shutdowns run concurrently and independently; a failure of one never prevents the
    /// attempt on the other. Returns once a terminal marker has been written for both.
    #[tracing::instrument(level = "info", skip(self, markers))]
    pub async fn stop_everything(&self, markers: Arc<dyn MarkerStore>) -> ShutdownReport {
        let (old, new) = tokio::join!(
            self.stop_cluster(LABEL_OLD, &self.old, markers.as_ref()),
            self.stop_cluster(LABEL_NEW, &self.new, markers.as_ref()),
        );
        ShutdownReport { old, new }
    }

    /// The outcome recorded for the given label by a previous shutdown attempt, if any.
    ///
    /// Each attempt leaves exactly one marker. Should a failed removal leave several, `failed`
    /// and then `running` take precedence, so `completed` is only reported when it stands alone.
    pub async fn recorded_outcome(markers: &dyn MarkerStore, label: &str) -> Result<Option<ShutdownOutcome>, AppError> {
        let found = markers.list(label).await?;
        let outcome = [ShutdownOutcome::Failed, ShutdownOutcome::Running, ShutdownOutcome::Completed]
            .into_iter()
            .find(|outcome| found.contains(outcome));
        Ok(outcome)
    }

    async fn stop_cluster(&self, label: &'static str, cluster: &Cluster, markers: &dyn MarkerStore) -> Result<(), AppError> {
        // Markers of an earlier attempt must not outlive this one.
        for outcome in ShutdownOutcome::ALL {
            if let Err(err) = markers.remove(label, outcome).await {
                tracing::error!(label, %outcome, error = %err, "error clearing shutdown marker of a previous attempt");
            }
        }

        let data_dir = match cluster.master_data_dir() {
            Ok(data_dir) => data_dir.to_string(),
            Err(err) => {
                let err = AppError::ShutdownFailure { label: label.into(), source: err };
                tracing::error!(label, error = %err, "cannot determine master data dir");
                record_marker(markers, label, ShutdownOutcome::Failed).await;
                return Err(err);
            }
        };

        // A failed write here only means no `running` marker is visible; the stop proceeds.
        record_marker(markers, label, ShutdownOutcome::Running).await;

        let rx = self.spawn_stop(cluster, &data_dir);
        let res = rx.await.unwrap_or_else(|_| Err(anyhow!("stop command task exited without reporting a result")));

        if let Err(err) = markers.remove(label, ShutdownOutcome::Running).await {
            tracing::error!(label, error = %err, "error removing running shutdown marker");
        }
        match res {
            Ok(()) => {
                tracing::info!(label, data_dir = %data_dir, "cluster shut down");
                record_marker(markers, label, ShutdownOutcome::Completed).await;
                Ok(())
            }
            Err(source) => {
                let err = AppError::ShutdownFailure { label: label.into(), source };
                tracing::error!(label, error = %err, "cluster shutdown failed");
                record_marker(markers, label, ShutdownOutcome::Failed).await;
                Err(err)
            }
        }
    }

    /// Spawn the cluster's stop command, returning a channel which yields its result.
    fn spawn_stop(&self, cluster: &Cluster, data_dir: &str) -> oneshot::Receiver<Result<()>> {
        let (program, args) = exec::sourced_shell(&cluster.bin_dir, GPSTOP_SCRIPT, &[data_dir]);
        let (tx, rx) = oneshot::channel();
        let exec = self.exec.clone();
        tokio::spawn(async move {
            let res = exec.run(&program, &args).await.map(|_output| ());
            let _res = tx.send(res);
        });
        rx
    }
}

/// Record the given marker, logging rather than propagating any filesystem error.
async fn record_marker(markers: &dyn MarkerStore, label: &str, outcome: ShutdownOutcome) {
    if let Err(err) = markers.create(label, outcome).await {
        tracing::error!(label, %outcome, error = %err, "error writing shutdown marker");
    }
}

#[cfg(test)]
#[path = "cluster_pair_test.rs"]
mod cluster_pair_test;
