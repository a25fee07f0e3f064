use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream, TcpListenerStream};
use tokio_stream::StreamMap;
use tonic::transport::Server;

use crate::checklist::{Checklist, CHECKLIST_FILE};
use crate::cluster_pair::{ClusterPair, LABEL_NEW, LABEL_OLD};
use crate::config::Config;
use crate::error::{AppError, ShutdownResult};
use crate::markers::{MarkerStore, ShutdownOutcome};
use crate::server::{HubDeps, HubServer};
use crate::tasks::StepRunner;
use gpupgrade_core::grpc::cli::CliToHubServer;
use gpupgrade_core::{StepStatus, UpgradeStep};

/// The application object for when the hub is running as a server.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The collaborators handed to the gRPC server.
    deps: HubDeps,
    /// The runner of upgrade step work, owning the checklist.
    runner: Arc<StepRunner>,
}

/// A handle to a running hub server.
pub struct HubHandle {
    /// The address the server is bound to.
    local_addr: SocketAddr,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// The join handle of the CLI gRPC server.
    server: JoinHandle<()>,
}

impl App {
    /// Create a new instance, loading and reconciling any checklist left by a previous hub.
    pub async fn new(config: Arc<Config>, deps: HubDeps) -> Result<Self> {
        let state_dir = config.state_dir();
        tokio::fs::create_dir_all(&state_dir)
            .await
            .map_err(|err| AppError::filesystem(&state_dir, err))?;

        let checklist = Checklist::open(state_dir.join(CHECKLIST_FILE)).await.context("error opening upgrade checklist")?;
        checklist.initialize();
        reconcile_interrupted(&checklist, deps.markers.as_ref()).await;

        let runner = Arc::new(StepRunner::new(Arc::new(checklist)));
        Ok(Self { config, deps, runner })
    }

    /// The checklist tracking this hub's upgrade progress.
    pub fn checklist(&self) -> &Arc<Checklist> {
        self.runner.checklist()
    }

    /// Bind the hub's port and begin serving CLI traffic.
    ///
    /// Fails if the port can not be bound, e.g. because another hub is already listening on it.
    pub async fn start(&self) -> ShutdownResult<HubHandle> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.cli_to_hub_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("error binding hub listener to {}", addr))?;
        let local_addr = listener.local_addr().context("error reading hub listener address")?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let service = CliToHubServer::new(HubServer::new(self.config.clone(), self.deps.clone(), self.runner.clone()));
        let fut = Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _res = shutdown_rx.recv().await;
            });
        let shutdown = shutdown_tx.clone();
        let server = tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::error!(error = ?err, "error from hub gRPC server");
            }
            let _res = shutdown.send(());
        });

        tracing::info!(%local_addr, "hub is listening");
        Ok(HubHandle { local_addr, shutdown_tx, server })
    }

    /// Serve until a termination signal arrives or the server exits, then shut down gracefully.
    pub async fn run(self) -> Result<()> {
        let handle = self.start().await?;
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));
        let mut shutdown_rx = BroadcastStream::new(handle.shutdown_tx.subscribe());

        tokio::select! {
            Some((_, sig)) = signals.next() => {
                tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
            }
            _ = shutdown_rx.next() => {}
        }

        tracing::debug!("hub is shutting down");
        handle.stop().await;
        self.wait_idle().await;
        Ok(())
    }

    /// Wait for every background upgrade step to finish.
    pub async fn wait_idle(&self) {
        self.runner.wait_idle().await
    }
}

impl HubHandle {
    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving, returning once the listener has been released.
    pub async fn stop(self) {
        let _res = self.shutdown_tx.send(());
        if let Err(err) = self.server.await {
            tracing::error!(error = ?err, "error joining hub gRPC server task");
        }
    }
}

/// Resolve steps left running by a previous hub process.
///
/// A shutdown is reconciled from the markers its attempt left behind; any other interrupted step
/// can not be resumed and is failed.
async fn reconcile_interrupted(checklist: &Checklist, markers: &dyn MarkerStore) {
    if checklist.status(UpgradeStep::StoppedCluster) != StepStatus::Running {
        return resolve_all_failed(checklist);
    }
    let mut stopped = true;
    for label in [LABEL_OLD, LABEL_NEW] {
        match ClusterPair::recorded_outcome(markers, label).await {
            Ok(Some(ShutdownOutcome::Completed)) => (),
            Ok(outcome) => {
                tracing::warn!(label, ?outcome, "interrupted cluster shutdown did not complete");
                stopped = false;
            }
            Err(err) => {
                tracing::error!(label, error = %err, "error reading shutdown markers");
                stopped = false;
            }
        }
    }
    let resolved = checklist.resolve_interrupted(|step| match step {
        UpgradeStep::StoppedCluster if stopped => StepStatus::Complete,
        _ => StepStatus::Failed,
    });
    log_resolved(&resolved);
}

fn resolve_all_failed(checklist: &Checklist) {
    let resolved = checklist.resolve_interrupted(|_step| StepStatus::Failed);
    log_resolved(&resolved);
}

fn log_resolved(resolved: &[(UpgradeStep, StepStatus)]) {
    for (step, status) in resolved {
        tracing::warn!(?step, %status, "resolved upgrade step interrupted by hub restart");
    }
}

#[cfg(test)]
#[path = "app_test.rs"]
mod app_test;
