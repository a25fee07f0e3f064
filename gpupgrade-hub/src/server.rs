//! The CLI-facing gRPC server of the hub.

use std::path::PathBuf;
use std::sync::Arc;

use tonic::{Request, Response};

use crate::agents::{AgentConnector, GrpcAgents};
use crate::config::Config;
use crate::database::{DbConnector, PgConnector};
use crate::error::{AppError, AppErrorExt, RpcResult};
use crate::exec::{CommandExec, ProcessExec};
use crate::markers::{FsMarkerStore, MarkerStore};
use crate::tasks::StepRunner;
use crate::upgrade::{self, ConvertMasterArgs};
use gpupgrade_core::grpc::cli;
use gpupgrade_core::UpgradeStep;

/// The message returned by a successful configuration check.
pub const CONFIG_CHECK_OK: &str = "All good";

/// The collaborators through which the hub reaches the outside world.
#[derive(Clone)]
pub struct HubDeps {
    pub db: Arc<dyn DbConnector>,
    pub agents: Arc<dyn AgentConnector>,
    pub exec: Arc<dyn CommandExec>,
    pub markers: Arc<dyn MarkerStore>,
}

impl HubDeps {
    /// The production collaborators for the given config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            db: Arc::new(PgConnector::from_env()),
            agents: Arc::new(GrpcAgents::new(config.hub_to_agent_port, config.agent_timeout())),
            exec: Arc::new(ProcessExec),
            markers: Arc::new(FsMarkerStore::new(config.state_dir())),
        }
    }
}

/// The hub's implementation of the CLI-to-hub service.
pub struct HubServer {
    config: Arc<Config>,
    deps: HubDeps,
    runner: Arc<StepRunner>,
}

impl HubServer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, deps: HubDeps, runner: Arc<StepRunner>) -> Self {
        Self { config, deps, runner }
    }

    /// The bin dir of the installation on segment hosts, which must be configured.
    fn gphome_bin(&self) -> Result<PathBuf, AppError> {
        self.config
            .gphome
            .as_ref()
            .map(|gphome| gphome.join("bin"))
            .ok_or_else(|| AppError::InvalidInput("GPHOME must be set in the hub's environment".into()))
    }
}

/// Validate a port received over the wire.
fn parse_port(port: i32) -> Result<u16, AppError> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| AppError::InvalidInput(format!("invalid database port {}", port)))
}

/// Validate that the named request field is not empty.
fn required(name: &str, value: String) -> Result<String, AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", name)));
    }
    Ok(value)
}

#[tonic::async_trait]
impl cli::CliToHub for HubServer {
    async fn ping(&self, _request: Request<cli::PingRequest>) -> RpcResult<Response<cli::PingReply>> {
        Ok(Response::new(cli::PingReply {}))
    }

    /// Report the status of every tracked upgrade step.
    async fn status_upgrade(&self, _request: Request<cli::StatusUpgradeRequest>) -> RpcResult<Response<cli::StatusUpgradeReply>> {
        let list_of_upgrade_step_statuses = self
            .runner
            .checklist()
            .snapshot()
            .into_iter()
            .map(|(step, status)| cli::UpgradeStepStatus::from_domain(step, status))
            .collect();
        Ok(Response::new(cli::StatusUpgradeReply { list_of_upgrade_step_statuses }))
    }

    /// Save the old cluster's configuration, queried from its master.
    async fn check_config(&self, request: Request<cli::CheckConfigRequest>) -> RpcResult<Response<cli::CheckConfigReply>> {
        let port = parse_port(request.into_inner().db_port).map_err(AppError::into_status)?;
        let work = upgrade::save_cluster_config(self.deps.db.clone(), port, self.config.state_dir());
        self.runner.run_inline(UpgradeStep::CheckConfig, work).await.map_err(AppError::grpc)?;
        Ok(Response::new(cli::CheckConfigReply { config_status: CONFIG_CHECK_OK.into() }))
    }

    /// Verify in the background that the upgrade binaries are installed on every segment host.
    async fn check_seginstall(&self, _request: Request<cli::CheckSeginstallRequest>) -> RpcResult<Response<cli::CheckSeginstallReply>> {
        let bin_dir = self.gphome_bin().map_err(AppError::into_status)?;
        let bin_dir = bin_dir.display().to_string();
        let work = upgrade::verify_seginstall(self.deps.agents.clone(), self.config.state_dir(), bin_dir, self.config.agent_timeout());
        self.runner.dispatch(UpgradeStep::SegInstall, work).await.map_err(AppError::into_status)?;
        Ok(Response::new(cli::CheckSeginstallReply {}))
    }

    /// Count append-optimized and heap tables per database.
    async fn check_object_count(&self, request: Request<cli::CheckObjectCountRequest>) -> RpcResult<Response<cli::CheckObjectCountReply>> {
        let port = parse_port(request.into_inner().db_port).map_err(AppError::into_status)?;
        let counts = upgrade::count_objects(self.deps.db.clone(), port).await.map_err(AppError::grpc)?;
        let list_of_counts = counts
            .into_iter()
            .map(|(db_name, counts)| cli::CountPerDb { db_name, ao_count: counts.ao, heap_count: counts.heap })
            .collect();
        Ok(Response::new(cli::CheckObjectCountReply { list_of_counts }))
    }

    /// Check whether the target database is new enough to be upgraded.
    async fn check_version(&self, request: Request<cli::CheckVersionRequest>) -> RpcResult<Response<cli::CheckVersionReply>> {
        let req = request.into_inner();
        let port = parse_port(req.db_port).map_err(AppError::into_status)?;
        let host = required("host", req.host).map_err(AppError::into_status)?;
        let is_version_compatible = upgrade::check_version(self.deps.db.clone(), &host, port).await.map_err(AppError::grpc)?;
        Ok(Response::new(cli::CheckVersionReply { is_version_compatible }))
    }

    /// Report filesystem usage across every segment host.
    async fn check_disk_usage(&self, _request: Request<cli::CheckDiskUsageRequest>) -> RpcResult<Response<cli::CheckDiskUsageReply>> {
        let segment_file_sys_usage = upgrade::disk_usage(self.deps.agents.clone(), &self.config.state_dir(), self.config.agent_timeout())
            .await
            .map_err(AppError::grpc)?;
        Ok(Response::new(cli::CheckDiskUsageReply { segment_file_sys_usage }))
    }

    /// Initialize the new cluster in the background.
    async fn prepare_init_cluster(&self, request: Request<cli::PrepareInitClusterRequest>) -> RpcResult<Response<cli::PrepareInitClusterReply>> {
        let new_bin_dir = required("new_bin_dir", request.into_inner().new_bin_dir).map_err(AppError::into_status)?;
        let work = upgrade::init_cluster(self.deps.exec.clone(), self.config.state_dir(), PathBuf::from(new_bin_dir));
        self.runner.dispatch(UpgradeStep::PrepareInitCluster, work).await.map_err(AppError::into_status)?;
        Ok(Response::new(cli::PrepareInitClusterReply {}))
    }

    /// Start the agent on every segment host in the background.
    async fn prepare_start_agents(&self, _request: Request<cli::PrepareStartAgentsRequest>) -> RpcResult<Response<cli::PrepareStartAgentsReply>> {
        let bin_dir = self.gphome_bin().map_err(AppError::into_status)?;
        let work = upgrade::start_agents(self.deps.exec.clone(), self.config.state_dir(), bin_dir, self.config.agent_timeout());
        self.runner.dispatch(UpgradeStep::PrepareStartAgents, work).await.map_err(AppError::into_status)?;
        Ok(Response::new(cli::PrepareStartAgentsReply {}))
    }

    /// Shut down both clusters in the background.
    async fn prepare_shutdown_clusters(
        &self, request: Request<cli::PrepareShutdownClustersRequest>,
    ) -> RpcResult<Response<cli::PrepareShutdownClustersReply>> {
        let req = request.into_inner();
        let old_bin_dir = required("old_bin_dir", req.old_bin_dir).map_err(AppError::into_status)?;
        let new_bin_dir = required("new_bin_dir", req.new_bin_dir).map_err(AppError::into_status)?;
        let work = upgrade::shutdown_clusters(self.deps.exec.clone(), self.deps.markers.clone(), self.config.state_dir(), old_bin_dir, new_bin_dir);
        self.runner.dispatch(UpgradeStep::StoppedCluster, work).await.map_err(AppError::into_status)?;
        Ok(Response::new(cli::PrepareShutdownClustersReply {}))
    }

    /// Run pg_upgrade against the master in the background.
    async fn upgrade_convert_master(
        &self, request: Request<cli::UpgradeConvertMasterRequest>,
    ) -> RpcResult<Response<cli::UpgradeConvertMasterReply>> {
        let req = request.into_inner();
        let args = ConvertMasterArgs {
            old_bin_dir: required("old_bin_dir", req.old_bin_dir).map_err(AppError::into_status)?,
            new_bin_dir: required("new_bin_dir", req.new_bin_dir).map_err(AppError::into_status)?,
            old_data_dir: required("old_data_dir", req.old_data_dir).map_err(AppError::into_status)?,
            new_data_dir: required("new_data_dir", req.new_data_dir).map_err(AppError::into_status)?,
        };
        let work = upgrade::convert_master(self.deps.exec.clone(), self.config.state_dir(), args);
        self.runner.dispatch(UpgradeStep::MasterUpgrade, work).await.map_err(AppError::into_status)?;
        Ok(Response::new(cli::UpgradeConvertMasterReply {}))
    }

    /// Upgrade every primary segment through its host's agent.
    async fn upgrade_convert_primaries(
        &self, request: Request<cli::UpgradeConvertPrimariesRequest>,
    ) -> RpcResult<Response<cli::UpgradeConvertPrimariesReply>> {
        let req = request.into_inner();
        let old_bin_dir = required("old_bin_dir", req.old_bin_dir).map_err(AppError::into_status)?;
        let new_bin_dir = required("new_bin_dir", req.new_bin_dir).map_err(AppError::into_status)?;
        upgrade::convert_primaries(self.deps.agents.clone(), self.config.state_dir(), old_bin_dir, new_bin_dir, self.config.agent_timeout())
            .await
            .map_err(AppError::grpc)?;
        Ok(Response::new(cli::UpgradeConvertPrimariesReply {}))
    }
}
