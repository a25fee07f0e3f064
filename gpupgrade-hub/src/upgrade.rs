//! The work performed by each hub operation.
//!
//! Handlers in `server` validate requests and decide whether work runs inline or as a
//! background step; the functions here do the actual work against the hub's collaborators.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::agents::{self, AgentConnector};
use crate::cluster_pair::ClusterPair;
use crate::database::{DbConnector, TableCounts, TEMPLATE_DATABASE};
use crate::error::AppError;
use crate::exec::{self, CommandExec};
use crate::markers::MarkerStore;
use gpupgrade_core::cluster::{SegmentConfig, SegmentConfigs, NEW_CLUSTER_CONFIG_FILE, OLD_CLUSTER_CONFIG_FILE};
use gpupgrade_core::grpc::agent;
use gpupgrade_core::version::Version;
use gpupgrade_core::PG_UPGRADE_BINARY;

/// The host on which the hub reaches the local master.
pub const MASTER_HOST: &str = "localhost";
/// The offset added to every old segment port to form the new cluster's port.
pub const NEW_CLUSTER_PORT_OFFSET: i32 = 2000;
/// The suffix appended to the parent of every old data dir to form the new cluster's data dir.
pub const NEW_DATA_DIR_SUFFIX: &str = "_upgrade";
/// The file name of the generated gpinitsystem input file, relative to the state dir.
pub const GPINITSYSTEM_CONFIG_FILE: &str = "gpinitsystem_config";
/// The name of the agent binary installed on every segment host.
pub const AGENT_BINARY: &str = "gp_upgrade_agent";

/// Load the old cluster's saved segment configuration.
pub async fn old_cluster(state_dir: &Path) -> Result<SegmentConfigs> {
    SegmentConfigs::load(state_dir.join(OLD_CLUSTER_CONFIG_FILE))
        .await
        .context("error loading old cluster configuration, has `check config` been run?")
}

/// Query the local master's segment configuration and save it as the old cluster's config.
#[tracing::instrument(level = "info", skip(db))]
pub async fn save_cluster_config(db: Arc<dyn DbConnector>, port: u16, state_dir: PathBuf) -> Result<()> {
    let conn = db.connect(MASTER_HOST, port, TEMPLATE_DATABASE).await?;
    let configs = conn.segment_configuration().await?;
    if configs.master().is_none() {
        return Err(AppError::ResourceNotFound("the queried segment configuration has no master".into()).into());
    }
    configs.save(state_dir.join(OLD_CLUSTER_CONFIG_FILE)).await?;
    tracing::info!(segments = configs.0.len(), "saved old cluster configuration");
    Ok(())
}

/// Check whether the database at the given address is new enough to be upgraded.
#[tracing::instrument(level = "info", skip(db))]
pub async fn check_version(db: Arc<dyn DbConnector>, host: &str, port: u16) -> Result<bool> {
    let conn = db.connect(host, port, TEMPLATE_DATABASE).await?;
    let raw = conn.version_string().await?;
    let version = Version::from_version_string(&raw)?;
    let compatible = version.is_upgradable()?;
    tracing::info!(%version, compatible, "checked database version");
    Ok(compatible)
}

/// Count append-optimized and heap tables in every connectable database.
#[tracing::instrument(level = "info", skip(db))]
pub async fn count_objects(db: Arc<dyn DbConnector>, port: u16) -> Result<Vec<(String, TableCounts)>> {
    let names = {
        let conn = db.connect(MASTER_HOST, port, TEMPLATE_DATABASE).await?;
        conn.database_names().await?
    };
    let mut counts = Vec::with_capacity(names.len());
    for name in names {
        let conn = db.connect(MASTER_HOST, port, &name).await?;
        let count = conn.table_counts().await.with_context(|| format!("error counting tables in database {}", name))?;
        counts.push((name, count));
    }
    Ok(counts)
}

/// Collect a disk usage report line per segment host.
pub async fn disk_usage(agents: Arc<dyn AgentConnector>, state_dir: &Path, timeout: Duration) -> Result<Vec<String>> {
    let hosts = old_cluster(state_dir).await?.segment_hosts();
    let usage = agents::fan_out(&hosts, timeout, |host| {
        let agents = agents.clone();
        async move { agents.check_disk_space(&host).await }
    })
    .await?;
    Ok(usage.iter().flat_map(|(host, fs)| agents::disk_usage_lines(host, fs)).collect())
}

/// Verify via every segment host's agent that the upgrade binaries are installed.
#[tracing::instrument(level = "info", skip(agents))]
pub async fn verify_seginstall(agents: Arc<dyn AgentConnector>, state_dir: PathBuf, bin_dir: String, timeout: Duration) -> Result<()> {
    let hosts = old_cluster(&state_dir).await?.segment_hosts();
    agents::fan_out(&hosts, timeout, |host| {
        let (agents, bin_dir) = (agents.clone(), bin_dir.clone());
        async move { agents.check_upgrade_binaries(&host, &bin_dir).await }
    })
    .await?;
    Ok(())
}

/// Start the agent on every segment host.
#[tracing::instrument(level = "info", skip(exec))]
pub async fn start_agents(exec: Arc<dyn CommandExec>, state_dir: PathBuf, bin_dir: PathBuf, timeout: Duration) -> Result<()> {
    let hosts = old_cluster(&state_dir).await?.segment_hosts();
    let agent = bin_dir.join(AGENT_BINARY);
    agents::fan_out(&hosts, timeout, |host| {
        let exec = exec.clone();
        let args = vec![
            "-n".to_string(),
            host.clone(),
            format!("sh -c 'nohup {} > /dev/null 2>&1 &'", agent.display()),
        ];
        async move { exec.run("ssh", &args).await }
    })
    .await?;
    Ok(())
}

/// Derive the new cluster's data dir from an old one, e.g. `/data/primary/gpseg0` becomes
/// `/data/primary_upgrade/gpseg0`.
pub fn upgrade_data_dir(datadir: &str) -> Result<String> {
    let path = Path::new(datadir);
    let (parent, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() && parent != Path::new("/") => (parent, name),
        _ => return Err(AppError::InvalidInput(format!("data dir {} has no parent directory to derive from", datadir)).into()),
    };
    let mut upgraded = parent.as_os_str().to_os_string();
    upgraded.push(NEW_DATA_DIR_SUFFIX);
    Ok(PathBuf::from(upgraded).join(name).display().to_string())
}

/// Lay out the new cluster: the old master and primaries on new ports and data dirs.
pub fn target_cluster(old: &SegmentConfigs) -> Result<SegmentConfigs> {
    old.0
        .iter()
        .filter(|seg| seg.is_master() || seg.is_primary())
        .map(|seg| {
            Ok(SegmentConfig {
                port: seg.port + NEW_CLUSTER_PORT_OFFSET,
                datadir: upgrade_data_dir(&seg.datadir)?,
                mode: "s".into(),
                status: "u".into(),
                ..seg.clone()
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(SegmentConfigs)
}

/// Render the gpinitsystem input file describing the given cluster layout.
pub fn gpinitsystem_config(new: &SegmentConfigs) -> Result<String> {
    let master = new
        .master()
        .ok_or_else(|| AppError::ResourceNotFound("the new cluster layout has no master".into()))?;
    let entry = |seg: &SegmentConfig| format!("{}~{}~{}~{}~{}~0", seg.address, seg.port, seg.datadir, seg.dbid, seg.content);
    let mut out = String::new();
    out.push_str("ARRAY_NAME=\"gp_upgrade cluster\"\n");
    out.push_str("SEG_PREFIX=gpseg\n");
    out.push_str("TRUSTED_SHELL=ssh\n");
    out.push_str("CHECK_POINT_SEGMENTS=8\n");
    out.push_str("ENCODING=UNICODE\n");
    out.push_str(&format!("QD_PRIMARY_ARRAY={}\n", entry(master)));
    out.push_str("declare -a PRIMARY_ARRAY=(\n");
    for seg in new.primaries() {
        out.push_str(&entry(seg));
        out.push('\n');
    }
    out.push_str(")\n");
    Ok(out)
}

/// Initialize the new cluster with gpinitsystem and save its configuration.
#[tracing::instrument(level = "info", skip(exec))]
pub async fn init_cluster(exec: Arc<dyn CommandExec>, state_dir: PathBuf, new_bin_dir: PathBuf) -> Result<()> {
    let old = old_cluster(&state_dir).await?;
    let new = target_cluster(&old)?;
    let config_path = state_dir.join(GPINITSYSTEM_CONFIG_FILE);
    tokio::fs::write(&config_path, gpinitsystem_config(&new)?)
        .await
        .map_err(|err| AppError::filesystem(&config_path, err))?;

    let config_arg = config_path.display().to_string();
    let (program, args) = exec::sourced_shell(&new_bin_dir, r#""$1"/gpinitsystem -a -I "$2""#, &[&config_arg]);
    exec.run(&program, &args).await.context("gpinitsystem failed")?;

    new.save(state_dir.join(NEW_CLUSTER_CONFIG_FILE)).await?;
    tracing::info!(segments = new.0.len(), "initialized new cluster");
    Ok(())
}

/// Shut down both clusters, failing unless both shutdowns completed.
#[tracing::instrument(level = "info", skip(exec, markers))]
pub async fn shutdown_clusters(
    exec: Arc<dyn CommandExec>, markers: Arc<dyn MarkerStore>, state_dir: PathBuf, old_bin_dir: String, new_bin_dir: String,
) -> Result<()> {
    let pair = ClusterPair::load(&state_dir, &old_bin_dir, &new_bin_dir, exec).await?;
    let report = pair.stop_everything(markers).await;
    report.old?;
    report.new?;
    Ok(())
}

/// Runs pg_upgrade of new bin dir `$1` from work dir `$2`, upgrading old bin dir `$3` and old data
/// dir `$4` into new data dir `$5`.
const PG_UPGRADE_SCRIPT: &str = concat!(
    r#"cd "$2" && unset PGHOST; "$1"/pg_upgrade --old-bindir="$3" --new-bindir="$1" "#,
    r#"--old-datadir="$4" --new-datadir="$5" --mode=dispatcher"#,
);

/// The paths handed to pg_upgrade for one upgrade.
#[derive(Clone, Debug)]
pub struct ConvertMasterArgs {
    pub old_bin_dir: String,
    pub new_bin_dir: String,
    pub old_data_dir: String,
    pub new_data_dir: String,
}

/// Run pg_upgrade against the master, from a working dir inside the state dir.
#[tracing::instrument(level = "info", skip(exec))]
pub async fn convert_master(exec: Arc<dyn CommandExec>, state_dir: PathBuf, args: ConvertMasterArgs) -> Result<()> {
    let work_dir = state_dir.join(PG_UPGRADE_BINARY);
    tokio::fs::create_dir_all(&work_dir).await.map_err(|err| AppError::filesystem(&work_dir, err))?;
    let work_dir_arg = work_dir.display().to_string();
    let (program, shell_args) = exec::sourced_shell(
        Path::new(&args.new_bin_dir),
        PG_UPGRADE_SCRIPT,
        &[&work_dir_arg, &args.old_bin_dir, &args.old_data_dir, &args.new_data_dir],
    );
    exec.run(&program, &shell_args).await.context("pg_upgrade on master failed")?;
    Ok(())
}

/// Ask every segment host's agent to upgrade the primaries it hosts.
#[tracing::instrument(level = "info", skip(agents))]
pub async fn convert_primaries(
    agents: Arc<dyn AgentConnector>, state_dir: PathBuf, old_bin_dir: String, new_bin_dir: String, timeout: Duration,
) -> Result<()> {
    let old = old_cluster(&state_dir).await?;
    let new = SegmentConfigs::load(state_dir.join(NEW_CLUSTER_CONFIG_FILE))
        .await
        .context("error loading new cluster configuration, has `prepare init-cluster` been run?")?;

    let mut per_host: BTreeMap<String, Vec<agent::DataDirPair>> = BTreeMap::new();
    for seg in old.primaries() {
        let target = new
            .segment(seg.content)
            .ok_or_else(|| AppError::ResourceNotFound(format!("segment with content {} is missing from the new cluster", seg.content)))?;
        per_host.entry(seg.hostname.clone()).or_default().push(agent::DataDirPair {
            old_data_dir: seg.datadir.clone(),
            new_data_dir: target.datadir.clone(),
            content: seg.content,
        });
    }

    let hosts: Vec<String> = per_host.keys().cloned().collect();
    let per_host = Arc::new(per_host);
    agents::fan_out(&hosts, timeout, |host| {
        let agents = agents.clone();
        let request = agent::UpgradeConvertPrimarySegmentsRequest {
            old_bin_dir: old_bin_dir.clone(),
            new_bin_dir: new_bin_dir.clone(),
            data_dir_pairs: per_host.get(&host).cloned().unwrap_or_default(),
        };
        async move { agents.convert_primaries(&host, request).await }
    })
    .await?;
    Ok(())
}
