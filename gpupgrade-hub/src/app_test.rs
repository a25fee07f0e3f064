use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tonic::transport::Channel;

use super::*;
use crate::fixtures::{master_only, segment_configs, FakeAgents, FakeDb, FakeExec, MemMarkerStore};
use gpupgrade_core::cluster::{NEW_CLUSTER_CONFIG_FILE, OLD_CLUSTER_CONFIG_FILE};
use gpupgrade_core::grpc::cli::{self, CliToHubClient};

fn deps(exec: Arc<FakeExec>, markers: Arc<MemMarkerStore>) -> HubDeps {
    HubDeps {
        db: Arc::new(FakeDb::default()),
        agents: Arc::new(FakeAgents::default()),
        exec,
        markers,
    }
}

/// A test config listening on an ephemeral port.
fn ephemeral(config: &Config) -> Arc<Config> {
    let mut config = config.clone();
    config.cli_to_hub_port = 0;
    Arc::new(config)
}

async fn client(handle: &HubHandle) -> Result<CliToHubClient<Channel>> {
    let url = format!("http://127.0.0.1:{}", handle.local_addr().port());
    Ok(CliToHubClient::connect(url).await?)
}

#[tokio::test]
async fn hub_can_be_restarted_on_the_same_port() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let app = App::new(ephemeral(&config), deps(Default::default(), Default::default())).await?;
    let handle = app.start().await?;
    let port = handle.local_addr().port();
    client(&handle).await?.ping(cli::PingRequest {}).await?;
    handle.stop().await;

    let mut config = (*config).clone();
    config.cli_to_hub_port = port;
    let app = App::new(Arc::new(config), deps(Default::default(), Default::default())).await?;
    let handle = app.start().await?;
    assert_eq!(handle.local_addr().port(), port, "expected restarted hub to reuse port {}", port);
    client(&handle).await?.ping(cli::PingRequest {}).await?;
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn start_fails_when_the_port_is_taken() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let taken = std::net::TcpListener::bind("0.0.0.0:0")?;
    let mut config = (*config).clone();
    config.cli_to_hub_port = taken.local_addr()?.port();

    let app = App::new(Arc::new(config), deps(Default::default(), Default::default())).await?;
    let res = app.start().await;
    assert!(res.is_err(), "expected start to fail while port {} is bound", taken.local_addr()?.port());
    Ok(())
}

#[tokio::test]
async fn status_reports_every_step_and_tracks_a_dispatched_shutdown() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    segment_configs().save(config.state_dir().join(OLD_CLUSTER_CONFIG_FILE)).await?;
    master_only("/data/master_upgrade/gpseg-1").save(config.state_dir().join(NEW_CLUSTER_CONFIG_FILE)).await?;
    let exec = Arc::new(FakeExec::slow(Duration::from_millis(200)));
    let markers = Arc::new(MemMarkerStore::default());
    let app = App::new(ephemeral(&config), deps(exec.clone(), markers.clone())).await?;
    let handle = app.start().await?;
    let mut client = client(&handle).await?;

    let lines = status_lines(&mut client).await?;
    assert_eq!(lines.len(), UpgradeStep::TRACKED.len(), "expected one line per step, got {:?}", lines);
    assert!(lines.contains(&"PENDING - Shutdown clusters".to_string()), "unexpected status lines {:?}", lines);

    let req = cli::PrepareShutdownClustersRequest { old_bin_dir: "/old/bin".into(), new_bin_dir: "/new/bin".into() };
    client.prepare_shutdown_clusters(req.clone()).await?;
    let lines = status_lines(&mut client).await?;
    assert!(lines.contains(&"RUNNING - Shutdown clusters".to_string()), "unexpected status lines {:?}", lines);

    let err = client.prepare_shutdown_clusters(req).await.expect_err("expected a second dispatch to be rejected");
    assert_eq!(err.code(), tonic::Code::FailedPrecondition, "unexpected status {:?}", err);

    app.wait_idle().await;
    let lines = status_lines(&mut client).await?;
    assert!(lines.contains(&"COMPLETE - Shutdown clusters".to_string()), "unexpected status lines {:?}", lines);
    assert_eq!(markers.paths(), vec!["new/completed".to_string(), "old/completed".to_string()]);
    assert_eq!(exec.calls().len(), 2, "expected one stop per cluster, got {:?}", exec.calls());
    drop(client);
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn check_config_saves_the_cluster_configuration() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let app = App::new(ephemeral(&config), deps(Default::default(), Default::default())).await?;
    let handle = app.start().await?;
    let mut client = client(&handle).await?;

    let reply = client.check_config(cli::CheckConfigRequest { db_port: 15432 }).await?.into_inner();
    assert_eq!(reply.config_status, "All good");
    assert!(config.state_dir().join(OLD_CLUSTER_CONFIG_FILE).exists(), "expected the cluster configuration to be saved");
    assert_eq!(app.checklist().status(UpgradeStep::CheckConfig), StepStatus::Complete);

    let err = client.check_config(cli::CheckConfigRequest { db_port: 70000 }).await.expect_err("expected an invalid port to be rejected");
    assert_eq!(err.code(), tonic::Code::InvalidArgument, "unexpected status {:?}", err);
    drop(client);
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_database_is_reported_as_a_hub_failure() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let deps = HubDeps {
        db: Arc::new(FakeDb { unreachable: true, ..Default::default() }),
        ..deps(Default::default(), Default::default())
    };
    let app = App::new(ephemeral(&config), deps).await?;
    let handle = app.start().await?;
    let mut client = client(&handle).await?;

    let req = cli::CheckVersionRequest { host: "dbhost".into(), db_port: 15432 };
    let err = client.check_version(req).await.expect_err("expected an unreachable database to fail the check");
    assert_ne!(err.code(), tonic::Code::Unavailable, "a reachable hub must not report Unavailable: {:?}", err);
    assert_eq!(err.code(), tonic::Code::FailedPrecondition, "unexpected status {:?}", err);
    assert!(err.message().contains("dbhost:15432"), "expected the database in the message, got {}", err.message());

    let err = client.check_config(cli::CheckConfigRequest { db_port: 15432 }).await.expect_err("expected check config to fail");
    assert_eq!(err.code(), tonic::Code::FailedPrecondition, "unexpected status {:?}", err);
    assert_eq!(app.checklist().status(UpgradeStep::CheckConfig), StepStatus::Failed);
    drop(client);
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn interrupted_steps_are_reconciled_on_startup() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    {
        let checklist = Checklist::open(config.state_dir().join(CHECKLIST_FILE)).await?;
        checklist.initialize();
        checklist.mark_running(UpgradeStep::StoppedCluster)?;
        checklist.mark_running(UpgradeStep::MasterUpgrade)?;
    }
    let markers = Arc::new(MemMarkerStore::default());
    markers.create(LABEL_OLD, ShutdownOutcome::Completed).await?;
    markers.create(LABEL_NEW, ShutdownOutcome::Completed).await?;

    let app = App::new(config.clone(), deps(Default::default(), markers)).await?;
    assert_eq!(app.checklist().status(UpgradeStep::StoppedCluster), StepStatus::Complete);
    assert_eq!(app.checklist().status(UpgradeStep::MasterUpgrade), StepStatus::Failed);
    assert_eq!(app.checklist().status(UpgradeStep::CheckConfig), StepStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn interrupted_shutdown_with_a_failed_cluster_is_failed_on_startup() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    {
        let checklist = Checklist::open(config.state_dir().join(CHECKLIST_FILE)).await?;
        checklist.initialize();
        checklist.mark_running(UpgradeStep::StoppedCluster)?;
    }
    let markers = Arc::new(MemMarkerStore::default());
    markers.create(LABEL_OLD, ShutdownOutcome::Completed).await?;
    markers.create(LABEL_NEW, ShutdownOutcome::Running).await?;

    let app = App::new(config.clone(), deps(Default::default(), markers)).await?;
    assert_eq!(app.checklist().status(UpgradeStep::StoppedCluster), StepStatus::Failed);
    Ok(())
}

async fn status_lines(client: &mut CliToHubClient<Channel>) -> Result<Vec<String>> {
    let reply = client.status_upgrade(cli::StatusUpgradeRequest {}).await?.into_inner();
    Ok(reply.list_of_upgrade_step_statuses.iter().map(|status| status.report_line()).collect())
}
