//! Calls from the hub to the agents running on each segment host.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tonic::transport::{Channel, Endpoint};

use crate::error::AppError;
use gpupgrade_core::grpc::agent::{self, HubToAgentClient};

/// Usage percentage at or above which a filesystem is reported as critical.
pub const DISK_USAGE_CRITICAL_PERCENT: f64 = 80.0;

/// A client of the agents running on segment hosts.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Verify that the upgrade binaries are installed in the given bin dir on the given host.
    async fn check_upgrade_binaries(&self, host: &str, bin_dir: &str) -> Result<()>;
    /// Report the usage of every filesystem on the given host.
    async fn check_disk_space(&self, host: &str) -> Result<Vec<agent::FileSysUsage>>;
    /// Upgrade the given primary segments on the given host.
    async fn convert_primaries(&self, host: &str, request: agent::UpgradeConvertPrimarySegmentsRequest) -> Result<()>;
}

/// An agent connector speaking gRPC to each host's agent.
#[derive(Clone, Debug)]
pub struct GrpcAgents {
    port: u16,
    timeout: Duration,
}

impl GrpcAgents {
    /// Create a new instance.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn client(&self, host: &str) -> Result<HubToAgentClient<Channel>> {
        let url = format!("http://{}:{}", host, self.port);
        let channel = Endpoint::from_shared(url.clone())
            .with_context(|| format!("invalid agent address {}", url))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await
            .map_err(|err| AppError::connection(format!("agent on {}", host), err))?;
        Ok(HubToAgentClient::new(channel))
    }
}

#[async_trait]
impl AgentConnector for GrpcAgents {
    async fn check_upgrade_binaries(&self, host: &str, bin_dir: &str) -> Result<()> {
        let mut client = self.client(host).await?;
        client
            .check_upgrade_binaries(agent::CheckUpgradeBinariesRequest { bin_dir: bin_dir.into() })
            .await
            .with_context(|| format!("agent on {} could not verify upgrade binaries", host))?;
        Ok(())
    }

    async fn check_disk_space(&self, host: &str) -> Result<Vec<agent::FileSysUsage>> {
        let mut client = self.client(host).await?;
        let reply = client
            .check_disk_space_on_agents(agent::CheckDiskSpaceRequestToAgent {})
            .await
            .with_context(|| format!("agent on {} could not check disk space", host))?;
        Ok(reply.into_inner().list_of_file_sys_usage)
    }

    async fn convert_primaries(&self, host: &str, request: agent::UpgradeConvertPrimarySegmentsRequest) -> Result<()> {
        let mut client = self.client(host).await?;
        client
            .upgrade_convert_primary_segments(request)
            .await
            .with_context(|| format!("agent on {} failed to upgrade primary segments", host))?;
        Ok(())
    }
}

/// Run the given call against every host concurrently, each under its own deadline.
///
/// Fails fast: the first host to fail or time out fails the whole fan-out.
pub async fn fan_out<T, F, Fut>(hosts: &[String], timeout: Duration, call: F) -> Result<Vec<(String, T)>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let calls = hosts.iter().cloned().map(|host| {
        let fut = call(host.clone());
        async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(val)) => Ok((host, val)),
                Ok(Err(err)) => Err(err.context(format!("error from host {}", host))),
                Err(_elapsed) => Err(AppError::connection(format!("agent on {}", host), anyhow::anyhow!("timed out after {:?}", timeout)).into()),
            }
        }
    });
    try_join_all(calls).await
}

/// Render one host's filesystem usage as disk usage report lines.
pub fn disk_usage_lines(host: &str, usage: &[agent::FileSysUsage]) -> Vec<String> {
    let critical: Vec<String> = usage
        .iter()
        .filter(|fs| fs.usage >= DISK_USAGE_CRITICAL_PERCENT)
        .map(|fs| format!("diskspace check - {} - Critical - {} {:.1}% full", host, fs.filesystem, fs.usage))
        .collect();
    if critical.is_empty() {
        vec![format!("diskspace check - {} - OK", host)]
    } else {
        critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_usage_lines_report_ok_and_critical() {
        let healthy = vec![agent::FileSysUsage { filesystem: "/data".into(), usage: 42.0 }];
        assert_eq!(disk_usage_lines("sdw1", &healthy), vec!["diskspace check - sdw1 - OK".to_string()]);

        let full = vec![
            agent::FileSysUsage { filesystem: "/data".into(), usage: 91.3 },
            agent::FileSysUsage { filesystem: "/".into(), usage: 10.0 },
        ];
        assert_eq!(disk_usage_lines("sdw2", &full), vec!["diskspace check - sdw2 - Critical - /data 91.3% full".to_string()]);
    }

    #[tokio::test]
    async fn fan_out_applies_per_host_deadline() {
        let hosts = vec!["fast".to_string(), "slow".to_string()];
        let res = fan_out(&hosts, Duration::from_millis(50), |host| async move {
            if host == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(host.len())
        })
        .await;
        let err = res.expect_err("expected the slow host to time out");
        assert!(
            matches!(err.downcast_ref::<AppError>(), Some(AppError::Connection { .. })),
            "expected a connection error, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn fan_out_collects_every_host() -> Result<()> {
        let hosts = vec!["sdw1".to_string(), "sdw2".to_string()];
        let res = fan_out(&hosts, Duration::from_secs(1), |host| async move { Ok(host.to_uppercase()) }).await?;
        assert_eq!(res, vec![("sdw1".to_string(), "SDW1".to_string()), ("sdw2".to_string(), "SDW2".to_string())]);
        Ok(())
    }
}
