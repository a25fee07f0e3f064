//! In-memory fakes of the hub's collaborators.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::agents::AgentConnector;
use crate::database::{DbConn, DbConnector, TableCounts};
use crate::error::AppError;
use crate::exec::CommandExec;
use crate::markers::{MarkerStore, ShutdownOutcome};
use crate::utils;
use gpupgrade_core::cluster::{SegmentConfig, SegmentConfigs};
use gpupgrade_core::grpc::agent;

/// A standard cluster layout: a master on `mdw`, two primaries and one mirror.
pub fn segment_configs() -> SegmentConfigs {
    let seg = |dbid: i32, content: i32, role: &str, host: &str, port: i32, datadir: &str| SegmentConfig {
        dbid,
        content,
        role: role.into(),
        preferred_role: role.into(),
        mode: "s".into(),
        status: "u".into(),
        port,
        hostname: host.into(),
        address: host.into(),
        datadir: datadir.into(),
    };
    SegmentConfigs(vec![
        seg(1, -1, "p", "mdw", 15432, "/data/master/gpseg-1"),
        seg(2, 0, "p", "sdw1", 25432, "/data/primary/gpseg0"),
        seg(3, 1, "p", "sdw2", 25433, "/data/primary/gpseg1"),
        seg(4, 0, "m", "sdw2", 35432, "/data/mirror/gpseg0"),
    ])
}

/// A single-segment cluster whose master lives in the given data dir.
pub fn master_only(datadir: &str) -> SegmentConfigs {
    let mut configs = segment_configs();
    configs.0.truncate(1);
    configs.0[0].datadir = datadir.into();
    configs
}

/// A marker store held in memory, optionally failing every write.
#[derive(Default)]
pub struct MemMarkerStore {
    markers: Mutex<BTreeSet<(String, ShutdownOutcome)>>,
    fail_writes: bool,
}

impl MemMarkerStore {
    /// A store whose writes all fail as though the filesystem were unavailable.
    pub fn failing() -> Self {
        Self { markers: Default::default(), fail_writes: true }
    }

    /// Every marker currently present, as `<label>/<outcome>` paths.
    pub fn paths(&self) -> Vec<String> {
        let markers = self.markers.lock().unwrap();
        markers.iter().map(|(label, outcome)| format!("{}/{}", label, outcome)).collect()
    }

    fn check_writable(&self, label: &str) -> Result<(), AppError> {
        if self.fail_writes {
            let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
            return Err(AppError::filesystem(format!("gpstop.{}", label), err));
        }
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for MemMarkerStore {
    async fn create(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError> {
        self.check_writable(label)?;
        self.markers.lock().unwrap().insert((label.into(), outcome));
        Ok(())
    }

    async fn remove(&self, label: &str, outcome: ShutdownOutcome) -> Result<(), AppError> {
        self.check_writable(label)?;
        self.markers.lock().unwrap().remove(&(label.into(), outcome));
        Ok(())
    }

    async fn exists(&self, label: &str, outcome: ShutdownOutcome) -> Result<bool, AppError> {
        Ok(self.markers.lock().unwrap().contains(&(label.into(), outcome)))
    }
}

/// A command executor which records every command line instead of running it.
#[derive(Default)]
pub struct FakeExec {
    calls: Mutex<Vec<String>>,
    /// Command lines containing any of these substrings fail.
    fail_on: Vec<String>,
    /// How long each command takes.
    delay: Option<Duration>,
}

impl FakeExec {
    /// An executor failing every command whose line contains the given substring.
    pub fn failing_on(pattern: &str) -> Self {
        Self { fail_on: vec![pattern.into()], ..Default::default() }
    }

    /// An executor whose every command takes the given time.
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Default::default() }
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExec for FakeExec {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let cmdline = utils::command_line(program, args);
        self.calls.lock().unwrap().push(cmdline.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.iter().any(|pattern| cmdline.contains(pattern.as_str())) {
            bail!("`{}` exited with exit status: 1", cmdline);
        }
        Ok(String::new())
    }
}

/// A database connector serving canned catalog data.
#[derive(Clone)]
pub struct FakeDb {
    pub version: String,
    pub segments: SegmentConfigs,
    pub databases: Vec<(String, TableCounts)>,
    /// When set, every connection attempt fails as unreachable.
    pub unreachable: bool,
}

impl Default for FakeDb {
    fn default() -> Self {
        Self {
            version: "PostgreSQL 8.3.23 (Greenplum Database 5.0.0 build dev) on x86_64-pc-linux-gnu".into(),
            segments: segment_configs(),
            databases: vec![
                ("postgres".into(), TableCounts { ao: 0, heap: 1 }),
                ("template1".into(), TableCounts { ao: 2, heap: 3 }),
            ],
            unreachable: false,
        }
    }
}

#[async_trait]
impl DbConnector for FakeDb {
    async fn connect(&self, host: &str, port: u16, dbname: &str) -> Result<Box<dyn DbConn>, AppError> {
        if self.unreachable {
            return Err(AppError::connection(format!("database {} on {}:{}", dbname, host, port), anyhow::anyhow!("connection refused")));
        }
        Ok(Box::new(FakeConn { db: self.clone(), dbname: dbname.into() }))
    }
}

struct FakeConn {
    db: FakeDb,
    dbname: String,
}

#[async_trait]
impl DbConn for FakeConn {
    async fn version_string(&self) -> Result<String> {
        Ok(self.db.version.clone())
    }

    async fn segment_configuration(&self) -> Result<SegmentConfigs> {
        Ok(self.db.segments.clone())
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        Ok(self.db.databases.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn table_counts(&self) -> Result<TableCounts> {
        match self.db.databases.iter().find(|(name, _)| name == &self.dbname) {
            Some((_, counts)) => Ok(*counts),
            None => bail!("database {} does not exist", self.dbname),
        }
    }
}

/// An agent connector whose every host answers from canned data.
#[derive(Default)]
pub struct FakeAgents {
    /// The filesystem usage reported by every host.
    pub usage: Vec<agent::FileSysUsage>,
    /// Hosts which never answer.
    pub hung_hosts: Vec<String>,
    /// Every convert request received, by host.
    pub converted: Mutex<Vec<(String, agent::UpgradeConvertPrimarySegmentsRequest)>>,
}

impl FakeAgents {
    async fn answer(&self, host: &str) {
        if self.hung_hosts.iter().any(|hung| hung == host) {
            futures::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl AgentConnector for FakeAgents {
    async fn check_upgrade_binaries(&self, host: &str, _bin_dir: &str) -> Result<()> {
        self.answer(host).await;
        Ok(())
    }

    async fn check_disk_space(&self, host: &str) -> Result<Vec<agent::FileSysUsage>> {
        self.answer(host).await;
        Ok(self.usage.clone())
    }

    async fn convert_primaries(&self, host: &str, request: agent::UpgradeConvertPrimarySegmentsRequest) -> Result<()> {
        self.answer(host).await;
        self.converted.lock().unwrap().push((host.into(), request));
        Ok(())
    }
}

