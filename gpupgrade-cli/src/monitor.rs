//! Polling of the pg_upgrade process on a segment host over ssh.
//!
//! Every poll opens its own ssh session, lists processes filtered for pg_upgrade, and classifies
//! the output. The grep running the filter always matches itself, so its line is discarded
//! before classification.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use serde::Serialize;

use crate::error::CliError;
use gpupgrade_core::cluster::SegmentConfigs;
use gpupgrade_core::PG_UPGRADE_BINARY;

/// The default ssh port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// The private key used when none is given, relative to `$HOME`.
pub const DEFAULT_PRIVATE_KEY: &str = ".ssh/id_rsa";
/// The deadline for establishing an ssh session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The observed state of pg_upgrade on a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Active,
    Inactive,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
        }
    }
}

/// The segment a monitor observation is about.
#[derive(Debug, Serialize)]
struct Observed<'a> {
    segment_id: i32,
    host: &'a str,
}

/// The host and segment to observe, and how to reach the host.
#[derive(Clone, Debug)]
pub struct MonitorTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub segment_id: i32,
}

/// The command run on the remote host.
pub fn process_list_command() -> String {
    format!("ps auxx | grep {}", PG_UPGRADE_BINARY)
}

/// Classify the given process list, ignoring the line of the grep which produced it.
pub fn classify(process_list: &str, binary: &str) -> ProcessState {
    let active = process_list
        .lines()
        .filter(|line| !is_grep(line))
        .any(|line| line.contains(binary));
    if active {
        ProcessState::Active
    } else {
        ProcessState::Inactive
    }
}

fn is_grep(line: &str) -> bool {
    line.split_whitespace().any(|word| word == "grep" || word.ends_with("/grep"))
}

/// Render a single newline-terminated observation line.
pub fn render(state: ProcessState, segment_id: i32, host: &str) -> Result<String> {
    let observed = serde_json::to_string(&Observed { segment_id, host }).context("error encoding monitor observation")?;
    Ok(format!("{} state - {} {}\n", PG_UPGRADE_BINARY, state, observed))
}

/// Observe pg_upgrade on the target and write the observation to the given output.
///
/// The segment must be present in the given cluster configuration. A failure to reach the host
/// is returned as an error and never reported as an inactive process.
#[tracing::instrument(level = "debug", skip(connector, configs, out))]
pub async fn monitor<W: Write>(connector: &dyn SshConnector, target: &MonitorTarget, configs: &SegmentConfigs, out: &mut W) -> Result<ProcessState> {
    if configs.segment(target.segment_id).is_none() {
        return Err(anyhow!("segment_id {} not known in this cluster configuration", target.segment_id));
    }
    let process_list = connector
        .connect_and_execute(&target.host, target.port, &target.user, &process_list_command())
        .await?;
    let state = classify(&process_list, PG_UPGRADE_BINARY);
    out.write_all(render(state, target.segment_id, &target.host)?.as_bytes())
        .context("error writing monitor output")?;
    Ok(state)
}

/// The default private key path for the given home directory.
pub fn default_private_key(home: &Path) -> PathBuf {
    home.join(DEFAULT_PRIVATE_KEY)
}

/// A provider of remote command execution.
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Open a session to the given host, run the given command and return its output.
    ///
    /// The session is closed before returning, on success and on failure.
    async fn connect_and_execute(&self, host: &str, port: u16, user: &str, command: &str) -> Result<String>;
}

/// An ssh connector authenticating with a private key.
pub struct RusshConnector {
    key: Arc<KeyPair>,
}

impl RusshConnector {
    /// Create a connector using the private key at the given path.
    pub fn from_key_file(path: &Path) -> Result<Self, CliError> {
        let key = russh_keys::load_secret_key(path, None).map_err(|err| CliError::PrivateKey {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        Ok(Self { key: Arc::new(key) })
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect_and_execute(&self, host: &str, port: u16, user: &str, command: &str) -> Result<String> {
        let connection_error = |source: anyhow::Error| CliError::SshConnection { host: host.into(), port, source };

        let config = Arc::new(client::Config::default());
        let mut session = tokio::time::timeout(CONNECT_TIMEOUT, client::connect(config, (host, port), AcceptAnyHost))
            .await
            .map_err(|_elapsed| connection_error(anyhow!("timed out after {:?}", CONNECT_TIMEOUT)))?
            .map_err(|err| connection_error(err.into()))?;
        let authenticated = session
            .authenticate_publickey(user, self.key.clone())
            .await
            .map_err(|err| connection_error(err.into()))?;
        if !authenticated {
            return Err(connection_error(anyhow!("public key authentication failed for user {}", user)).into());
        }

        let res = run_command(&session, command).await;
        if let Err(err) = session.disconnect(Disconnect::ByApplication, "", "English").await {
            tracing::debug!(error = ?err, host, "error closing ssh session");
        }
        res
    }
}

async fn run_command(session: &Handle<AcceptAnyHost>, command: &str) -> Result<String> {
    let mut channel = session.channel_open_session().await.context("error opening ssh channel")?;
    channel.exec(true, command).await.context("error running remote command")?;
    let mut output = Vec::new();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => output.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status } => tracing::debug!(exit_status, command, "remote command exited"),
            _ => (),
        }
    }
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// A session handler which does not verify segment host keys.
struct AcceptAnyHost;

#[async_trait]
impl client::Handler for AcceptAnyHost {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
