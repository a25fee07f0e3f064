use std::time::Duration;

use anyhow::Result;
use tonic::transport::{Channel, Endpoint};

use crate::error::CliError;
use gpupgrade_core::grpc::cli::CliToHubClient;

/// The deadline for establishing a connection to the hub.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected hub client.
pub type HubClient = CliToHubClient<Channel>;

/// Connect to the hub at the given URL.
pub async fn connect(url: &str) -> Result<HubClient> {
    let endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|err| CliError::HubUnreachable(format!("invalid hub URL {}: {}", url, err)))?
        .connect_timeout(CONNECT_TIMEOUT);
    let channel = endpoint
        .connect()
        .await
        .map_err(|err| CliError::HubUnreachable(format!("{} ({})", err, url)))?;
    tracing::debug!(url, "connected to hub");
    Ok(CliToHubClient::new(channel))
}
