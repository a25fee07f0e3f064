//! Generated RPC code for the CLI-to-hub and hub-to-agent contracts.

/// The control plane exposed by the hub to the CLI.
pub mod cli {
    tonic::include_proto!("cli_to_hub");

    pub use cli_to_hub_client::CliToHubClient;
    pub use cli_to_hub_server::{CliToHub, CliToHubServer};
}

/// Host-local actions exposed by agents to the hub.
pub mod agent {
    tonic::include_proto!("hub_to_agent");

    pub use hub_to_agent_client::HubToAgentClient;
    pub use hub_to_agent_server::{HubToAgent, HubToAgentServer};
}
