use anyhow::{Context, Result};

fn main() -> Result<()> {
    // Build the cli_to_hub.proto code.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["../proto/cli_to_hub.proto"], &["../proto"])
        .context("error compiling cli_to_hub proto")?;

    // Build the hub_to_agent.proto code.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["../proto/hub_to_agent.proto"], &["../proto"])
        .context("error compiling hub_to_agent proto")?;

    Ok(())
}
