use anyhow::Result;

use super::*;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("CLI_TO_HUB_PORT".into(), "8527".into()),
        ("HUB_TO_AGENT_PORT".into(), "8416".into()),
        ("STATE_DIR".into(), "/var/lib/gpupgrade".into()),
        ("AGENT_TIMEOUT_SECONDS".into(), "5".into()),
        ("GPHOME".into(), "/usr/local/greenplum-db".into()),
    ])?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.cli_to_hub_port == 8527, "unexpected value parsed for CLI_TO_HUB_PORT, got {}, expected {}", config.cli_to_hub_port, 8527);
    assert!(
        config.hub_to_agent_port == 8416,
        "unexpected value parsed for HUB_TO_AGENT_PORT, got {}, expected {}",
        config.hub_to_agent_port,
        8416
    );
    assert!(
        config.state_dir() == PathBuf::from("/var/lib/gpupgrade"),
        "unexpected value parsed for STATE_DIR, got {:?}, expected {}",
        config.state_dir,
        "/var/lib/gpupgrade"
    );
    assert!(
        config.agent_timeout() == Duration::from_secs(5),
        "unexpected value parsed for AGENT_TIMEOUT_SECONDS, got {:?}, expected {}s",
        config.agent_timeout(),
        5
    );
    assert!(
        config.gphome == Some(PathBuf::from("/usr/local/greenplum-db")),
        "unexpected value parsed for GPHOME, got {:?}",
        config.gphome
    );

    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(Vec::<(String, String)>::new())?;

    assert!(config.rust_log == "info", "unexpected default for RUST_LOG, got {}, expected {}", config.rust_log, "info");
    assert!(config.cli_to_hub_port == 7527, "unexpected default for CLI_TO_HUB_PORT, got {}, expected {}", config.cli_to_hub_port, 7527);
    assert!(
        config.hub_to_agent_port == 6416,
        "unexpected default for HUB_TO_AGENT_PORT, got {}, expected {}",
        config.hub_to_agent_port,
        6416
    );
    assert!(config.state_dir.is_none(), "expected STATE_DIR to be unset, got {:?}", config.state_dir);
    assert!(config.gphome.is_none(), "expected GPHOME to be unset, got {:?}", config.gphome);

    Ok(())
}
