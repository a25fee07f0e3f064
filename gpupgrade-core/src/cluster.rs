//! Cluster topology models.
//!
//! A cluster is described by the rows of its `gp_segment_configuration` catalog, one per
//! segment. The master is the segment whose content id is `-1`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The content id identifying a cluster's master.
pub const MASTER_CONTENT_ID: i32 = -1;
/// The file name of the old cluster's saved configuration.
pub const OLD_CLUSTER_CONFIG_FILE: &str = "cluster_config.json";
/// The file name of the new cluster's saved configuration.
pub const NEW_CLUSTER_CONFIG_FILE: &str = "new_cluster_config.json";

/// A single segment of a cluster, as recorded in `gp_segment_configuration`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub dbid: i32,
    pub content: i32,
    pub role: String,
    pub preferred_role: String,
    pub mode: String,
    pub status: String,
    pub port: i32,
    pub hostname: String,
    pub address: String,
    pub datadir: String,
}

impl SegmentConfig {
    /// Returns true if this segment is the cluster's master.
    pub fn is_master(&self) -> bool {
        self.content == MASTER_CONTENT_ID
    }

    /// Returns true if this segment is currently acting as a primary.
    pub fn is_primary(&self) -> bool {
        self.role == "p" || (self.is_master() && self.role == "m")
    }
}

/// The full segment topology of one cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentConfigs(pub Vec<SegmentConfig>);

impl SegmentConfigs {
    /// Read a saved segment configuration from the given JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|err| AppError::filesystem(path, err))?;
        serde_json::from_slice(&data).with_context(|| format!("error parsing cluster configuration {}", path.display()))
    }

    /// Write this segment configuration to the given JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_vec_pretty(self).context("error serializing cluster configuration")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| AppError::filesystem(parent, err))?;
        }
        tokio::fs::write(path, data).await.map_err(|err| AppError::filesystem(path, err))?;
        Ok(())
    }

    /// The master segment of this cluster, if present.
    pub fn master(&self) -> Option<&SegmentConfig> {
        self.0.iter().find(|seg| seg.is_master())
    }

    /// The segment with the given content id.
    pub fn segment(&self, content: i32) -> Option<&SegmentConfig> {
        self.0.iter().find(|seg| seg.content == content)
    }

    /// The distinct hostnames of all non-master segments, in sorted order.
    pub fn segment_hosts(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|seg| !seg.is_master())
            .map(|seg| seg.hostname.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// All primary segments excluding the master.
    pub fn primaries(&self) -> impl Iterator<Item = &SegmentConfig> {
        self.0.iter().filter(|seg| !seg.is_master() && seg.is_primary())
    }
}

/// One cluster's binaries together with its segment topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// The directory holding this cluster's binaries.
    pub bin_dir: PathBuf,
    /// The segments of this cluster.
    pub segments: SegmentConfigs,
}

impl Cluster {
    /// Create a new instance.
    pub fn new(bin_dir: impl Into<PathBuf>, segments: SegmentConfigs) -> Self {
        Self { bin_dir: bin_dir.into(), segments }
    }

    /// The data directory of this cluster's master.
    pub fn master_data_dir(&self) -> Result<&str> {
        self.segments
            .master()
            .map(|seg| seg.datadir.as_str())
            .ok_or_else(|| AppError::ResourceNotFound(format!("no master (content {}) in cluster configuration", MASTER_CONTENT_ID)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SEGMENT_JSON: &str = r#"[
        {"address": "mdw", "content": -1, "datadir": "/data/master/gpseg-1", "dbid": 1, "hostname": "mdw",
         "mode": "s", "port": 15432, "preferred_role": "m", "role": "m", "status": "u"},
        {"address": "sdw1", "content": 0, "datadir": "/data/primary/gpseg0", "dbid": 2, "hostname": "sdw1",
         "mode": "s", "port": 25432, "preferred_role": "p", "role": "p", "status": "u"},
        {"address": "sdw2", "content": 1, "datadir": "/data/primary/gpseg1", "dbid": 3, "hostname": "sdw2",
         "mode": "s", "port": 25432, "preferred_role": "p", "role": "p", "status": "u"},
        {"address": "sdw1", "content": 1, "datadir": "/data/mirror/gpseg1", "dbid": 4, "hostname": "sdw1",
         "mode": "s", "port": 35432, "preferred_role": "m", "role": "m", "status": "u"}
    ]"#;

    #[tokio::test]
    async fn saved_config_loads_with_master_and_hosts() -> Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join(OLD_CLUSTER_CONFIG_FILE);
        let configs: SegmentConfigs = serde_json::from_str(TWO_SEGMENT_JSON)?;
        configs.save(&path).await?;

        let loaded = SegmentConfigs::load(&path).await?;
        assert_eq!(loaded, configs, "loaded config does not match saved config");

        let cluster = Cluster::new("/usr/local/gpdb/bin", loaded);
        assert_eq!(cluster.master_data_dir()?, "/data/master/gpseg-1");
        assert_eq!(cluster.segments.segment_hosts(), vec!["sdw1".to_string(), "sdw2".to_string()]);
        let primaries: Vec<i32> = cluster.segments.primaries().map(|seg| seg.dbid).collect();
        assert_eq!(primaries, vec![2, 3], "expected only primary dbids, got {:?}", primaries);
        Ok(())
    }

    #[test]
    fn cluster_without_master_has_no_data_dir() {
        let cluster = Cluster::new("/bin", SegmentConfigs::default());
        assert!(cluster.master_data_dir().is_err(), "expected an error for a cluster without a master");
    }

    #[tokio::test]
    async fn missing_config_is_a_filesystem_error() {
        let err = SegmentConfigs::load("/nonexistent/cluster_config.json").await.unwrap_err();
        assert!(
            matches!(err.downcast_ref::<AppError>(), Some(AppError::Filesystem { .. })),
            "expected filesystem error, got {:?}",
            err
        );
    }
}
