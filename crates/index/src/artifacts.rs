//! On-disk artifact layout and atomic JSON persistence.
//!
//! Every artifact of one job lives flat under the job directory. Writes
//! go through a `.tmp` sibling followed by a rename, so a poller never
//! reads a partially written file.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use mailsift_extract::DocumentPart;

use crate::error::{IndexError, Result};
use crate::postings::PostingsIndex;
use crate::store::{Cluster, ClusterStore};

pub const CLUSTER_INDEX_FILE: &str = "cluster_index.json";
pub const ID_TO_CLUSTER_FILE: &str = "id_to_cluster.json";
pub const CLUSTER_SUMMARIES_FILE: &str = "clusters.json";
pub const IDENTIFIER_POSTINGS_FILE: &str = "identifier_postings.json";
pub const PARTS_FILE: &str = "parts.json";
pub const JOB_RECORD_FILE: &str = "job.json";
pub const JOB_LOCK_FILE: &str = "job.lock";
pub const MODEL_FILE: &str = "model.json";

/// Artifact locations for one job directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster_index(&self) -> PathBuf {
        self.root.join(CLUSTER_INDEX_FILE)
    }

    pub fn id_to_cluster(&self) -> PathBuf {
        self.root.join(ID_TO_CLUSTER_FILE)
    }

    pub fn cluster_summaries(&self) -> PathBuf {
        self.root.join(CLUSTER_SUMMARIES_FILE)
    }

    pub fn identifier_postings(&self) -> PathBuf {
        self.root.join(IDENTIFIER_POSTINGS_FILE)
    }

    pub fn parts(&self) -> PathBuf {
        self.root.join(PARTS_FILE)
    }

    pub fn job_record(&self) -> PathBuf {
        self.root.join(JOB_RECORD_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join(JOB_LOCK_FILE)
    }

    pub fn model(&self) -> PathBuf {
        self.root.join(MODEL_FILE)
    }
}

/// Serialize `value` as pretty JSON and move it into place atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read one artifact. A missing file is `Ok(None)`; an unparseable one
/// is a `CorruptArtifact` naming the path.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| IndexError::CorruptArtifact {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Persist the cluster maps and the derived ordered summary together.
pub async fn save_store(paths: &JobPaths, store: &ClusterStore) -> Result<()> {
    write_json(&paths.cluster_index(), store.clusters()).await?;
    write_json(&paths.id_to_cluster(), store.id_to_cluster()).await?;
    write_json(&paths.cluster_summaries(), &store.summaries()).await?;
    Ok(())
}

pub async fn load_store(paths: &JobPaths) -> Result<Option<ClusterStore>> {
    let clusters: Option<BTreeMap<String, Cluster>> =
        read_json_opt(&paths.cluster_index()).await?;
    let id_to_cluster: Option<BTreeMap<String, String>> =
        read_json_opt(&paths.id_to_cluster()).await?;
    match (clusters, id_to_cluster) {
        (Some(clusters), Some(id_to_cluster)) => {
            Ok(Some(ClusterStore::from_parts(clusters, id_to_cluster)))
        }
        _ => Ok(None),
    }
}

pub async fn save_postings(paths: &JobPaths, postings: &PostingsIndex) -> Result<()> {
    write_json(&paths.identifier_postings(), postings).await
}

pub async fn load_postings(paths: &JobPaths) -> Result<Option<PostingsIndex>> {
    read_json_opt(&paths.identifier_postings()).await
}

pub async fn save_parts(paths: &JobPaths, parts: &BTreeMap<String, DocumentPart>) -> Result<()> {
    write_json(&paths.parts(), parts).await
}

pub async fn load_parts(paths: &JobPaths) -> Result<Option<BTreeMap<String, DocumentPart>>> {
    read_json_opt(&paths.parts()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::Role;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn postings_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let paths = JobPaths::new(dir.path());
        let mut postings = PostingsIndex::new();
        postings.add("ada@example.org", "m00000.p0", Role::From);
        save_postings(&paths, &postings).await.expect("save");

        let loaded = load_postings(&paths).await.expect("load").expect("present");
        assert_eq!(loaded.get("ada@example.org"), postings.get("ada@example.org"));
        assert!(!paths.identifier_postings().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_artifacts_read_as_none() {
        let dir = TempDir::new().expect("tempdir");
        let paths = JobPaths::new(dir.path());
        assert!(load_postings(&paths).await.expect("read").is_none());
        assert!(load_store(&paths).await.expect("read").is_none());
        assert!(load_parts(&paths).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn corrupt_artifacts_name_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let paths = JobPaths::new(dir.path());
        tokio::fs::write(paths.identifier_postings(), b"{not json")
            .await
            .expect("write");
        let err = load_postings(&paths).await.expect_err("must fail");
        match err {
            IndexError::CorruptArtifact { path, .. } => {
                assert_eq!(path, paths.identifier_postings());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn store_round_trip_preserves_both_maps() {
        let dir = TempDir::new().expect("tempdir");
        let paths = JobPaths::new(dir.path());
        let components = vec![vec![
            "Ada Lovelace".to_string(),
            "ada@example.org".to_string(),
        ]];
        let store = ClusterStore::from_components(&components, &PostingsIndex::new());
        save_store(&paths, &store).await.expect("save");

        let loaded = load_store(&paths).await.expect("load").expect("present");
        assert_eq!(loaded.clusters(), store.clusters());
        assert_eq!(loaded.id_to_cluster(), store.id_to_cluster());
        assert!(paths.cluster_summaries().exists());
    }
}
