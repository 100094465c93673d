//! Indexing job runner.
//!
//! One job owns one directory: uploaded `.mbox` files in, JSON
//! artifacts out, with a `job.json` record a poller can read at any
//! time. The pipeline never panics the host: every failure lands in
//! the record as a terminal error status.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;

use mailsift_extract::{extract_parts, read_mbox, CapitalizedNames, DocumentPart, Extractor};
use mailsift_identity::{IdentityEngine, MatchModel, DEFAULT_THRESHOLD};

use crate::artifacts::{
    load_postings, load_store, read_json_opt, save_parts, save_postings, save_store, write_json,
    JobPaths,
};
use crate::error::{IndexError, Result};
use crate::fingerprint::{exact_hash, simhash64, SeenParts};
use crate::postings::build_postings;
use crate::store::{ClusterStore, MutationBatch};

/// How often the job record is rewritten during extraction.
const PROGRESS_EVERY: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed: usize,
    pub total: usize,
}

/// Counts reported by a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub messages: usize,
    pub parts: usize,
    pub duplicates_skipped: usize,
    pub identifiers: usize,
    pub clusters: usize,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// The `job.json` artifact. Written atomically on every transition, so
/// a concurrent status poll sees either the previous or next state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<IndexSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn running() -> Self {
        Self {
            status: JobStatus::Running,
            started: Utc::now(),
            progress: None,
            error: None,
            summary: None,
            completed: None,
        }
    }
}

/// Read the job record for a directory, if a job ever ran there.
pub async fn job_status(paths: &JobPaths) -> Result<Option<JobRecord>> {
    read_json_opt(&paths.job_record()).await
}

/// One uploaded archive. The original upload name survives in an
/// optional `<file>.meta.json` sidecar next to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxUpload {
    pub path: PathBuf,
    pub original_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    original_name: String,
}

/// All `.mbox` files directly under a job directory, path-sorted.
pub async fn discover_mailboxes(dir: &Path) -> Result<Vec<MailboxUpload>> {
    let mut uploads = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mbox") {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let fallback = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let original_name = match read_json_opt::<SidecarMeta>(&sidecar_path(&path)).await {
            Ok(Some(meta)) => meta.original_name,
            Ok(None) => fallback,
            Err(err) => {
                log::warn!("unreadable sidecar for {}: {err}", path.display());
                fallback
            }
        };
        uploads.push(MailboxUpload {
            path,
            original_name,
        });
    }
    uploads.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(uploads)
}

fn sidecar_path(mbox: &Path) -> PathBuf {
    let mut sidecar = mbox.as_os_str().to_os_string();
    sidecar.push(".meta.json");
    PathBuf::from(sidecar)
}

/// Exclusive per-job lock backing the single-writer discipline for
/// indexing and mutation batches. Held for the guard's lifetime.
pub struct JobLock {
    file: Option<File>,
    path: PathBuf,
}

impl JobLock {
    /// Take the lock, failing fast with `Locked` when another process
    /// already holds it.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let lock_path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.try_lock_exclusive().map_err(|err| {
                if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                    IndexError::Locked
                } else {
                    IndexError::Io(err)
                }
            })?;
            Ok(file)
        })
        .await??;
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = FileExt::unlock(&file) {
                log::warn!("failed to release {}: {err}", self.path.display());
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexJobOptions {
    /// Classifier probability gate; `DEFAULT_THRESHOLD` when unset.
    pub threshold: Option<f64>,
    /// Trained classifier artifact; `<job>/model.json` when unset.
    pub model_path: Option<PathBuf>,
    /// Tika base URL; the builtin extractor when unset.
    pub tika_url: Option<String>,
    /// Blocking bucket cap override.
    pub max_bucket: Option<usize>,
}

/// Run the full indexing pipeline for one job directory.
///
/// Pipeline failures are terminal job states, not call failures: the
/// returned record carries `status: error` and the message, exactly as
/// written to `job.json`. Only lock acquisition and record persistence
/// errors propagate as `Err`.
pub async fn run_index_job(paths: &JobPaths, options: &IndexJobOptions) -> Result<JobRecord> {
    fs::create_dir_all(paths.root()).await?;
    let lock = JobLock::acquire(&paths.lock()).await?;

    let mut record = JobRecord::running();
    write_json(&paths.job_record(), &record).await?;

    match index_pipeline(paths, options, &mut record).await {
        Ok(summary) => {
            log::info!(
                "job under {} done: {} messages, {} parts, {} clusters",
                paths.root().display(),
                summary.messages,
                summary.parts,
                summary.clusters
            );
            record.status = JobStatus::Done;
            record.summary = Some(summary);
        }
        Err(err) => {
            log::error!("job under {} failed: {err}", paths.root().display());
            record.status = JobStatus::Error;
            record.error = Some(err.to_string());
        }
    }
    record.completed = Some(Utc::now());
    write_json(&paths.job_record(), &record).await?;
    drop(lock);
    Ok(record)
}

async fn index_pipeline(
    paths: &JobPaths,
    options: &IndexJobOptions,
    record: &mut JobRecord,
) -> Result<IndexSummary> {
    let clock = std::time::Instant::now();
    let mailboxes = discover_mailboxes(paths.root()).await?;
    if mailboxes.is_empty() {
        return Err(IndexError::Validation(format!(
            "no .mbox files found under {}",
            paths.root().display()
        )));
    }

    let model_path = options
        .model_path
        .clone()
        .unwrap_or_else(|| paths.model());
    if fs::metadata(&model_path).await.is_err() {
        return Err(IndexError::Validation(format!(
            "no classifier artifact at {}; train one first",
            model_path.display()
        )));
    }
    let model = MatchModel::load(&model_path)?;
    if !model.is_trained() {
        return Err(IndexError::Validation(format!(
            "classifier artifact at {} is not trained",
            model_path.display()
        )));
    }

    let extractor = Extractor::from_tika_url(options.tika_url.clone());
    log::info!(
        "indexing {} mailboxes with the {} extractor",
        mailboxes.len(),
        extractor.backend_name()
    );

    let mut blobs: Vec<Vec<u8>> = Vec::new();
    for mailbox in &mailboxes {
        let mut messages = read_mbox(&mailbox.path).await?;
        log::debug!(
            "{}: {} messages",
            mailbox.original_name,
            messages.len()
        );
        blobs.append(&mut messages);
    }

    let total = blobs.len();
    record.progress = Some(JobProgress {
        processed: 0,
        total,
    });
    write_json(&paths.job_record(), record).await?;

    let mut parts_by_id: BTreeMap<String, DocumentPart> = BTreeMap::new();
    let mut kept = Vec::new();
    let mut seen = SeenParts::new();
    let mut duplicates_skipped = 0usize;

    for (message_index, raw) in blobs.iter().enumerate() {
        for (part_index, mut part) in extract_parts(raw, &extractor).await.into_iter().enumerate() {
            let part_id = format!("m{message_index:05}.p{part_index}");
            let hash = exact_hash(&part.body_text);
            // Empty extractions are all alike; only real text dedupes.
            if !part.body_text.trim().is_empty() && !seen.first_sighting(&hash) {
                duplicates_skipped += 1;
                log::debug!("skipping duplicate part {part_id}");
                continue;
            }
            part.part_id = part_id.clone();
            part.part_hash = hash;
            part.part_simhash = simhash64(&part.body_text);
            parts_by_id.insert(part_id, part.clone());
            kept.push(part);
        }
        let processed = message_index + 1;
        if processed % PROGRESS_EVERY == 0 || processed == total {
            record.progress = Some(JobProgress {
                processed,
                total,
            });
            write_json(&paths.job_record(), record).await?;
        }
    }

    let postings = build_postings(&kept, &CapitalizedNames);
    let universe: Vec<String> = postings.identifiers().cloned().collect();

    let threshold = options.threshold.unwrap_or(DEFAULT_THRESHOLD);
    let mut engine = IdentityEngine::new(model, threshold);
    if let Some(max_bucket) = options.max_bucket {
        engine = engine.max_bucket(max_bucket);
    }
    let components = engine.cluster(&universe)?;
    let store = ClusterStore::from_components(&components, &postings);

    save_parts(paths, &parts_by_id).await?;
    save_postings(paths, &postings).await?;
    save_store(paths, &store).await?;

    Ok(IndexSummary {
        messages: total,
        parts: kept.len(),
        duplicates_skipped,
        identifiers: postings.len(),
        clusters: store.len(),
        elapsed_ms: clock.elapsed().as_millis() as u64,
    })
}

/// Result of one mutation batch.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    /// Ids of clusters synthesized by create requests, in order.
    pub created: Vec<String>,
    /// Cluster count after the batch.
    pub clusters: usize,
}

/// Apply one mutation batch against a job's persisted cluster store.
///
/// The batch is computed fully in memory and persisted atomically at
/// the end; a failure leaves the previous artifacts in place.
pub async fn apply_mutations(paths: &JobPaths, batch: &MutationBatch) -> Result<MutationOutcome> {
    let _lock = JobLock::acquire(&paths.lock()).await?;
    let postings = load_postings(paths).await?.ok_or_else(|| {
        IndexError::NotFound(format!(
            "no postings index under {}",
            paths.root().display()
        ))
    })?;
    let mut store = load_store(paths).await?.ok_or_else(|| {
        IndexError::NotFound(format!(
            "no cluster store under {}",
            paths.root().display()
        ))
    })?;

    let created = store.apply(batch, &postings);
    save_store(paths, &store).await?;
    log::info!(
        "mutation batch applied under {}: {} created, {} clusters",
        paths.root().display(),
        created.len(),
        store.len()
    );
    Ok(MutationOutcome {
        created,
        clusters: store.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn discovery_finds_only_mbox_files() {
        let dir = TempDir::new().expect("tempdir");
        tokio::fs::write(dir.path().join("b.mbox"), b"From a\n\nhi\n")
            .await
            .expect("write");
        tokio::fs::write(dir.path().join("a.mbox"), b"From a\n\nhi\n")
            .await
            .expect("write");
        tokio::fs::write(dir.path().join("notes.txt"), b"not a mailbox")
            .await
            .expect("write");

        let uploads = discover_mailboxes(dir.path()).await.expect("discover");
        let names: Vec<&str> = uploads.iter().map(|u| u.original_name.as_str()).collect();
        assert_eq!(names, vec!["a.mbox", "b.mbox"]);
    }

    #[tokio::test]
    async fn sidecars_override_the_upload_name() {
        let dir = TempDir::new().expect("tempdir");
        tokio::fs::write(dir.path().join("upload-01.mbox"), b"From a\n\nhi\n")
            .await
            .expect("write");
        tokio::fs::write(
            dir.path().join("upload-01.mbox.meta.json"),
            br#"{"original_name": "2001-inbox.mbox"}"#,
        )
        .await
        .expect("write");

        let uploads = discover_mailboxes(dir.path()).await.expect("discover");
        assert_eq!(uploads[0].original_name, "2001-inbox.mbox");
    }

    #[tokio::test]
    async fn second_lock_acquisition_fails_fast() {
        let dir = TempDir::new().expect("tempdir");
        let lock_path = dir.path().join("job.lock");
        let held = JobLock::acquire(&lock_path).await.expect("first lock");
        let denied = JobLock::acquire(&lock_path).await;
        assert!(matches!(denied, Err(IndexError::Locked)));
        drop(held);
        JobLock::acquire(&lock_path).await.expect("relock after drop");
    }

    #[tokio::test]
    async fn empty_job_directory_records_a_validation_error() {
        let dir = TempDir::new().expect("tempdir");
        let paths = JobPaths::new(dir.path());
        let record = run_index_job(&paths, &IndexJobOptions::default())
            .await
            .expect("job call");
        assert_eq!(record.status, JobStatus::Error);
        assert!(record.error.as_deref().unwrap_or("").contains("no .mbox files"));
        let polled = job_status(&paths).await.expect("poll").expect("record");
        assert_eq!(polled.status, JobStatus::Error);
    }
}
