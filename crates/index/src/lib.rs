//! Job-scoped indexing over extracted message parts.
//!
//! ```text
//!   .mbox uploads
//!        |
//!   extraction (mailsift-extract)
//!        |
//!   fingerprint dedup ──> parts.json
//!        |
//!   postings index ─────> identifier_postings.json
//!        |
//!   identity clustering (mailsift-identity)
//!        |
//!   cluster store ──────> cluster_index.json / id_to_cluster.json / clusters.json
//! ```
//!
//! A job owns one directory and everything it produces is plain JSON
//! written atomically, so artifacts stay inspectable and a status
//! poller never sees a half-written file. The cluster store stays
//! editable after the job through move, relabel and create batches.

pub mod artifacts;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod postings;
pub mod store;

pub use artifacts::{
    load_parts, load_postings, load_store, read_json_opt, save_parts, save_postings, save_store,
    write_json, JobPaths, CLUSTER_INDEX_FILE, CLUSTER_SUMMARIES_FILE, IDENTIFIER_POSTINGS_FILE,
    ID_TO_CLUSTER_FILE, JOB_LOCK_FILE, JOB_RECORD_FILE, MODEL_FILE, PARTS_FILE,
};
pub use error::{IndexError, Result};
pub use fingerprint::{
    exact_hash, group_by_simhash, hamming, normalize_text, simhash64, SeenParts,
};
pub use job::{
    apply_mutations, discover_mailboxes, job_status, run_index_job, IndexJobOptions, IndexSummary,
    JobLock, JobProgress, JobRecord, JobStatus, MailboxUpload, MutationOutcome,
};
pub use postings::{build_postings, Posting, PostingsIndex, Role};
pub use store::{
    Cluster, ClusterStore, ClusterSummary, CreateRequest, IdentifierEntry, MoveRequest,
    MutationBatch, RelabelRequest,
};
