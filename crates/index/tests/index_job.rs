//! End-to-end indexing job over a small three-person archive.

use std::collections::BTreeSet;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mailsift_identity::{fit_logistic, FeatureExtractor, MatchModel, TrainingOptions};
use mailsift_index::{
    apply_mutations, load_parts, load_postings, load_store, run_index_job, ClusterStore,
    CreateRequest, IndexError, IndexJobOptions, JobPaths, JobStatus, MoveRequest, MutationBatch,
    PostingsIndex, RelabelRequest, Role,
};

const ARCHIVE: &str = "From ada.lovelace@example.org Mon Mar  1 10:00:00 2021\n\
From: Ada Lovelace <ada.lovelace@example.org>\n\
To: Grace Hopper <grace.hopper@navy.example>\n\
Subject: Engine cards\n\
Date: Mon, 1 Mar 2021 10:00:00 +0000\n\
Message-ID: <one@example.org>\n\
\n\
Grace, the punched cards arrived this morning.\n\
From grace.hopper@navy.example Tue Mar  2 09:00:00 2021\n\
From: Grace Hopper <grace.hopper@navy.example>\n\
To: Ada Lovelace <ada.lovelace@example.org>, Bob Tran <bob.tran@corp.example>\n\
Subject: Re: Engine cards\n\
Date: Tue, 2 Mar 2021 09:00:00 +0000\n\
Message-ID: <two@example.org>\n\
\n\
Looping in Bob Tran for the compiler side.\n\
From bob.tran@corp.example Wed Mar  3 08:00:00 2021\n\
From: Bob Tran <bob.tran@corp.example>\n\
To: ada.lovelace@example.org\n\
Subject: Compiler side\n\
Date: Wed, 3 Mar 2021 08:00:00 +0000\n\
Message-ID: <three@example.org>\n\
\n\
Thanks, Ada. Write ada.lovelace@example.org if the deck stalls.\n\
From bob.tran@corp.example Wed Mar  3 08:05:00 2021\n\
From: Bob Tran <bob.tran@corp.example>\n\
To: ada.lovelace@example.org\n\
Subject: Compiler side (resend)\n\
Date: Wed, 3 Mar 2021 08:05:00 +0000\n\
Message-ID: <three-resend@example.org>\n\
\n\
Thanks, Ada. Write ada.lovelace@example.org if the deck stalls.\n";

fn gold_clusters() -> Vec<Vec<String>> {
    let raw: &[&[&str]] = &[
        &["Ada Lovelace", "ada.lovelace@example.org"],
        &["Grace Hopper", "grace.hopper@navy.example"],
        &["Bob Tran", "bob.tran@corp.example"],
        &["Alan Turing", "alan.turing@nlab.example"],
        &["Rosalind Franklin", "rosalind.franklin@kings.example"],
    ];
    raw.iter()
        .map(|cluster| cluster.iter().map(|s| s.to_string()).collect())
        .collect()
}

async fn seed_job(dir: &Path) -> JobPaths {
    let paths = JobPaths::new(dir);
    tokio::fs::write(dir.join("archive.mbox"), ARCHIVE)
        .await
        .expect("write archive");

    let mut extractor = FeatureExtractor::with_heuristics();
    let logistic = fit_logistic(&mut extractor, &gold_clusters(), &TrainingOptions::default())
        .expect("fit");
    MatchModel::Logistic(logistic)
        .save(&paths.model())
        .expect("save model");
    paths
}

fn options() -> IndexJobOptions {
    IndexJobOptions {
        threshold: Some(0.5),
        ..IndexJobOptions::default()
    }
}

fn assert_postings_consistent(store: &ClusterStore, postings: &PostingsIndex) {
    for (id, cluster) in store.clusters() {
        let mut expected = BTreeSet::new();
        for member in &cluster.members {
            for posting in postings.get(member) {
                expected.insert(posting.clone());
            }
        }
        let actual: BTreeSet<_> = cluster.postings.iter().cloned().collect();
        assert_eq!(actual, expected, "postings of cluster {id} drifted");
        assert_eq!(cluster.postings.len(), actual.len(), "cluster {id} has duplicates");
        assert!(!cluster.members.is_empty(), "cluster {id} is empty");
    }
}

#[tokio::test]
async fn job_produces_consistent_artifacts() {
    let dir = TempDir::new().expect("tempdir");
    let paths = seed_job(dir.path()).await;

    let record = run_index_job(&paths, &options()).await.expect("job");
    assert_eq!(record.status, JobStatus::Done, "error: {:?}", record.error);

    let summary = record.summary.expect("summary");
    assert_eq!(summary.messages, 4);
    assert_eq!(summary.parts, 3);
    assert_eq!(summary.duplicates_skipped, 1);
    assert_eq!(summary.identifiers, 6);
    assert_eq!(summary.clusters, 3);

    let parts = load_parts(&paths).await.expect("read").expect("parts");
    assert!(parts.contains_key("m00000.p0"));
    assert!(parts.contains_key("m00002.p0"));
    assert!(!parts.contains_key("m00003.p0"), "duplicate must be skipped");

    let postings = load_postings(&paths).await.expect("read").expect("postings");
    let bob = postings.get("Bob Tran");
    assert!(bob.iter().any(|p| p.part_id == "m00001.p0" && p.role == Role::Body));
    assert!(bob.iter().any(|p| p.part_id == "m00001.p0" && p.role == Role::Recipient));
    assert!(bob.iter().any(|p| p.part_id == "m00002.p0" && p.role == Role::From));

    let store = load_store(&paths).await.expect("read").expect("store");

    // Partition invariant over the indexed universe.
    let mut members = BTreeSet::new();
    for cluster in store.clusters().values() {
        for member in &cluster.members {
            assert!(members.insert(member.clone()), "{member} in two clusters");
        }
    }
    let universe: BTreeSet<String> = postings.identifiers().cloned().collect();
    assert_eq!(members, universe);

    assert_postings_consistent(&store, &postings);

    // Names cluster with their own addresses.
    assert_eq!(
        store.cluster_of("Ada Lovelace"),
        store.cluster_of("ada.lovelace@example.org")
    );
    assert_ne!(
        store.cluster_of("Ada Lovelace"),
        store.cluster_of("Grace Hopper")
    );
    let ada = store.cluster_of("Ada Lovelace").expect("cluster");
    assert_eq!(store.get(ada).expect("record").label, "Ada Lovelace");
}

#[tokio::test]
async fn rerunning_an_unchanged_job_is_byte_identical() {
    let dir = TempDir::new().expect("tempdir");
    let paths = seed_job(dir.path()).await;

    run_index_job(&paths, &options()).await.expect("first run");
    let first_index = tokio::fs::read(paths.cluster_index()).await.expect("read");
    let first_map = tokio::fs::read(paths.id_to_cluster()).await.expect("read");
    let first_parts = tokio::fs::read(paths.parts()).await.expect("read");

    run_index_job(&paths, &options()).await.expect("second run");
    let second_index = tokio::fs::read(paths.cluster_index()).await.expect("read");
    let second_map = tokio::fs::read(paths.id_to_cluster()).await.expect("read");
    let second_parts = tokio::fs::read(paths.parts()).await.expect("read");

    assert_eq!(first_index, second_index);
    assert_eq!(first_map, second_map);
    assert_eq!(first_parts, second_parts);
}

#[tokio::test]
async fn mutation_batches_keep_the_store_consistent() {
    let dir = TempDir::new().expect("tempdir");
    let paths = seed_job(dir.path()).await;
    run_index_job(&paths, &options()).await.expect("job");

    let store = load_store(&paths).await.expect("read").expect("store");
    let ada = store.cluster_of("Ada Lovelace").expect("cluster").to_string();

    let batch = MutationBatch {
        creates: vec![
            CreateRequest {
                members: vec!["Grace Hopper".to_string(), "grace.hopper@navy.example".to_string()],
                label: Some("Rear Admiral Hopper".to_string()),
            },
            CreateRequest {
                members: Vec::new(),
                label: Some("ignored".to_string()),
            },
        ],
        moves: vec![
            MoveRequest {
                identifier: "bob.tran@corp.example".to_string(),
                to_cluster: ada.clone(),
            },
            MoveRequest {
                identifier: "nobody@example.org".to_string(),
                to_cluster: ada.clone(),
            },
        ],
        relabels: vec![RelabelRequest {
            cluster_id: ada.clone(),
            label: "Ada, Countess of Lovelace".to_string(),
        }],
    };
    let outcome = apply_mutations(&paths, &batch).await.expect("mutate");
    assert_eq!(outcome.created.len(), 1, "empty create must be ignored");

    let postings = load_postings(&paths).await.expect("read").expect("postings");
    let store = load_store(&paths).await.expect("read").expect("store");
    assert_postings_consistent(&store, &postings);

    assert_eq!(store.cluster_of("bob.tran@corp.example"), Some(ada.as_str()));
    assert_eq!(store.get(&ada).expect("record").label, "Ada, Countess of Lovelace");
    let hopper = store.get(&outcome.created[0]).expect("created");
    assert_eq!(hopper.label, "Rear Admiral Hopper");
    assert_eq!(hopper.members.len(), 2);

    // The whole universe is still covered exactly once.
    let mut members = BTreeSet::new();
    for cluster in store.clusters().values() {
        for member in &cluster.members {
            assert!(members.insert(member.clone()), "{member} in two clusters");
        }
    }
    let universe: BTreeSet<String> = postings.identifiers().cloned().collect();
    assert_eq!(members, universe);
}

#[tokio::test]
async fn mutating_a_job_that_never_ran_reports_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let paths = JobPaths::new(dir.path());
    let err = apply_mutations(&paths, &MutationBatch::default())
        .await
        .expect_err("must fail");
    assert!(matches!(err, IndexError::NotFound(_)), "got {err}");
}

#[tokio::test]
async fn missing_classifier_is_a_terminal_job_error() {
    let dir = TempDir::new().expect("tempdir");
    let paths = JobPaths::new(dir.path());
    tokio::fs::write(dir.path().join("archive.mbox"), ARCHIVE)
        .await
        .expect("write archive");

    let record = run_index_job(&paths, &options()).await.expect("job call");
    assert_eq!(record.status, JobStatus::Error);
    assert!(record
        .error
        .as_deref()
        .unwrap_or("")
        .contains("classifier"));
}
