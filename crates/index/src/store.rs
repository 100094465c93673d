//! Editable cluster store.
//!
//! Holds the output of one clustering run as two maps, cluster id to
//! cluster record and identifier to cluster id, and applies mutation
//! batches against them. Every identifier belongs to at most one
//! cluster, and clusters left without members after a batch are
//! removed before anything is persisted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mailsift_identity::canonical_label;

use crate::postings::{Posting, PostingsIndex, Role};

/// One identity cluster as persisted in `cluster_index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub label: String,
    pub members: Vec<String>,
    /// Deduplicated union of the members' postings.
    #[serde(default)]
    pub postings: Vec<Posting>,
}

/// Row of the ordered `clusters.json` summary artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: String,
    pub label: String,
    pub size: usize,
    pub members: Vec<String>,
}

/// Row of the list-identifiers view: where one identifier lives and
/// whether it is its cluster's gold label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifierEntry {
    pub identifier: String,
    pub cluster_id: String,
    pub cluster_label: String,
    pub gold: bool,
    pub postings: usize,
}

/// A batch of edits, applied in create, move, relabel order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationBatch {
    #[serde(default)]
    pub creates: Vec<CreateRequest>,
    #[serde(default)]
    pub moves: Vec<MoveRequest>,
    #[serde(default)]
    pub relabels: Vec<RelabelRequest>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.moves.is_empty() && self.relabels.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    pub members: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub identifier: String,
    pub to_cluster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelabelRequest {
    pub cluster_id: String,
    pub label: String,
}

/// In-memory form of one job's cluster artifacts.
#[derive(Debug, Default, Clone)]
pub struct ClusterStore {
    clusters: BTreeMap<String, Cluster>,
    id_to_cluster: BTreeMap<String, String>,
    create_counter: u64,
}

impl ClusterStore {
    /// Build the store from connected components. Component ids hash
    /// only the sorted member list, so an unchanged universe produces
    /// byte-identical artifacts on re-runs.
    pub fn from_components(components: &[Vec<String>], postings: &PostingsIndex) -> Self {
        let mut store = Self::default();
        for component in components {
            if component.is_empty() {
                continue;
            }
            let mut members = component.clone();
            members.sort();
            members.dedup();
            let mut id = cluster_id(&members, None);
            while store.clusters.contains_key(&id) {
                log::warn!("cluster id collision on {id}, salting");
                id = store.next_salted_id(&members);
            }
            for member in &members {
                store.id_to_cluster.insert(member.clone(), id.clone());
            }
            let label = canonical_label(&members);
            let postings = aggregate_postings(&members, postings);
            store.clusters.insert(
                id,
                Cluster {
                    label,
                    members,
                    postings,
                },
            );
        }
        store
    }

    /// Rehydrate from the persisted artifact maps.
    pub fn from_parts(
        clusters: BTreeMap<String, Cluster>,
        id_to_cluster: BTreeMap<String, String>,
    ) -> Self {
        Self {
            clusters,
            id_to_cluster,
            create_counter: 0,
        }
    }

    pub fn get(&self, cluster_id: &str) -> Option<&Cluster> {
        self.clusters.get(cluster_id)
    }

    pub fn cluster_of(&self, identifier: &str) -> Option<&str> {
        self.id_to_cluster.get(identifier).map(String::as_str)
    }

    pub fn clusters(&self) -> &BTreeMap<String, Cluster> {
        &self.clusters
    }

    pub fn id_to_cluster(&self) -> &BTreeMap<String, String> {
        &self.id_to_cluster
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Ordered summary rows, largest cluster first, ties by label.
    pub fn summaries(&self) -> Vec<ClusterSummary> {
        let mut rows: Vec<ClusterSummary> = self
            .clusters
            .iter()
            .map(|(id, cluster)| ClusterSummary {
                id: id.clone(),
                label: cluster.label.clone(),
                size: cluster.members.len(),
                members: cluster.members.clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.label.cmp(&b.label)));
        rows
    }

    /// Per-identifier membership rows, case-insensitively sorted. An
    /// identifier is gold when it is its cluster's current label.
    pub fn identifier_entries(&self, postings: &PostingsIndex) -> Vec<IdentifierEntry> {
        let mut rows: Vec<IdentifierEntry> = self
            .id_to_cluster
            .iter()
            .filter_map(|(identifier, cluster_id)| {
                let cluster = self.clusters.get(cluster_id)?;
                Some(IdentifierEntry {
                    identifier: identifier.clone(),
                    cluster_id: cluster_id.clone(),
                    cluster_label: cluster.label.clone(),
                    gold: *identifier == cluster.label,
                    postings: postings.get(identifier).len(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.identifier
                .to_lowercase()
                .cmp(&b.identifier.to_lowercase())
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        rows
    }

    /// Part ids posted by any member of a cluster, optionally narrowed
    /// to one role, in posting order without repeats. Empty for an
    /// unknown cluster id.
    pub fn cluster_part_ids(&self, cluster_id: &str, role: Option<Role>) -> Vec<String> {
        let Some(cluster) = self.clusters.get(cluster_id) else {
            return Vec::new();
        };
        let mut part_ids = Vec::new();
        for posting in &cluster.postings {
            if role.is_some_and(|r| posting.role != r) {
                continue;
            }
            if !part_ids.contains(&posting.part_id) {
                part_ids.push(posting.part_id.clone());
            }
        }
        part_ids
    }

    /// Postings count per member of a cluster, in member order. Useful
    /// when deciding which member to split off or relabel. Empty for an
    /// unknown cluster id.
    pub fn member_posting_counts(
        &self,
        cluster_id: &str,
        postings: &PostingsIndex,
    ) -> Vec<(String, usize)> {
        let Some(cluster) = self.clusters.get(cluster_id) else {
            return Vec::new();
        };
        cluster
            .members
            .iter()
            .map(|member| (member.clone(), postings.get(member).len()))
            .collect()
    }

    /// Apply one batch of edits in create, move, relabel order, then
    /// drop empty clusters and rebuild every cluster's postings.
    /// Returns the ids of clusters created by create requests.
    pub fn apply(&mut self, batch: &MutationBatch, postings: &PostingsIndex) -> Vec<String> {
        let mut created = Vec::new();

        for request in &batch.creates {
            let mut members: Vec<String> = request
                .members
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            members.sort();
            members.dedup();
            if members.is_empty() {
                continue;
            }
            let id = self.next_salted_id(&members);
            let label = request
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .unwrap_or_else(|| members[0].clone());
            for member in &members {
                self.detach(member);
                self.id_to_cluster.insert(member.clone(), id.clone());
            }
            self.clusters.insert(
                id.clone(),
                Cluster {
                    label,
                    members,
                    postings: Vec::new(),
                },
            );
            created.push(id);
        }

        for request in &batch.moves {
            let identifier = request.identifier.trim();
            let destination = request.to_cluster.trim();
            if identifier.is_empty() || destination.is_empty() {
                continue;
            }
            let Some(current) = self.id_to_cluster.get(identifier).cloned() else {
                log::debug!("move skipped, {identifier:?} is not indexed");
                continue;
            };
            if current == destination {
                continue;
            }
            self.detach(identifier);
            let cluster = self
                .clusters
                .entry(destination.to_string())
                .or_insert_with(|| Cluster {
                    label: identifier.to_string(),
                    members: Vec::new(),
                    postings: Vec::new(),
                });
            if !cluster.members.iter().any(|m| m == identifier) {
                cluster.members.push(identifier.to_string());
                cluster.members.sort();
            }
            self.id_to_cluster
                .insert(identifier.to_string(), destination.to_string());
        }

        for request in &batch.relabels {
            let label = request.label.trim();
            if label.is_empty() {
                continue;
            }
            if let Some(cluster) = self.clusters.get_mut(request.cluster_id.trim()) {
                cluster.label = label.to_string();
            }
        }

        self.purge_empty();
        self.recompute_postings(postings);
        created
    }

    /// Rebuild every cluster's postings from its current members.
    pub fn recompute_postings(&mut self, postings: &PostingsIndex) {
        for cluster in self.clusters.values_mut() {
            cluster.postings = aggregate_postings(&cluster.members, postings);
        }
    }

    fn detach(&mut self, identifier: &str) {
        if let Some(old_id) = self.id_to_cluster.remove(identifier) {
            if let Some(cluster) = self.clusters.get_mut(&old_id) {
                cluster.members.retain(|m| m != identifier);
            }
        }
    }

    fn purge_empty(&mut self) {
        let empty: Vec<String> = self
            .clusters
            .iter()
            .filter(|(_, cluster)| cluster.members.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &empty {
            self.clusters.remove(id);
            log::debug!("purged empty cluster {id}");
        }
        let clusters = &self.clusters;
        self.id_to_cluster
            .retain(|_, cluster_id| clusters.contains_key(cluster_id));
    }

    /// Fresh id for a synthesized cluster. A monotonic counter salts
    /// the member hash and the loop rejects ids already in use, so two
    /// creates over identical member lists get distinct ids.
    fn next_salted_id(&mut self, members: &[String]) -> String {
        loop {
            let id = cluster_id(members, Some(self.create_counter));
            self.create_counter += 1;
            if !self.clusters.contains_key(&id) {
                return id;
            }
        }
    }
}

fn cluster_id(members: &[String], salt: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    if let Some(salt) = salt {
        hasher.update(salt.to_le_bytes());
        hasher.update([0x1f]);
    }
    for member in members {
        hasher.update(member.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

fn aggregate_postings(members: &[String], postings: &PostingsIndex) -> Vec<Posting> {
    let mut merged = BTreeSet::new();
    for member in members {
        for posting in postings.get(member) {
            merged.insert(posting.clone());
        }
    }
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn owned(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn sample_postings() -> PostingsIndex {
        let mut postings = PostingsIndex::new();
        postings.add("Ada Lovelace", "m00000.p0", Role::From);
        postings.add("ada@example.org", "m00000.p0", Role::From);
        postings.add("ada@example.org", "m00001.p0", Role::Recipient);
        postings.add("Grace Hopper", "m00001.p0", Role::From);
        postings.add("grace@navy.example", "m00002.p0", Role::Body);
        postings
    }

    fn sample_store() -> ClusterStore {
        let components = vec![
            owned(&["Ada Lovelace", "ada@example.org"]),
            owned(&["Grace Hopper", "grace@navy.example"]),
        ];
        ClusterStore::from_components(&components, &sample_postings())
    }

    #[test]
    fn component_ids_are_stable_across_runs() {
        let first = sample_store();
        let second = sample_store();
        assert_eq!(first.clusters(), second.clusters());
        assert_eq!(first.id_to_cluster(), second.id_to_cluster());
    }

    #[test]
    fn members_partition_the_universe() {
        let store = sample_store();
        let mut seen = BTreeSet::new();
        for cluster in store.clusters().values() {
            for member in &cluster.members {
                assert!(seen.insert(member.clone()), "{member} appears twice");
            }
        }
        assert_eq!(seen.len(), store.id_to_cluster().len());
    }

    #[test]
    fn labels_prefer_shaped_names() {
        let store = sample_store();
        let ada = store.cluster_of("ada@example.org").expect("cluster");
        assert_eq!(store.get(ada).expect("record").label, "Ada Lovelace");
    }

    #[test]
    fn cluster_postings_union_member_postings() {
        let store = sample_store();
        let postings = sample_postings();
        for cluster in store.clusters().values() {
            let expected = aggregate_postings(&cluster.members, &postings);
            assert_eq!(cluster.postings, expected);
        }
    }

    #[test]
    fn move_to_unknown_identifier_is_a_no_op() {
        let postings = sample_postings();
        let mut store = sample_store();
        let before = store.clusters().clone();
        let batch = MutationBatch {
            moves: vec![MoveRequest {
                identifier: "nobody@example.org".to_string(),
                to_cluster: "cafecafecafe".to_string(),
            }],
            ..MutationBatch::default()
        };
        store.apply(&batch, &postings);
        assert_eq!(store.clusters(), &before);
    }

    #[test]
    fn move_creates_missing_destination_and_purges_empty_source() {
        let postings = sample_postings();
        let mut store = sample_store();
        let grace_cluster = store.cluster_of("Grace Hopper").expect("cluster").to_string();

        let batch = MutationBatch {
            moves: vec![
                MoveRequest {
                    identifier: "Grace Hopper".to_string(),
                    to_cluster: "deadbeef0000".to_string(),
                },
                MoveRequest {
                    identifier: "grace@navy.example".to_string(),
                    to_cluster: "deadbeef0000".to_string(),
                },
            ],
            ..MutationBatch::default()
        };
        store.apply(&batch, &postings);

        assert!(store.get(&grace_cluster).is_none(), "source cluster must be purged");
        let destination = store.get("deadbeef0000").expect("destination");
        assert_eq!(destination.members, owned(&["Grace Hopper", "grace@navy.example"]));
        assert_eq!(destination.label, "Grace Hopper");
        assert_eq!(store.cluster_of("Grace Hopper"), Some("deadbeef0000"));
    }

    #[test]
    fn create_detaches_members_from_their_old_clusters() {
        let postings = sample_postings();
        let mut store = sample_store();
        let batch = MutationBatch {
            creates: vec![CreateRequest {
                members: owned(&["Ada Lovelace", "Grace Hopper"]),
                label: Some("Pioneers".to_string()),
            }],
            ..MutationBatch::default()
        };
        let created = store.apply(&batch, &postings);
        assert_eq!(created.len(), 1);

        let record = store.get(&created[0]).expect("created cluster");
        assert_eq!(record.label, "Pioneers");
        assert_eq!(record.members, owned(&["Ada Lovelace", "Grace Hopper"]));
        assert_ne!(store.cluster_of("ada@example.org"), Some(created[0].as_str()));
    }

    #[test]
    fn create_with_no_members_is_ignored() {
        let postings = sample_postings();
        let mut store = sample_store();
        let before = store.clusters().clone();
        let batch = MutationBatch {
            creates: vec![CreateRequest {
                members: owned(&["", "   "]),
                label: None,
            }],
            ..MutationBatch::default()
        };
        let created = store.apply(&batch, &postings);
        assert!(created.is_empty());
        assert_eq!(store.clusters(), &before);
    }

    #[test]
    fn repeated_creates_over_the_same_members_get_distinct_ids() {
        let postings = PostingsIndex::new();
        let mut store = ClusterStore::default();
        let batch = MutationBatch {
            creates: vec![CreateRequest {
                members: owned(&["solo@example.org"]),
                label: None,
            }],
            ..MutationBatch::default()
        };
        let first = store.apply(&batch, &postings);
        let second = store.apply(&batch, &postings);
        // The second create steals the member, so the first cluster
        // empties out and is purged.
        assert_ne!(first, second);
        assert!(store.get(&first[0]).is_none());
        assert!(store.get(&second[0]).is_some());
    }

    #[test]
    fn relabel_touches_existing_clusters_only() {
        let postings = sample_postings();
        let mut store = sample_store();
        let ada = store.cluster_of("Ada Lovelace").expect("cluster").to_string();
        let batch = MutationBatch {
            relabels: vec![
                RelabelRequest {
                    cluster_id: ada.clone(),
                    label: "Countess of Lovelace".to_string(),
                },
                RelabelRequest {
                    cluster_id: "missing000000".to_string(),
                    label: "Ghost".to_string(),
                },
            ],
            ..MutationBatch::default()
        };
        store.apply(&batch, &postings);
        assert_eq!(store.get(&ada).expect("record").label, "Countess of Lovelace");
        assert!(store.get("missing000000").is_none());
    }

    #[test]
    fn no_empty_clusters_survive_a_batch() {
        let postings = sample_postings();
        let mut store = sample_store();
        let batch = MutationBatch {
            creates: vec![CreateRequest {
                members: owned(&["Ada Lovelace", "ada@example.org"]),
                label: None,
            }],
            ..MutationBatch::default()
        };
        store.apply(&batch, &postings);
        for (id, cluster) in store.clusters() {
            assert!(!cluster.members.is_empty(), "cluster {id} is empty");
        }
    }

    #[test]
    fn summaries_sort_by_size_then_label() {
        let components = vec![
            owned(&["a@example.org"]),
            owned(&["Bob Tran", "bob@example.org", "tran@example.org"]),
            owned(&["Cara Voss"]),
        ];
        let store = ClusterStore::from_components(&components, &PostingsIndex::new());
        let rows = store.summaries();
        assert_eq!(rows[0].label, "Bob Tran");
        assert_eq!(rows[0].size, 3);
        assert_eq!(rows[1].size, 1);
        assert!(rows[1].label <= rows[2].label);
    }

    #[test]
    fn identifier_entries_flag_gold_labels() {
        let postings = sample_postings();
        let store = sample_store();
        let rows = store.identifier_entries(&postings);
        let ada = rows
            .iter()
            .find(|row| row.identifier == "Ada Lovelace")
            .expect("row");
        assert!(ada.gold);
        assert_eq!(ada.postings, 1);
        let address = rows
            .iter()
            .find(|row| row.identifier == "ada@example.org")
            .expect("row");
        assert!(!address.gold);
        assert_eq!(address.postings, 2);
    }

    #[test]
    fn part_ids_can_be_narrowed_by_role() {
        let postings = sample_postings();
        let store = sample_store();
        let ada = store.cluster_of("Ada Lovelace").expect("cluster");
        let all = store.cluster_part_ids(ada, None);
        assert_eq!(all, owned(&["m00000.p0", "m00001.p0"]));
        let from_only = store.cluster_part_ids(ada, Some(Role::From));
        assert_eq!(from_only, owned(&["m00000.p0"]));
        assert!(store.cluster_part_ids("missing000000", None).is_empty());
    }

    #[test]
    fn member_posting_counts_follow_member_order() {
        let postings = sample_postings();
        let store = sample_store();
        let ada = store.cluster_of("Ada Lovelace").expect("cluster");
        let counts = store.member_posting_counts(ada, &postings);
        assert_eq!(
            counts,
            vec![
                ("Ada Lovelace".to_string(), 1),
                ("ada@example.org".to_string(), 2),
            ]
        );
        assert!(store.member_posting_counts("missing000000", &postings).is_empty());
    }
}
