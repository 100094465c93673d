//! Match classifier: scoring contract, artifact format and training.
//!
//! The clustering engine only depends on the [`MatchScorer`] contract
//! (features in, probability out). Two concrete families are provided
//! behind a versioned JSON artifact so a trained model survives process
//! restarts and can be swapped without touching the engine:
//!
//! ```text
//! {"version": 1, "family": "logistic", "weights": [...], "bias": -3.1, "trained": true}
//! {"version": 1, "family": "tree_ensemble", "trees": [[...]], "trained": true}
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{IdentityError, Result};
use crate::features::{FeatureExtractor, FeatureVector, FEATURE_COUNT};
use crate::normalize::normalize;

/// Artifact format version accepted by [`MatchModel::load`].
pub const MODEL_ARTIFACT_VERSION: u32 = 1;

/// Pairwise match scoring contract: a feature vector in, a match
/// probability in [0, 1] out.
///
/// Implementations must return [`IdentityError::ModelNotTrained`] when
/// scored before training or loading an artifact.
pub trait MatchScorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> Result<f64>;
}

/// Binary logistic model over the fixed feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default)]
    pub trained: bool,
}

impl LogisticModel {
    /// Placeholder model that refuses to score until fit.
    pub fn untrained() -> Self {
        Self {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
            trained: false,
        }
    }
}

impl MatchScorer for LogisticModel {
    fn score(&self, features: &FeatureVector) -> Result<f64> {
        if !self.trained {
            return Err(IdentityError::ModelNotTrained);
        }
        if self.weights.len() != FEATURE_COUNT {
            return Err(IdentityError::FeatureArity {
                expected: FEATURE_COUNT,
                got: self.weights.len(),
            });
        }
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(features.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        Ok(sigmoid(z))
    }
}

/// One node of a binary decision tree stored as a flat array.
///
/// Internal nodes route on `features[feature] < threshold`; leaves are
/// marked by `left < 0` and carry a probability in `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
}

/// Averaged ensemble of flat-array decision trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsembleModel {
    pub trees: Vec<Vec<TreeNode>>,
    #[serde(default)]
    pub trained: bool,
}

impl MatchScorer for TreeEnsembleModel {
    fn score(&self, features: &FeatureVector) -> Result<f64> {
        if !self.trained || self.trees.is_empty() {
            return Err(IdentityError::ModelNotTrained);
        }
        let mut total = 0.0;
        for tree in &self.trees {
            total += walk_tree(tree, features)?;
        }
        Ok((total / self.trees.len() as f64).clamp(0.0, 1.0))
    }
}

fn walk_tree(tree: &[TreeNode], features: &FeatureVector) -> Result<f64> {
    let mut index = 0usize;
    // A well-formed tree reaches a leaf in at most node-count steps.
    for _ in 0..=tree.len() {
        let node = tree
            .get(index)
            .ok_or_else(|| IdentityError::MalformedModel(format!("node index {index} out of range")))?;
        if node.left < 0 {
            return Ok(node.value.clamp(0.0, 1.0));
        }
        if node.feature >= FEATURE_COUNT {
            return Err(IdentityError::MalformedModel(format!(
                "split on unknown feature {}",
                node.feature
            )));
        }
        let next = if features[node.feature] < node.threshold {
            node.left
        } else {
            node.right
        };
        if next < 0 {
            return Err(IdentityError::MalformedModel(
                "internal node with a negative child".to_string(),
            ));
        }
        index = next as usize;
    }
    Err(IdentityError::MalformedModel(
        "tree walk did not terminate".to_string(),
    ))
}

/// A loaded classifier of either supported family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum MatchModel {
    Logistic(LogisticModel),
    TreeEnsemble(TreeEnsembleModel),
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    version: u32,
    #[serde(flatten)]
    model: MatchModel,
}

impl MatchModel {
    /// Untrained logistic placeholder.
    pub fn untrained() -> Self {
        MatchModel::Logistic(LogisticModel::untrained())
    }

    pub fn is_trained(&self) -> bool {
        match self {
            MatchModel::Logistic(m) => m.trained,
            MatchModel::TreeEnsemble(m) => m.trained && !m.trees.is_empty(),
        }
    }

    /// Read a versioned artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        if artifact.version != MODEL_ARTIFACT_VERSION {
            return Err(IdentityError::UnsupportedModelVersion {
                found: artifact.version,
                expected: MODEL_ARTIFACT_VERSION,
            });
        }
        Ok(artifact.model)
    }

    /// Write a versioned artifact, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let artifact = ModelArtifact {
            version: MODEL_ARTIFACT_VERSION,
            model: self.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&artifact)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl MatchScorer for MatchModel {
    fn score(&self, features: &FeatureVector) -> Result<f64> {
        match self {
            MatchModel::Logistic(m) => m.score(features),
            MatchModel::TreeEnsemble(m) => m.score(features),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Knobs for [`fit_logistic`]. Defaults mirror the documented training
/// contract: a window of 20 over length-sorted identifiers, two sampled
/// negatives per anchor, a fixed seed.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub window: usize,
    pub negatives_per_anchor: usize,
    pub seed: u64,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            window: 20,
            negatives_per_anchor: 2,
            seed: 7,
            epochs: 300,
            learning_rate: 0.5,
        }
    }
}

/// Fit a logistic model on ground-truth clusters.
///
/// Positives are all within-cluster pairs. Negatives are cross-cluster
/// pairs drawn from a sliding window over identifiers sorted by
/// normalized length, shuffled by a seeded hash so runs are reproducible
/// with no random-number state.
pub fn fit_logistic(
    extractor: &mut FeatureExtractor,
    clusters: &[Vec<String>],
    opts: &TrainingOptions,
) -> Result<LogisticModel> {
    let (features, labels) = labelled_pairs(extractor, clusters, opts);
    if features.is_empty() {
        return Err(IdentityError::EmptyTrainingSet);
    }
    let positives = labels.iter().filter(|&&y| y).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(IdentityError::EmptyTrainingSet);
    }
    // Balanced class weights keep the abundant negatives from drowning
    // out the positive gradient.
    let total = labels.len() as f64;
    let w_pos = total / (2.0 * positives as f64);
    let w_neg = total / (2.0 * negatives as f64);

    let mut weights = vec![0.0; FEATURE_COUNT];
    let mut bias = 0.0;
    for _ in 0..opts.epochs {
        let mut grad_w = vec![0.0; FEATURE_COUNT];
        let mut grad_b = 0.0;
        for (x, &y) in features.iter().zip(labels.iter()) {
            let p = sigmoid(bias + dot(&weights, x));
            let target = if y { 1.0 } else { 0.0 };
            let class_weight = if y { w_pos } else { w_neg };
            let err = (p - target) * class_weight;
            for (g, xi) in grad_w.iter_mut().zip(x.iter()) {
                *g += err * xi;
            }
            grad_b += err;
        }
        let step = opts.learning_rate / total;
        for (w, g) in weights.iter_mut().zip(grad_w.iter()) {
            *w -= step * g;
        }
        bias -= step * grad_b;
    }
    log::info!(
        "fit logistic model on {} pairs ({positives} positive, {negatives} negative)",
        labels.len()
    );
    Ok(LogisticModel {
        weights,
        bias,
        trained: true,
    })
}

fn dot(weights: &[f64], features: &FeatureVector) -> f64 {
    weights.iter().zip(features.iter()).map(|(w, x)| w * x).sum()
}

fn labelled_pairs(
    extractor: &mut FeatureExtractor,
    clusters: &[Vec<String>],
    opts: &TrainingOptions,
) -> (Vec<FeatureVector>, Vec<bool>) {
    let mut features = Vec::new();
    let mut labels = Vec::new();

    for cluster in clusters {
        for (i, a) in cluster.iter().enumerate() {
            for b in &cluster[i + 1..] {
                features.push(extractor.features(a, b));
                labels.push(true);
            }
        }
    }

    // Deduplicated universe, stably ordered by normalized length so the
    // negative window pairs strings of comparable shape.
    let mut universe: Vec<String> = Vec::new();
    let mut owner: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for (cluster_index, cluster) in clusters.iter().enumerate() {
        for member in cluster {
            if !owner.contains_key(member) {
                owner.insert(member.clone(), cluster_index);
                universe.push(member.clone());
            }
        }
    }
    universe.sort_by(|a, b| {
        let la = normalize(a).chars().count();
        let lb = normalize(b).chars().count();
        la.cmp(&lb).then_with(|| a.cmp(b))
    });

    for (anchor_index, anchor) in universe.iter().enumerate() {
        let lo = anchor_index.saturating_sub(opts.window);
        let hi = (anchor_index + opts.window + 1).min(universe.len());
        let mut candidates: Vec<&String> = universe[lo..hi]
            .iter()
            .filter(|other| owner.get(*other) != owner.get(anchor))
            .collect();
        candidates.sort_by_key(|candidate| shuffle_key(opts.seed, anchor, candidate));
        for other in candidates.into_iter().take(opts.negatives_per_anchor) {
            features.push(extractor.features(anchor, other));
            labels.push(false);
        }
    }

    (features, labels)
}

/// Seeded stand-in for a shuffle: sorting candidates by this key is
/// deterministic across runs and platforms.
fn shuffle_key(seed: u64, anchor: &str, candidate: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(anchor.as_bytes());
    hasher.update([0u8]);
    hasher.update(candidate.as_bytes());
    hasher.finalize().into()
}
