//! Identity resolution for email archives.
//!
//! Resolves the many textual forms a person appears under (display
//! names, nicknames, email aliases, header artifacts) into stable
//! clusters:
//!
//! ```text
//! identifiers
//!     ↓ blocking          candidate pairs from shared bucket keys
//!     ↓ features          fixed-order numeric vector per pair
//!     ↓ classifier        trained model, probability per pair
//!     ↓ guardrails        structural veto on accepted pairs
//!     ↓ graph             forced header edges + accepted edges
//!     ↓ components        deterministic clusters + gold labels
//! ```
//!
//! The crate is synchronous and pure: no I/O besides model artifact
//! load/save, no global state.

pub mod blocking;
pub mod engine;
pub mod error;
pub mod features;
pub mod graph;
pub mod guardrail;
pub mod model;
pub mod name;
pub mod nickname;
pub mod normalize;

pub use engine::{canonical_label, split_single_address, IdentityEngine, DEFAULT_THRESHOLD};
pub use error::{IdentityError, Result};
pub use features::{FeatureExtractor, FeatureVector, FEATURE_COUNT};
pub use graph::IdentityGraph;
pub use model::{
    fit_logistic, LogisticModel, MatchModel, MatchScorer, TrainingOptions, TreeEnsembleModel,
    MODEL_ARTIFACT_VERSION,
};
pub use name::{HeuristicNames, NameDecomposer, ParsedName};
