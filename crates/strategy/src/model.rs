use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use common::{Error, Result};

use crate::features::FeatureSet;

#[derive(Debug, Error, PartialEq)]
pub enum InferenceError {
    #[error("expected {expected} features, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("tree {tree} references missing node {node}")]
    MissingNode { tree: usize, node: usize },

    #[error("tree {tree} does not reach a leaf")]
    Unterminated { tree: usize },

    #[error("model produced a non-finite probability ({0})")]
    NonFinite(f64),

    #[error("{0}")]
    Other(String),
}

/// A trained classifier returning the probability that the next close is
/// higher than the current one.
pub trait ProbabilityModel: Send {
    fn predict_proba(&self, features: &[f64]) -> Result<f64, InferenceError>;
}

/// One node of a binary regression tree. Samples with
/// `features[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Node 0 is the root.
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn score(&self, index: usize, features: &[f64]) -> Result<f64, InferenceError> {
        let mut node = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(node) {
                None => return Err(InferenceError::MissingNode { tree: index, node }),
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = features.get(*feature).copied().ok_or_else(|| {
                        InferenceError::Other(format!(
                            "tree {index} splits on feature {feature} of {}",
                            features.len()
                        ))
                    })?;
                    node = if x <= *threshold { *left } else { *right };
                }
            }
        }
        Err(InferenceError::Unterminated { tree: index })
    }
}

/// Serialized model produced by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    /// Additive tree ensemble whose raw score passes through a sigmoid.
    TreeEnsemble {
        #[serde(default)]
        base_score: f64,
        trees: Vec<Tree>,
    },
}

impl ModelArtifact {
    fn input_width(&self) -> Option<usize> {
        match self {
            ModelArtifact::Logistic { coefficients, .. } => Some(coefficients.len()),
            ModelArtifact::TreeEnsemble { .. } => None,
        }
    }
}

impl ProbabilityModel for ModelArtifact {
    fn predict_proba(&self, features: &[f64]) -> Result<f64, InferenceError> {
        let raw = match self {
            ModelArtifact::Logistic {
                intercept,
                coefficients,
            } => {
                if coefficients.len() != features.len() {
                    return Err(InferenceError::FeatureCount {
                        expected: coefficients.len(),
                        got: features.len(),
                    });
                }
                intercept
                    + coefficients
                        .iter()
                        .zip(features)
                        .map(|(w, x)| w * x)
                        .sum::<f64>()
            }
            ModelArtifact::TreeEnsemble { base_score, trees } => {
                let mut total = *base_score;
                for (i, tree) in trees.iter().enumerate() {
                    total += tree.score(i, features)?;
                }
                total
            }
        };
        let p = sigmoid(raw);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(InferenceError::NonFinite(p))
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A model artifact together with the feature list it was trained on.
pub struct LoadedModel {
    pub name: String,
    pub model: Box<dyn ProbabilityModel>,
    pub features: FeatureSet,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("features", &self.features.names())
            .finish()
    }
}

impl LoadedModel {
    pub fn artifact_path(models_dir: &Path, name: &str) -> PathBuf {
        models_dir.join(format!("{name}.json"))
    }

    pub fn features_path(models_dir: &Path, name: &str) -> PathBuf {
        models_dir.join(format!("{name}_features.json"))
    }

    /// Load `<name>.json` and `<name>_features.json` from `models_dir`.
    ///
    /// `Ok(None)` when either file is absent (no trained model available);
    /// an error when the files exist but cannot be used.
    pub fn load(models_dir: &Path, name: &str) -> Result<Option<Self>> {
        let artifact_path = Self::artifact_path(models_dir, name);
        let features_path = Self::features_path(models_dir, name);

        let Some(artifact_raw) = read_optional(&artifact_path)? else {
            return Ok(None);
        };
        let Some(features_raw) = read_optional(&features_path)? else {
            return Ok(None);
        };

        let artifact: ModelArtifact = serde_json::from_str(&artifact_raw).map_err(|e| {
            Error::Config(format!("invalid model artifact {}: {e}", artifact_path.display()))
        })?;
        let names: Vec<String> = serde_json::from_str(&features_raw).map_err(|e| {
            Error::Config(format!("invalid feature list {}: {e}", features_path.display()))
        })?;
        let features = FeatureSet::from_names(&names).map_err(Error::Config)?;

        if let Some(width) = artifact.input_width() {
            if width != features.len() {
                return Err(Error::Config(format!(
                    "model {name} expects {width} inputs but lists {} features",
                    features.len()
                )));
            }
        }

        info!(model = name, features = ?features.names(), "Loaded trained model");
        Ok(Some(Self {
            name: name.to_string(),
            model: Box::new(artifact),
            features,
        }))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}
