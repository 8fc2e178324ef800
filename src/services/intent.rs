//! Naive-Bayes destination classifier for free-text phrases
//!
//! The trained artifact carries smoothed log-probabilities; inference only
//! sums them. A model must be installed before `predict` answers.

use crate::domain::types::LocationId;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Artifact validation errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model JSON is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model has no classes")]
    NoClasses,
    #[error("class '{0}' appears more than once")]
    DuplicateClass(String),
    #[error("expected {expected} priors, found {found}")]
    PriorsLength { expected: usize, found: usize },
    #[error("expected {expected} feature rows, found {found}")]
    FeatureRows { expected: usize, found: usize },
    #[error("feature row for class {class} has {found} columns, expected {expected}")]
    FeatureRowWidth { class: usize, expected: usize, found: usize },
    #[error("token '{token}' maps to feature {index} but rows have {features} columns")]
    IndexOutOfRange { token: String, index: usize, features: usize },
    #[error("{0} contains NaN or +inf")]
    NonFinite(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("classifier model not loaded")]
    NotReady,
}

/// Loosely-typed artifact as published by the trainer
#[derive(Debug, Deserialize)]
struct RawModel {
    vocabulary: HashMap<String, usize>,
    classes: Vec<String>,
    priors: Vec<f64>,
    #[serde(rename = "featureLogProbs", alias = "feature_log_probs")]
    feature_log_probs: Vec<Vec<f64>>,
}

/// Validated model: every vector and matrix has the right shape
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    vocabulary: FxHashMap<String, usize>,
    classes: Vec<LocationId>,
    priors: Vec<f64>,
    feature_log_probs: Vec<Vec<f64>>,
}

fn invalid(v: f64) -> bool {
    v.is_nan() || v == f64::INFINITY
}

impl ClassifierModel {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let raw: RawModel = serde_json::from_str(json)?;
        Self::validate(raw)
    }

    fn validate(raw: RawModel) -> Result<Self, ModelError> {
        let n_classes = raw.classes.len();
        if n_classes == 0 {
            return Err(ModelError::NoClasses);
        }
        for (i, class) in raw.classes.iter().enumerate() {
            if raw.classes[..i].contains(class) {
                return Err(ModelError::DuplicateClass(class.clone()));
            }
        }
        if raw.priors.len() != n_classes {
            return Err(ModelError::PriorsLength { expected: n_classes, found: raw.priors.len() });
        }
        if raw.feature_log_probs.len() != n_classes {
            return Err(ModelError::FeatureRows {
                expected: n_classes,
                found: raw.feature_log_probs.len(),
            });
        }

        let n_features = raw.feature_log_probs[0].len();
        for (class, row) in raw.feature_log_probs.iter().enumerate() {
            if row.len() != n_features {
                return Err(ModelError::FeatureRowWidth { class, expected: n_features, found: row.len() });
            }
            if row.iter().copied().any(invalid) {
                return Err(ModelError::NonFinite("featureLogProbs"));
            }
        }
        if raw.priors.iter().copied().any(invalid) {
            return Err(ModelError::NonFinite("priors"));
        }
        for (token, &index) in &raw.vocabulary {
            if index >= n_features {
                return Err(ModelError::IndexOutOfRange {
                    token: token.clone(),
                    index,
                    features: n_features,
                });
            }
        }

        Ok(Self {
            vocabulary: raw.vocabulary.into_iter().collect(),
            classes: raw.classes.into_iter().map(LocationId).collect(),
            priors: raw.priors,
            feature_log_probs: raw.feature_log_probs,
        })
    }

    pub fn classes(&self) -> &[LocationId] {
        &self.classes
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Lowercase, keep ASCII word characters and whitespace, drop 1-char tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().filter(|t| t.chars().count() > 1).map(str::to_string).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: LocationId,
    pub score: f64,
    /// Tokens found in the vocabulary; zero means the priors alone decided
    pub matched_tokens: usize,
}

impl Prediction {
    pub fn is_unsure(&self) -> bool {
        self.matched_tokens == 0
    }
}

#[derive(Debug, Default)]
pub struct IntentClassifier {
    model: Option<ClassifierModel>,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: ClassifierModel) -> Self {
        Self { model: Some(model) }
    }

    /// Replace the active model
    pub fn install(&mut self, model: ClassifierModel) {
        self.model = Some(model);
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&ClassifierModel> {
        self.model.as_ref()
    }

    pub fn predict(&self, text: &str) -> Result<Prediction, ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotReady)?;

        let mut scores = model.priors.clone();
        let mut matched_tokens = 0;
        for token in tokenize(text) {
            let Some(&feature) = model.vocabulary.get(&token) else { continue };
            matched_tokens += 1;
            for (score, row) in scores.iter_mut().zip(&model.feature_log_probs) {
                *score += row[feature];
            }
        }

        // stable scan: the first maximal class wins ties
        let mut best = 0;
        for (i, &score) in scores.iter().enumerate().skip(1) {
            if score > scores[best] {
                best = i;
            }
        }

        Ok(Prediction { class: model.classes[best].clone(), score: scores[best], matched_tokens })
    }
}
