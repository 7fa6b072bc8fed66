//! Emotional vectors and the affect space that fixes their shape
//!
//! Every vector that enters the core is built through [`AffectSpace`], which
//! checks length and finiteness and clamps components into [0, 1]. Code
//! past that boundary assumes the shape holds.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default affect inventory, in vector order.
pub const DEFAULT_LABELS: [&str; 8] = [
    "anger",
    "joy",
    "trust",
    "fear",
    "surprise",
    "sadness",
    "disgust",
    "anticipation",
];

/// A fixed-length emotional vector with components in [0, 1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionVector(Vec<f64>);

impl EmotionVector {
    pub fn zeros(dims: usize) -> Self {
        Self(vec![0.0; dims])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn norm(&self) -> f64 {
        self.0.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Cosine similarity. A zero vector is similar to nothing.
    pub fn cosine(&self, other: &EmotionVector) -> f64 {
        if self.len() != other.len() {
            return 0.0;
        }
        let (na, nb) = (self.norm(), other.norm());
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        let dot: f64 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }

    /// Index of the largest component; the first one wins ties.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, v) in self.0.iter().enumerate() {
            match best {
                Some((_, b)) if *v <= b => {}
                _ => best = Some((i, *v)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Component indices sorted by descending weight, ties by index.
    pub fn ranked(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.0.len()).collect();
        idx.sort_by(|a, b| {
            self.0[*b]
                .partial_cmp(&self.0[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        idx
    }

    /// Arithmetic mean of equally shaped vectors. `None` when `vectors` is empty.
    pub fn mean<'a>(vectors: impl IntoIterator<Item = &'a EmotionVector>) -> Option<EmotionVector> {
        let mut sum: Option<Vec<f64>> = None;
        let mut count = 0usize;
        for v in vectors {
            let acc = sum.get_or_insert_with(|| vec![0.0; v.len()]);
            for (a, x) in acc.iter_mut().zip(&v.0) {
                *a += x;
            }
            count += 1;
        }
        sum.map(|s| EmotionVector(s.into_iter().map(|x| x / count as f64).collect()))
    }
}

/// The agreed affect inventory. Fixes the vector length for the process lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct AffectSpace {
    labels: Arc<[String]>,
}

impl Default for AffectSpace {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|_| unreachable!("default labels are unique and non-empty"))
    }
}

impl AffectSpace {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::invalid_input("affect space needs at least one label"));
        }
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(Error::invalid_input(format!("label {} is blank", i)));
            }
            if labels[..i].contains(label) {
                return Err(Error::invalid_input(format!("duplicate label: {}", label)));
            }
        }
        Ok(Self {
            labels: labels.into(),
        })
    }

    pub fn dims(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|s| s.as_str())
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn zeros(&self) -> EmotionVector {
        EmotionVector::zeros(self.dims())
    }

    /// Validate and clamp raw components into a vector of this space.
    pub fn vector(&self, values: Vec<f64>) -> Result<EmotionVector> {
        if values.len() != self.dims() {
            return Err(Error::shape(self.dims(), values.len()));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::invalid_input(format!("component {} is not finite", i)));
        }
        Ok(EmotionVector(
            values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        ))
    }

    /// Check a vector that was built elsewhere (deserialized, proposed by an oracle).
    pub fn check(&self, vector: &EmotionVector) -> Result<()> {
        if vector.len() != self.dims() {
            return Err(Error::shape(self.dims(), vector.len()));
        }
        if !vector.is_finite() {
            return Err(Error::invalid_input("vector has non-finite components"));
        }
        Ok(())
    }

    /// Labels of the `n` heaviest non-zero components.
    pub fn top_labels(&self, vector: &EmotionVector, n: usize) -> Vec<String> {
        vector
            .ranked()
            .into_iter()
            .filter(|i| vector.get(*i) > 0.0)
            .take(n)
            .filter_map(|i| self.label(i).map(String::from))
            .collect()
    }
}
