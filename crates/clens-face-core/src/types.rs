use std::fmt;

use serde::{Deserialize, Serialize};

/// Face embedding vector produced by a recognition backend (e.g. 512 values for Facenet512).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Squared L2 norm.
    pub fn norm_squared(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum()
    }

    /// True when every component is zero. A zero vector never matches anything.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Index of the first NaN or infinite component, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_finite())
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Identifier of the subject (student) that owns a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SubjectId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Encrypted, storage-ready form of an embedding.
///
/// Opaque printable text (URL-safe base64). The caller persists it in the
/// subject record's single nullable face field; absence means "no face on file".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedTemplate(String);

impl EncryptedTemplate {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Keep template bodies out of logs.
impl fmt::Debug for EncryptedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedTemplate({} chars)", self.0.len())
    }
}

impl From<String> for EncryptedTemplate {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// One stored template offered to the duplicate scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub subject_id: SubjectId,
    pub template: EncryptedTemplate,
}

impl Candidate {
    pub fn new(subject_id: impl Into<SubjectId>, template: EncryptedTemplate) -> Self {
        Self {
            subject_id: subject_id.into(),
            template,
        }
    }
}

/// Similarity between two embeddings in [0.0, 1.0]; 1.0 is identical.
///
/// Computed fresh on every comparison and never stored.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct SimilarityScore(f64);

impl SimilarityScore {
    pub const MIN: SimilarityScore = SimilarityScore(0.0);
    pub const MAX: SimilarityScore = SimilarityScore(1.0);

    /// Clamp into [0, 1]. NaN maps to 0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for SimilarityScore {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<SimilarityScore> for f64 {
    fn from(score: SimilarityScore) -> Self {
        score.0
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Minimum similarity considered "same person". Process-wide, not per subject.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MatchThreshold(f64);

impl MatchThreshold {
    pub const DEFAULT_VALUE: f64 = 0.80;

    /// Returns `None` unless `value` lies in [0, 1].
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self(Self::DEFAULT_VALUE)
    }
}

impl TryFrom<f64> for MatchThreshold {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("threshold {value} outside [0, 1]"))
    }
}

impl From<MatchThreshold> for f64 {
    fn from(threshold: MatchThreshold) -> Self {
        threshold.0
    }
}

/// Outcome of verifying a probe image against one stored template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub matched: bool,
    pub score: SimilarityScore,
}

/// A stored template whose similarity to the probe met the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub subject_id: SubjectId,
    pub score: SimilarityScore,
}
