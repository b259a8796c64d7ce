// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured and graded item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub item_id: String,
    pub grade: Grade,
    pub length_mm: f64,
    pub diameter_mm: f64,
    pub defects: Vec<String>,
    /// 0.0 ..= 1.0
    pub confidence: f64,
}

impl GradeRecord {
    pub fn new(grade: Grade, length_mm: f64, diameter_mm: f64) -> Self {
        Self {
            item_id: String::new(),
            grade,
            length_mm,
            diameter_mm,
            defects: Vec::new(),
            confidence: 1.0,
        }
    }

    pub fn with_defects<I, S>(mut self, defects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defects = defects.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GradingError {
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("grading algorithm fault: {0}")]
    AlgorithmFault(String),
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),
}

/// Grading capability: image bytes in, graded record out
///
/// Treated as pure by the pipeline; implementations must not retain the
/// image.
pub trait Grader: Send + Sync {
    fn grade(&self, image: &[u8]) -> Result<GradeRecord, GradingError>;
}

/// Adapts a closure into a [`Grader`]
pub struct FnGrader<F>(pub F);

impl<F> Grader for FnGrader<F>
where
    F: Fn(&[u8]) -> Result<GradeRecord, GradingError> + Send + Sync,
{
    fn grade(&self, image: &[u8]) -> Result<GradeRecord, GradingError> {
        (self.0)(image)
    }
}
