use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of reference points that define the board quadrilateral.
pub const CORNER_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    #[default]
    Unknown,
    Idle,
    Training,
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Training => "training",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Player {
    #[default]
    White,
    Black,
}

impl Player {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// YOLO dataset layout, 12 piece classes.
    #[default]
    ObjectDetection,
    /// VGG16 over per-square crops named `type_piececolor_squarecolor_n`.
    ImageClassification,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectDetection => "object_detection",
            Self::ImageClassification => "image_classification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the trained model a prediction is routed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContext {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
}

impl ModelContext {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            model_type: Some(model_type.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CornerPoint {
    pub x: f64,
    pub y: f64,
    pub x_percent: f64,
    pub y_percent: f64,
}

/// Exactly four corners, in the order they were marked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CornerSet([CornerPoint; CORNER_COUNT]);

impl CornerSet {
    pub fn new(points: [CornerPoint; CORNER_COUNT]) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[CornerPoint; CORNER_COUNT] {
        &self.0
    }

    pub fn len(&self) -> usize {
        CORNER_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<Vec<CornerPoint>> for CornerSet {
    type Error = ValidationError;

    fn try_from(points: Vec<CornerPoint>) -> Result<Self, Self::Error> {
        let count = points.len();
        let points: [CornerPoint; CORNER_COUNT] = points
            .try_into()
            .map_err(|_| ValidationError::IncompleteCornerSet { count })?;
        Ok(Self(points))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.model_type.to_uppercase(), self.name)
    }
}
