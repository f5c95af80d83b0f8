use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{CornerSet, ModelSummary, Player},
    error::ProtocolError,
};

/// Push-channel event name carrying training progress.
pub const TRAINING_UPDATE_EVENT: &str = "training_update";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub training_running: bool,
}

/// One frame on the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Raw `training_update` payload as sent by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl TrainingUpdate {
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            output: Some(Value::String(text.into())),
            ..Self::default()
        }
    }

    pub fn metric(model_type: impl Into<String>, fields: Value) -> Self {
        Self {
            output: Some(fields),
            model_type: Some(model_type.into()),
            done: None,
        }
    }

    pub fn finished(mut self) -> Self {
        self.done = Some(true);
        self
    }
}

/// Metric fields arrive either as strings or as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Text(String),
    Number(serde_json::Number),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Text(text) => text.trim().parse().ok(),
            Self::Number(number) => number.as_f64(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Per-epoch VGG16 statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub epoch: MetricValue,
    pub accuracy: MetricValue,
    pub loss: MetricValue,
}

/// Per-iteration YOLO statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub epoch: MetricValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_mem: Option<MetricValue>,
    pub box_loss: MetricValue,
    pub cls_loss: MetricValue,
    pub dfl_loss: MetricValue,
    pub instances: MetricValue,
    pub progress: MetricValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<MetricValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricPayload {
    Classification(ClassificationMetrics),
    Detection(DetectionMetrics),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutput {
    None,
    Line(String),
    Metric(MetricPayload),
    /// A known variant whose fields did not parse; the raw JSON is kept.
    Malformed { raw: String, error: ProtocolError },
    Unrecognized(ProtocolError),
}

/// A decoded `training_update`. Decoding never fails; bad shapes land in
/// [`EventOutput::Malformed`] or [`EventOutput::Unrecognized`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingEvent {
    pub output: EventOutput,
    pub done: bool,
}

impl From<TrainingUpdate> for TrainingEvent {
    fn from(update: TrainingUpdate) -> Self {
        let done = update.done.unwrap_or(false);
        let output = match update.output {
            None | Some(Value::Null) => EventOutput::None,
            Some(Value::String(text)) => EventOutput::Line(text),
            Some(fields @ Value::Object(_)) => decode_metric(update.model_type, fields),
            Some(other) => {
                EventOutput::Unrecognized(ProtocolError::UnexpectedOutput(other.to_string()))
            }
        };
        Self { output, done }
    }
}

fn decode_metric(model_type: Option<String>, fields: Value) -> EventOutput {
    let raw = fields.to_string();
    let decoded = match model_type.as_deref() {
        Some("vgg16") => {
            serde_json::from_value(fields).map(MetricPayload::Classification)
        }
        Some("yolo") => serde_json::from_value(fields).map(MetricPayload::Detection),
        _ => {
            return EventOutput::Unrecognized(ProtocolError::UnknownVariant {
                variant: model_type,
            })
        }
    };
    match decoded {
        Ok(metric) => EventOutput::Metric(metric),
        Err(err) => EventOutput::Malformed {
            raw,
            error: ProtocolError::UnexpectedOutput(err.to_string()),
        },
    }
}

/// JSON metadata sent next to the image in `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictExtraData {
    pub player: Player,
    pub corners: Option<CornerSet>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub model_list: Vec<ModelSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDataResponse {
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}
