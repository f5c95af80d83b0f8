use std::collections::BTreeMap;

use shared::{domain::TaskType, protocol::PredictExtraData};

/// One file of a dataset directory, addressed the way a browser folder
/// upload would: `<dataset-dir>/<relative path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingUpload {
    pub name: String,
    pub task_type: TaskType,
    pub files: Vec<DatasetFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionPayload {
    pub image: ImageFile,
    pub extra: PredictExtraData,
}

/// Training-result images of one model, decoded from base64.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelImages {
    pub images: BTreeMap<String, Vec<u8>>,
}
