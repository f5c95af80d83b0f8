use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use shared::{
    domain::ModelSummary,
    error::TransportError,
    protocol::{PredictResponse, StatusResponse},
};

use crate::{
    types::{ModelImages, PredictionPayload, TrainingUpload},
    TrainingService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceCall {
    Status,
    StartTraining,
    StopTraining,
    Predict,
    ListModels,
    ModelData,
}

/// Scripted `TrainingService` that records every call it receives.
pub(crate) struct RecordingService {
    status: Mutex<Result<StatusResponse, TransportError>>,
    start_result: Result<(), TransportError>,
    stop_result: Result<(), TransportError>,
    predict_result: Result<PredictResponse, TransportError>,
    calls: Mutex<Vec<ServiceCall>>,
    uploads: Mutex<Vec<TrainingUpload>>,
    predictions: Mutex<Vec<PredictionPayload>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingService {
    fn with_status(status: Result<StatusResponse, TransportError>) -> Self {
        Self {
            status: Mutex::new(status),
            start_result: Ok(()),
            stop_result: Ok(()),
            predict_result: Ok(PredictResponse {
                message: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR".to_string(),
            }),
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            predictions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn idle() -> Self {
        Self::with_status(Ok(StatusResponse {
            training_running: false,
        }))
    }

    pub(crate) fn running() -> Self {
        Self::with_status(Ok(StatusResponse {
            training_running: true,
        }))
    }

    pub(crate) fn unreachable() -> Self {
        Self::with_status(Err(TransportError::Network("connection refused".to_string())))
    }

    pub(crate) fn set_status(&self, status: Result<StatusResponse, TransportError>) {
        *lock(&self.status) = status;
    }

    pub(crate) fn failing_start(mut self, message: &str) -> Self {
        self.start_result = Err(TransportError::Rejected {
            status: 400,
            message: message.to_string(),
        });
        self
    }

    pub(crate) fn failing_stop(mut self) -> Self {
        self.stop_result = Err(TransportError::Rejected {
            status: 500,
            message: String::new(),
        });
        self
    }

    pub(crate) fn predicting(mut self, message: &str) -> Self {
        self.predict_result = Ok(PredictResponse {
            message: message.to_string(),
        });
        self
    }

    pub(crate) fn failing_predict(mut self) -> Self {
        self.predict_result = Err(TransportError::Network("connection reset".to_string()));
        self
    }

    pub(crate) fn calls(&self) -> Vec<ServiceCall> {
        lock(&self.calls).clone()
    }

    pub(crate) fn count(&self, call: ServiceCall) -> usize {
        lock(&self.calls).iter().filter(|c| **c == call).count()
    }

    pub(crate) fn uploads(&self) -> Vec<TrainingUpload> {
        lock(&self.uploads).clone()
    }

    pub(crate) fn predictions(&self) -> Vec<PredictionPayload> {
        lock(&self.predictions).clone()
    }

    fn record(&self, call: ServiceCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl TrainingService for RecordingService {
    async fn status(&self) -> Result<StatusResponse, TransportError> {
        self.record(ServiceCall::Status);
        lock(&self.status).clone()
    }

    async fn start_training(&self, upload: TrainingUpload) -> Result<(), TransportError> {
        self.record(ServiceCall::StartTraining);
        lock(&self.uploads).push(upload);
        self.start_result.clone()
    }

    async fn stop_training(&self) -> Result<(), TransportError> {
        self.record(ServiceCall::StopTraining);
        self.stop_result.clone()
    }

    async fn predict(&self, payload: PredictionPayload) -> Result<PredictResponse, TransportError> {
        self.record(ServiceCall::Predict);
        lock(&self.predictions).push(payload);
        self.predict_result.clone()
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError> {
        self.record(ServiceCall::ListModels);
        Ok(Vec::new())
    }

    async fn model_data(
        &self,
        _name: &str,
        _model_type: &str,
    ) -> Result<ModelImages, TransportError> {
        self.record(ServiceCall::ModelData);
        Ok(ModelImages::default())
    }
}
