use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::ModelSummary,
    error::TransportError,
    protocol::{PredictResponse, StatusResponse},
};

pub mod config;
pub mod corner_capture;
pub mod event_channel;
pub mod prediction;
pub mod session_status;
pub mod training;
pub mod transport;
pub mod types;

pub use config::{load_settings, ClientSettings};
pub use corner_capture::{
    CaptureState, ClickOutcome, CornerCaptureController, ImageRect, PointerClick,
};
pub use event_channel::{
    EventSubscription, LocalEventChannel, StreamError, StreamItem, WebSocketEventChannel,
};
pub use prediction::{BoardDisplay, PredictionError, PredictionRequestCoordinator, SubmitOutcome};
pub use session_status::{SessionEvent, SessionStatusController, TrainingSession};
pub use training::{TrainingError, TrainingRequestCoordinator};
pub use transport::HttpTrainingService;
pub use types::{DatasetFile, ImageFile, ModelImages, PredictionPayload, TrainingUpload};

/// Request/response surface of the remote training and prediction service.
#[async_trait]
pub trait TrainingService: Send + Sync {
    async fn status(&self) -> Result<StatusResponse, TransportError>;
    async fn start_training(&self, upload: TrainingUpload) -> Result<(), TransportError>;
    async fn stop_training(&self) -> Result<(), TransportError>;
    async fn predict(&self, payload: PredictionPayload) -> Result<PredictResponse, TransportError>;
    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError>;
    async fn model_data(
        &self,
        name: &str,
        model_type: &str,
    ) -> Result<ModelImages, TransportError>;
}

/// Source of `training_update` events. Each call registers a new
/// subscription; callers own de-duplication.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn subscribe(&self) -> anyhow::Result<EventSubscription>;
}

/// Production wiring: HTTP service plus WebSocket push channel, both
/// pointed at the configured base address.
pub struct ServiceHandles {
    pub service: Arc<HttpTrainingService>,
    pub events: Arc<WebSocketEventChannel>,
}

impl ServiceHandles {
    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let service = HttpTrainingService::from_settings(settings)?;
        let ws_url = config::event_channel_url(service.server_url())?;
        Ok(Self {
            events: Arc::new(WebSocketEventChannel::new(ws_url, settings.event_buffer)),
            service: Arc::new(service),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support;
