use shared::{
    domain::TrainingStatus,
    error::{TransportError, ValidationError},
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    session_status::{SessionStatusController, STARTING_LINE, STOPPED_LINE},
    types::TrainingUpload,
    TrainingService,
};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to start training: {}", .0.operator_message())]
    Start(TransportError),
    #[error("Failed to stop training: {}", .0.operator_message())]
    Stop(TransportError),
}

/// Clears the in-flight flag on every exit path, including a dropped future.
struct UploadGuard<'a>(&'a mut bool);

impl<'a> UploadGuard<'a> {
    fn acquire(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

#[derive(Debug, Default)]
pub struct TrainingRequestCoordinator {
    is_uploading: bool,
}

impl TrainingRequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_uploading(&self) -> bool {
        self.is_uploading
    }

    pub fn can_start(&self, session: &SessionStatusController) -> bool {
        session.status() == TrainingStatus::Idle && !self.is_uploading
    }

    pub fn can_stop(&self, session: &SessionStatusController) -> bool {
        session.status() == TrainingStatus::Training
    }

    pub async fn start(
        &mut self,
        session: &mut SessionStatusController,
        service: &dyn TrainingService,
        upload: TrainingUpload,
    ) -> Result<(), TrainingError> {
        if upload.files.is_empty() {
            return Err(ValidationError::EmptyDataset.into());
        }
        if self.is_uploading {
            return Err(ValidationError::UploadInProgress.into());
        }
        let status = session.status();
        if status != TrainingStatus::Idle {
            return Err(ValidationError::TrainingUnavailable(status).into());
        }

        let name = upload.name.clone();
        let result = {
            let _uploading = UploadGuard::acquire(&mut self.is_uploading);
            session.replace_log(vec![STARTING_LINE.to_string()]);
            service.start_training(upload).await
        };

        match result {
            Ok(()) => {
                info!(name = %name, "training started");
                session.set_status(TrainingStatus::Training);
                Ok(())
            }
            Err(err) => {
                error!(name = %name, "failed to start training: {err}");
                session.replace_log(Vec::new());
                Err(TrainingError::Start(err))
            }
        }
    }

    /// The stop sentinel is logged before the request and kept on failure.
    pub async fn stop(
        &mut self,
        session: &mut SessionStatusController,
        service: &dyn TrainingService,
    ) -> Result<(), TrainingError> {
        session.append_line(STOPPED_LINE.to_string());
        match service.stop_training().await {
            Ok(()) => {
                info!("training stopped");
                session.set_status(TrainingStatus::Idle);
                Ok(())
            }
            Err(err) => {
                warn!(status = %session.status(), "failed to stop training: {err}");
                Err(TrainingError::Stop(err))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/training_tests.rs"]
mod tests;
