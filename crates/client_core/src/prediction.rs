use shared::{
    domain::{CornerSet, ModelContext, Player},
    error::{TransportError, ValidationError},
    protocol::PredictExtraData,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    corner_capture::{CornerCaptureController, ImageRect},
    types::{ImageFile, PredictionPayload},
    TrainingService,
};

pub const PREDICTING_PLACEHOLDER: &str = "Predicting...";
pub const START_POSITION: &str = "start";

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("prediction request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("corner capture closed before four corners were marked")]
    CaptureAbandoned,
}

/// What the board widget shows: a position string and the side at the bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDisplay {
    pub position: String,
    pub orientation: Player,
}

impl Default for BoardDisplay {
    fn default() -> Self {
        Self {
            position: START_POSITION.to_string(),
            orientation: Player::White,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Capture surface opened; the request goes out once four corners arrive.
    AwaitingCorners,
    Predicted(BoardDisplay),
}

/// A cropped submission suspended until the corner capture completes.
struct PendingPrediction {
    image: ImageFile,
    player: Player,
    corners: oneshot::Receiver<CornerSet>,
}

pub struct PredictionRequestCoordinator {
    model: ModelContext,
    image: Option<ImageFile>,
    player: Option<Player>,
    crop: Option<bool>,
    output: String,
    board: BoardDisplay,
    pending: Option<PendingPrediction>,
}

impl PredictionRequestCoordinator {
    pub fn new(model: ModelContext) -> Self {
        Self {
            model,
            image: None,
            player: None,
            crop: None,
            output: String::new(),
            board: BoardDisplay::default(),
            pending: None,
        }
    }

    pub fn select_image(&mut self, image: ImageFile) {
        self.image = Some(image);
    }

    pub fn select_player(&mut self, player: Player) {
        self.player = Some(player);
    }

    pub fn set_crop(&mut self, crop: bool) {
        self.crop = Some(crop);
    }

    pub fn model(&self) -> &ModelContext {
        &self.model
    }

    /// Text shown in the output area.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn board(&self) -> &BoardDisplay {
        &self.board
    }

    pub fn is_awaiting_corners(&self) -> bool {
        self.pending.is_some()
    }

    pub async fn submit(
        &mut self,
        capture: &mut CornerCaptureController,
        surface: ImageRect,
        service: &dyn TrainingService,
    ) -> Result<SubmitOutcome, PredictionError> {
        let image = self.image.clone().ok_or(ValidationError::MissingImage)?;
        let player = self.player.ok_or(ValidationError::MissingPlayer)?;
        let crop = self.crop.ok_or(ValidationError::MissingCropDecision)?;

        if crop {
            let corners = capture.open(surface);
            self.pending = Some(PendingPrediction {
                image,
                player,
                corners,
            });
            return Ok(SubmitOutcome::AwaitingCorners);
        }

        self.transmit(image, player, None, service)
            .await
            .map(SubmitOutcome::Predicted)
    }

    /// Waits for the suspended submission's corners and transmits it.
    /// Returns `Ok(None)` when nothing is suspended. Dropping the returned
    /// future before the corners arrive keeps the submission suspended.
    pub async fn resume(
        &mut self,
        service: &dyn TrainingService,
    ) -> Result<Option<BoardDisplay>, PredictionError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        let received = (&mut pending.corners).await;
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };

        match received {
            Ok(corners) => self
                .transmit(pending.image, pending.player, Some(corners), service)
                .await
                .map(Some),
            Err(_) => {
                info!("cropped prediction abandoned");
                Err(PredictionError::CaptureAbandoned)
            }
        }
    }

    async fn transmit(
        &mut self,
        image: ImageFile,
        player: Player,
        corners: Option<CornerSet>,
        service: &dyn TrainingService,
    ) -> Result<BoardDisplay, PredictionError> {
        let payload = PredictionPayload {
            image,
            extra: PredictExtraData {
                player,
                corners,
                name: self.model.name.clone(),
                model_type: self.model.model_type.clone(),
            },
        };

        self.output = PREDICTING_PLACEHOLDER.to_string();
        match service.predict(payload).await {
            Ok(response) => {
                info!(player = %player, cropped = corners.is_some(), "prediction received");
                self.output = response.message.clone();
                self.board = BoardDisplay {
                    position: response.message,
                    orientation: player,
                };
                Ok(self.board.clone())
            }
            Err(err) => {
                error!("prediction request failed: {err}");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/prediction_tests.rs"]
mod tests;
