//! Interactive marking of the four board corners on a displayed image.
//!
//! The controller owns the points until the fourth click, then moves the
//! completed [`CornerSet`] into the one-shot continuation registered by
//! [`CornerCaptureController::open`] and closes the surface in the same step.

use shared::domain::{CornerPoint, CornerSet, CORNER_COUNT};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Size the capture image is displayed at.
pub const DISPLAY_WIDTH: f64 = 1280.0;
pub const DISPLAY_HEIGHT: f64 = 720.0;

/// Bounding rectangle of the displayed image, in pointer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for ImageRect {
    fn default() -> Self {
        Self::sized(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }
}

impl ImageRect {
    pub fn sized(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    /// Corner point for a click, or `None` when the click misses the image.
    pub fn locate(&self, click: PointerClick) -> Option<CornerPoint> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let x = click.client_x - self.left;
        let y = click.client_y - self.top;
        if !(0.0..=self.width).contains(&x) || !(0.0..=self.height).contains(&y) {
            return None;
        }
        Some(CornerPoint {
            x,
            y,
            x_percent: (x / self.width * 100.0).clamp(0.0, 100.0),
            y_percent: (y / self.height * 100.0).clamp(0.0, 100.0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerClick {
    pub client_x: f64,
    pub client_y: f64,
}

impl PointerClick {
    pub fn at(client_x: f64, client_y: f64) -> Self {
        Self { client_x, client_y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Collecting,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Ignored,
    Recorded { count: usize },
    Completed(CornerSet),
}

#[derive(Debug)]
pub struct CornerCaptureController {
    state: CaptureState,
    surface: Option<ImageRect>,
    points: Vec<CornerPoint>,
    continuation: Option<oneshot::Sender<CornerSet>>,
}

impl Default for CornerCaptureController {
    fn default() -> Self {
        Self::new()
    }
}

impl CornerCaptureController {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            surface: None,
            points: Vec::with_capacity(CORNER_COUNT),
            continuation: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.surface.is_some()
    }

    pub fn surface(&self) -> Option<ImageRect> {
        self.surface
    }

    pub fn points(&self) -> &[CornerPoint] {
        &self.points
    }

    /// Opens a fresh capture surface. Points and any continuation from an
    /// earlier, unfinished session are discarded.
    pub fn open(&mut self, surface: ImageRect) -> oneshot::Receiver<CornerSet> {
        if !self.points.is_empty() {
            debug!(discarded = self.points.len(), "discarding abandoned corner capture");
        }
        let (tx, rx) = oneshot::channel();
        self.points.clear();
        self.state = CaptureState::Idle;
        self.surface = Some(surface);
        self.continuation = Some(tx);
        info!(
            width = surface.width,
            height = surface.height,
            "corner capture opened"
        );
        rx
    }

    /// Closes the surface without emitting; the pending continuation sees a
    /// closed channel.
    pub fn close(&mut self) {
        if self.surface.take().is_some() {
            debug!(points = self.points.len(), "corner capture closed");
        }
        self.points.clear();
        self.continuation = None;
        self.state = CaptureState::Idle;
    }

    pub fn click(&mut self, click: PointerClick) -> ClickOutcome {
        let Some(surface) = self.surface else {
            return ClickOutcome::Ignored;
        };
        if self.state == CaptureState::Complete {
            return ClickOutcome::Ignored;
        }
        let Some(point) = surface.locate(click) else {
            debug!(x = click.client_x, y = click.client_y, "click outside capture image");
            return ClickOutcome::Ignored;
        };

        self.points.push(point);
        self.state = CaptureState::Collecting;
        let count = self.points.len();
        if count < CORNER_COUNT {
            return ClickOutcome::Recorded { count };
        }

        self.state = CaptureState::Complete;
        let corners = match CornerSet::try_from(std::mem::take(&mut self.points)) {
            Ok(corners) => corners,
            Err(err) => {
                error!("corner capture lost track of its points: {err}");
                self.close();
                return ClickOutcome::Ignored;
            }
        };
        if let Some(continuation) = self.continuation.take() {
            if continuation.send(corners).is_err() {
                debug!("corner capture completed with no waiting submission");
            }
        }
        self.surface = None;
        self.state = CaptureState::Idle;
        info!("corner capture completed");
        ClickOutcome::Completed(corners)
    }
}

#[cfg(test)]
#[path = "tests/corner_capture_tests.rs"]
mod tests;
