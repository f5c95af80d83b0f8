//! Training-session state: status FSM plus the cumulative log, reconciled
//! from one status poll and the `training_update` push stream.
//!
//! Poll/stream ordering: the poll only seeds state. Once any stream line has
//! been logged, later poll results are ignored, and a poll never replaces
//! the log of a session that is already training.

use std::sync::Arc;

use shared::{
    domain::TrainingStatus,
    error::TransportError,
    protocol::{
        EventOutput, MetricPayload, MetricValue, StatusResponse, TrainingEvent, TrainingUpdate,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    event_channel::{EventSubscription, StreamItem},
    EventChannel, TrainingService,
};

pub const TRAINING_RUNNING_LINE: &str = "Training is running...";
pub const STARTING_LINE: &str = "Starting training...";
pub const STOPPED_LINE: &str = "Stopped training.";
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSession {
    status: TrainingStatus,
    log: Vec<String>,
}

impl TrainingSession {
    pub fn status(&self) -> TrainingStatus {
        self.status
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// The log as a text area would show it, one line per entry.
    pub fn transcript(&self) -> String {
        self.log.iter().fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(TrainingStatus),
    LogAppended(String),
    LogReset,
    /// A `done` update arrived; listeners refresh the model catalog.
    TrainingCompleted,
    StreamError(String),
}

pub struct SessionStatusController {
    session: TrainingSession,
    advanced_by_stream: bool,
    channel: Arc<dyn EventChannel>,
    subscription: Option<EventSubscription>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStatusController {
    pub fn new(channel: Arc<dyn EventChannel>) -> Self {
        Self::with_event_capacity(channel, DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how far a slow `subscribe_events` listener may fall
    /// behind before it sees `Lagged`.
    pub fn with_event_capacity(channel: Arc<dyn EventChannel>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            session: TrainingSession::default(),
            advanced_by_stream: false,
            channel,
            subscription: None,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &TrainingSession {
        &self.session
    }

    pub fn status(&self) -> TrainingStatus {
        self.session.status
    }

    pub fn log(&self) -> &[String] {
        &self.session.log
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Registers on the push channel and runs the initial status poll.
    /// A failed registration is reported but does not prevent the poll.
    pub async fn initialize(
        &mut self,
        service: &dyn TrainingService,
    ) -> Result<TrainingStatus, TransportError> {
        if let Err(err) = self.subscribe().await {
            warn!("training update subscription failed: {err:#}");
            let _ = self.events.send(SessionEvent::StreamError(format!("{err:#}")));
        }
        self.refresh_status(service).await
    }

    /// No-op while a subscription is already held.
    pub async fn subscribe(&mut self) -> anyhow::Result<()> {
        if self.subscription.is_some() {
            debug!("training updates already subscribed");
            return Ok(());
        }
        self.subscription = Some(self.channel.subscribe().await?);
        Ok(())
    }

    /// Releases the push subscription. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.subscription.take().is_some() {
            debug!("session status controller released its subscription");
        }
    }

    pub async fn refresh_status(
        &mut self,
        service: &dyn TrainingService,
    ) -> Result<TrainingStatus, TransportError> {
        match service.status().await {
            Ok(response) => Ok(self.apply_poll(response)),
            Err(err) => {
                warn!(status = %self.session.status, "failed to fetch training status: {err}");
                Err(err)
            }
        }
    }

    /// Seeds status from a poll result unless the stream already advanced it.
    pub fn apply_poll(&mut self, response: StatusResponse) -> TrainingStatus {
        if self.advanced_by_stream {
            debug!(
                status = %self.session.status,
                training_running = response.training_running,
                "stream is authoritative; ignoring status poll"
            );
            return self.session.status;
        }

        if response.training_running {
            if self.session.status != TrainingStatus::Training {
                self.replace_log(vec![TRAINING_RUNNING_LINE.to_string()]);
            }
            self.set_status(TrainingStatus::Training);
        } else {
            self.set_status(TrainingStatus::Idle);
        }
        self.session.status
    }

    /// Waits for the next push item and applies it. Returns `false` once
    /// the stream has ended or no subscription is held.
    pub async fn process_next_event(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(item) => {
                self.handle_stream_item(item);
                true
            }
            None => {
                info!("training update stream ended");
                false
            }
        }
    }

    pub fn handle_stream_item(&mut self, item: StreamItem) {
        match item {
            Ok(update) => {
                self.handle_update(update);
            }
            Err(err) => {
                warn!("training update stream error: {err}");
                let _ = self.events.send(SessionEvent::StreamError(err.to_string()));
            }
        }
    }

    /// Applies one update and returns the line appended to the log, if any.
    pub fn handle_update(&mut self, update: TrainingUpdate) -> Option<String> {
        self.handle_event(TrainingEvent::from(update))
    }

    pub fn handle_event(&mut self, event: TrainingEvent) -> Option<String> {
        let line = render_output(&event.output);

        if let Some(line) = &line {
            self.advanced_by_stream = true;
            if self.session.status == TrainingStatus::Unknown {
                self.set_status(TrainingStatus::Training);
            }
            self.append_line(line.clone());
        }

        if event.done {
            info!("training run reported completion");
            let _ = self.events.send(SessionEvent::TrainingCompleted);
        }

        line
    }

    pub(crate) fn set_status(&mut self, status: TrainingStatus) {
        if self.session.status == status {
            return;
        }
        info!(from = %self.session.status, to = %status, "training status changed");
        self.session.status = status;
        let _ = self.events.send(SessionEvent::StatusChanged(status));
    }

    pub(crate) fn append_line(&mut self, line: String) {
        self.session.log.push(line.clone());
        let _ = self.events.send(SessionEvent::LogAppended(line));
    }

    pub(crate) fn replace_log(&mut self, lines: Vec<String>) {
        self.session.log.clear();
        let _ = self.events.send(SessionEvent::LogReset);
        for line in lines {
            self.append_line(line);
        }
    }
}

/// Log line for one decoded update; `None` when nothing should be shown.
pub fn render_output(output: &EventOutput) -> Option<String> {
    match output {
        EventOutput::None => None,
        EventOutput::Line(text) => Some(text.clone()),
        EventOutput::Metric(metric) => Some(render_metric(metric)),
        EventOutput::Malformed { raw, error } => {
            warn!("passing through malformed metric: {error}");
            Some(raw.clone())
        }
        EventOutput::Unrecognized(error) => {
            warn!("dropping training update: {error}");
            None
        }
    }
}

pub fn render_metric(metric: &MetricPayload) -> String {
    match metric {
        MetricPayload::Classification(m) => format!(
            "{}, accuracy: {}, loss: {}",
            m.epoch,
            fixed4(&m.accuracy),
            fixed4(&m.loss)
        ),
        MetricPayload::Detection(m) => format!(
            "Epoch {}, box Loss: {}, class loss: {}, DFL loss: {}, instances: {}, progress: {}%",
            m.epoch, m.box_loss, m.cls_loss, m.dfl_loss, m.instances, m.progress
        ),
    }
}

fn fixed4(value: &MetricValue) -> String {
    match value.as_f64() {
        Some(number) => format!("{number:.4}"),
        None => value.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/session_status_tests.rs"]
mod tests;
