use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context as TaskContext, Poll},
};

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use shared::{
    error::ProtocolError,
    protocol::{EventEnvelope, TrainingUpdate, TRAINING_UPDATE_EVENT},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::EventChannel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("push channel failed: {0}")]
    Transport(String),
}

pub type StreamItem = Result<TrainingUpdate, StreamError>;

/// Live registration on a push channel. Dropping it releases the
/// registration; the release hook runs exactly once.
pub struct EventSubscription {
    inner: ReceiverStream<StreamItem>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(
        receiver: mpsc::Receiver<StreamItem>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(receiver),
            release: Some(Box::new(release)),
        }
    }

    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.next().await
    }
}

impl Stream for EventSubscription {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Push channel over the service WebSocket; every text frame is an
/// [`EventEnvelope`].
#[derive(Debug, Clone)]
pub struct WebSocketEventChannel {
    url: String,
    buffer: usize,
}

impl WebSocketEventChannel {
    pub fn new(url: impl Into<String>, buffer: usize) -> Self {
        Self {
            url: url.into(),
            buffer: buffer.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn decode_frame(text: &str) -> Option<StreamItem> {
    let envelope = match serde_json::from_str::<EventEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            return Some(Err(ProtocolError::InvalidFrame(err.to_string()).into()));
        }
    };
    if envelope.event != TRAINING_UPDATE_EVENT {
        debug!(event = %envelope.event, "ignoring push event");
        return None;
    }
    Some(
        serde_json::from_value::<TrainingUpdate>(envelope.data)
            .map_err(|err| ProtocolError::InvalidFrame(err.to_string()).into()),
    )
}

#[async_trait]
impl EventChannel for WebSocketEventChannel {
    async fn subscribe(&self) -> anyhow::Result<EventSubscription> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect push channel: {}", self.url))?;
        let (_, mut ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(self.buffer);

        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let item = match msg {
                    Ok(Message::Text(text)) => match decode_frame(&text) {
                        Some(item) => item,
                        None => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        let _ = tx
                            .send(Err(StreamError::Transport(format!(
                                "websocket receive failed: {err}"
                            ))))
                            .await;
                        break;
                    }
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!(url = %url, "push channel reader finished");
        });

        info!(url = %self.url, "subscribed to training updates");
        let url = self.url.clone();
        Ok(EventSubscription::new(rx, move || {
            reader.abort();
            info!(url = %url, "unsubscribed from training updates");
        }))
    }
}

/// In-process push channel. Useful when the caller already owns the event
/// source, and for exercising controllers without a network.
#[derive(Debug, Clone)]
pub struct LocalEventChannel {
    shared: Arc<LocalChannelState>,
    buffer: usize,
}

#[derive(Debug, Default)]
struct LocalChannelState {
    senders: Mutex<Vec<mpsc::Sender<StreamItem>>>,
    active: AtomicUsize,
    registrations: AtomicUsize,
}

impl LocalEventChannel {
    pub fn new(buffer: usize) -> Self {
        Self {
            shared: Arc::new(LocalChannelState::default()),
            buffer: buffer.max(1),
        }
    }

    /// Delivers `item` to every live subscription and returns how many
    /// received it.
    pub fn publish(&self, item: StreamItem) -> usize {
        let mut senders = self
            .shared
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| !sender.is_closed());
        let mut delivered = 0;
        for sender in senders.iter() {
            match sender.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!("dropping local training update: {err}"),
            }
        }
        delivered
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Total number of `subscribe` calls that produced a registration.
    pub fn registrations(&self) -> usize {
        self.shared.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventChannel for LocalEventChannel {
    async fn subscribe(&self) -> anyhow::Result<EventSubscription> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.shared
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        self.shared.registrations.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        Ok(EventSubscription::new(rx, move || {
            shared.active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

#[cfg(test)]
#[path = "tests/event_channel_tests.rs"]
mod tests;
