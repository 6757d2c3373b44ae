// Invalidation listener: consumes room change events for one hotel, notifies the user
// and re-fetches inventory for the current stay window.

use crate::api::{ApiError, EngineConfig};
use crate::inventory::{InventoryStore, RefreshOutcome};
use crate::models::{Notification, RoomEvent, RoomEventKind, StayWindow};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

// Source of room change events. Dropping the returned receiver ends the subscription.
#[async_trait]
pub trait PushChannel: Send + Sync + 'static {
    async fn subscribe(
        &self,
        hotel_id: &str,
        buffer: usize,
    ) -> Result<mpsc::Receiver<RoomEvent>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    event: String,
    #[serde(default)]
    data: PushPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    hotel_id: Option<String>,
    #[serde(alias = "_id")]
    room_id: Option<String>,
}

// Frames look like {"event":"roomUpdated","data":{"hotelId":"...","roomId":"..."}}
pub fn decode_push_frame(text: &str) -> Option<RoomEvent> {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed push frame");
            return None;
        }
    };
    let Some(kind) = RoomEventKind::from_event_name(&frame.event) else {
        tracing::debug!(event = %frame.event, "Skipping unrelated push event");
        return None;
    };
    let Some(hotel_id) = frame.data.hotel_id else {
        tracing::warn!(event = %frame.event, "Push event without hotelId");
        return None;
    };

    Some(RoomEvent {
        kind,
        hotel_id,
        room_id: frame.data.room_id.unwrap_or_default(),
    })
}

pub struct WsPushChannel {
    url: String,
}

impl WsPushChannel {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            url: config.push_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn subscription_url(&self, hotel_id: &str) -> String {
        format!("{}?hotelId={}", self.url, hotel_id)
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn subscribe(
        &self,
        hotel_id: &str,
        buffer: usize,
    ) -> Result<mpsc::Receiver<RoomEvent>, ApiError> {
        let url = self.subscription_url(hotel_id);
        let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            tracing::warn!(%url, error = %e, "Push channel connection failed");
            ApiError::network()
        })?;
        tracing::info!(hotel_id, "Push channel connected");

        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(forward_frames(stream, tx));
        Ok(rx)
    }
}

// Pumps decoded frames into the subscription until either side goes away
async fn forward_frames(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::Sender<RoomEvent>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = stream.close(None).await;
                tracing::debug!("Push subscription dropped, socket closed");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_push_frame(&text) {
                        if tx.send(event).await.is_err() {
                            let _ = stream.close(None).await;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Push channel closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Push channel read failed");
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerReport {
    pub events_received: usize,
    pub events_ignored: usize,
    pub refreshes_triggered: usize,
    pub notifications_sent: usize,
}

// Owns the handler task of one hotel subscription.
// Shutting it down or dropping it releases the subscription.
pub struct ListenerHandle {
    hotel_id: String,
    task: Option<JoinHandle<ListenerReport>>,
}

impl ListenerHandle {
    pub fn hotel_id(&self) -> &str {
        &self.hotel_id
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::info!(hotel_id = %self.hotel_id, "Invalidation listener stopped");
        }
    }

    // Waits for the channel to close on its own and returns what the handler saw
    pub async fn join(mut self) -> ListenerReport {
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => ListenerReport::default(),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct InvalidationListener {
    store: Arc<InventoryStore>,
    window: watch::Receiver<StayWindow>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl InvalidationListener {
    pub fn new(
        store: Arc<InventoryStore>,
        window: watch::Receiver<StayWindow>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            store,
            window,
            notifications,
        }
    }

    pub async fn open(
        self,
        channel: &dyn PushChannel,
        hotel_id: &str,
        buffer: usize,
    ) -> Result<ListenerHandle, ApiError> {
        let events = channel.subscribe(hotel_id, buffer).await?;
        tracing::info!(hotel_id, "Invalidation listener started");

        let task = tokio::spawn(self.run(hotel_id.to_string(), events));
        Ok(ListenerHandle {
            hotel_id: hotel_id.to_string(),
            task: Some(task),
        })
    }

    async fn run(self, hotel_id: String, mut events: mpsc::Receiver<RoomEvent>) -> ListenerReport {
        let mut report = ListenerReport::default();
        // Aborting this task drops the set, which aborts any refresh still running
        let mut refreshes: JoinSet<RefreshOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                Some(done) = refreshes.join_next(), if !refreshes.is_empty() => {
                    log_refresh(&hotel_id, done);
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    report.events_received += 1;
                    if event.hotel_id != hotel_id {
                        report.events_ignored += 1;
                        tracing::debug!(
                            active = %hotel_id,
                            event_hotel = %event.hotel_id,
                            "Ignoring event for another hotel"
                        );
                        continue;
                    }

                    tracing::info!(
                        hotel_id = %hotel_id,
                        room_id = %event.room_id,
                        kind = ?event.kind,
                        "Room inventory changed"
                    );
                    if self
                        .notifications
                        .send(Notification::for_room_event(event.kind))
                        .is_ok()
                    {
                        report.notifications_sent += 1;
                    }

                    let window = *self.window.borrow();
                    let store = self.store.clone();
                    let target = hotel_id.clone();
                    refreshes.spawn(async move { store.refresh_if_idle(&target, window).await });
                    report.refreshes_triggered += 1;
                }
            }
        }

        while let Some(done) = refreshes.join_next().await {
            log_refresh(&hotel_id, done);
        }
        tracing::debug!(hotel_id = %hotel_id, ?report, "Push subscription ended");
        report
    }
}

fn log_refresh(hotel_id: &str, done: Result<RefreshOutcome, tokio::task::JoinError>) {
    match done {
        Ok(RefreshOutcome::Refreshed(rooms)) => {
            tracing::debug!(hotel_id, rooms, "Refresh after invalidation finished")
        }
        Ok(RefreshOutcome::Coalesced) => {}
        Ok(RefreshOutcome::Failed(e)) => {
            tracing::warn!(hotel_id, error = %e, "Refresh after invalidation failed")
        }
        Err(e) => tracing::error!(hotel_id, error = %e, "Refresh task panicked or was cancelled"),
    }
}
