// Booking engine: one instance of each component wired together behind the
// operations a booking UI calls.

use crate::api::{
    ApiError, BookingApi, ClientError, EngineConfig, HttpBookingApi, ValidationField,
};
use crate::booking::{
    BookingFlow, BookingPhase, Confirmation, GuestDetails, PaymentProof, SubmissionContext,
};
use crate::inventory::{InventorySnapshot, InventoryStatsReport, InventoryStore, RoomPartition};
use crate::ledger::{InventoryConflict, SelectionEntry, SelectionLedger};
use crate::listener::{InvalidationListener, ListenerHandle, PushChannel, WsPushChannel};
use crate::models::{Hotel, Notification, RoomRecord, StayWindow};
use crate::pricing::{calculate_totals, PricingTotals};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct BookingEngine {
    config: EngineConfig,
    api: Arc<dyn BookingApi>,
    push: Arc<dyn PushChannel>,
    store: Arc<InventoryStore>,
    ledger: SelectionLedger,
    flow: BookingFlow,
    window: watch::Sender<StayWindow>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    notify_rx: mpsc::UnboundedReceiver<Notification>,
    listener: Option<ListenerHandle>,
    hotel: Option<Hotel>,
    hotel_id: Option<String>,
}

impl BookingEngine {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn BookingApi>,
        push: Arc<dyn PushChannel>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let store = Arc::new(InventoryStore::new(
            Arc::clone(&api),
            config.placeholder_on_failure,
        ));
        let (window, _) = watch::channel(StayWindow::default());
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        tracing::info!(api_base = %config.api_base, "Booking engine created");
        Ok(Self {
            config,
            api,
            push,
            store,
            ledger: SelectionLedger::new(),
            flow: BookingFlow::new(),
            window,
            notify_tx,
            notify_rx,
            listener: None,
            hotel: None,
            hotel_id: None,
        })
    }

    // Engine over the HTTP backend and its WebSocket push channel
    pub fn connect(config: EngineConfig) -> Result<Self, ClientError> {
        let api = HttpBookingApi::new(&config)?;
        let push = WsPushChannel::new(&config);
        Self::new(config, Arc::new(api), Arc::new(push))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hotel(&self) -> Option<&Hotel> {
        self.hotel.as_ref()
    }

    // Loaded hotel first, then the configured fallback
    pub fn hotel_id(&self) -> Option<&str> {
        self.hotel_id
            .as_deref()
            .or(self.config.fallback_hotel_id.as_deref())
    }

    fn require_hotel_id(&self) -> Result<String, ApiError> {
        self.hotel_id().map(str::to_string).ok_or_else(|| {
            ApiError::validation(ValidationField::HotelId, "No hotel has been selected")
        })
    }

    pub async fn load_hotel(&mut self, hotel_path: &str) -> Result<Hotel, ApiError> {
        let hotel_path = hotel_path.trim();
        if hotel_path.is_empty() {
            return Err(ApiError::validation(
                ValidationField::HotelPath,
                "Hotel path is required",
            ));
        }

        let hotel = self.api.fetch_hotel(hotel_path).await.map_err(|e| {
            tracing::warn!(hotel_path, error = %e, "Hotel lookup failed");
            e
        })?;
        tracing::info!(hotel_id = %hotel.id, name = %hotel.name, "Hotel loaded");

        self.set_hotel_id(&hotel.id).await?;
        self.hotel = Some(hotel.clone());
        Ok(hotel)
    }

    // Switches the active hotel. The previous subscription is closed before the new
    // one opens, and selections for the previous hotel are dropped.
    pub async fn set_hotel_id(&mut self, hotel_id: &str) -> Result<(), ApiError> {
        let hotel_id = hotel_id.trim();
        if hotel_id.is_empty() {
            return Err(ApiError::validation(
                ValidationField::HotelId,
                "Hotel id is required",
            ));
        }
        if self.hotel_id.as_deref() == Some(hotel_id) && self.is_listening() {
            return Ok(());
        }

        self.close_listener().await;
        if self.hotel_id().map_or(false, |current| current != hotel_id) {
            self.store.reset();
            self.ledger.clear();
            self.flow = BookingFlow::new();
            self.hotel = None;
        }
        self.hotel_id = Some(hotel_id.to_string());
        self.open_listener(hotel_id).await;
        Ok(())
    }

    async fn open_listener(&mut self, hotel_id: &str) {
        let listener = InvalidationListener::new(
            Arc::clone(&self.store),
            self.window.subscribe(),
            self.notify_tx.clone(),
        );
        match listener
            .open(self.push.as_ref(), hotel_id, self.config.event_buffer)
            .await
        {
            Ok(handle) => self.listener = Some(handle),
            // Booking keeps working without live updates
            Err(e) => tracing::warn!(hotel_id, error = %e, "Live inventory updates unavailable"),
        }
    }

    async fn close_listener(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.shutdown().await;
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .map_or(false, |handle| handle.is_active())
    }

    pub fn stay_window(&self) -> StayWindow {
        *self.window.borrow()
    }

    pub fn set_stay_window(&mut self, window: StayWindow) {
        tracing::debug!(
            check_in = ?window.check_in,
            check_out = ?window.check_out,
            "Stay window changed"
        );
        self.window.send_replace(window);
    }

    // New dates, then a fresh catalog for them
    pub async fn check_availability(
        &mut self,
        window: StayWindow,
    ) -> Result<Vec<RoomRecord>, ApiError> {
        self.set_stay_window(window);
        self.refresh_inventory().await
    }

    pub async fn refresh_inventory(&self) -> Result<Vec<RoomRecord>, ApiError> {
        let hotel_id = self.require_hotel_id()?;
        self.store.refresh(&hotel_id, self.stay_window()).await
    }

    pub fn snapshot(&self) -> Option<Arc<InventorySnapshot>> {
        self.store.snapshot()
    }

    pub fn rooms(&self) -> Vec<RoomRecord> {
        self.store.rooms()
    }

    pub fn partition(&self) -> RoomPartition {
        self.store.partition()
    }

    // True while the placeholder catalog is shown
    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    pub fn inventory_stats(&self) -> InventoryStatsReport {
        self.store.stats()
    }

    pub fn set_selection(&mut self, room_id: &str, entry: SelectionEntry) {
        self.ledger.set_selection(room_id, entry);
    }

    pub fn selections(&self) -> &SelectionLedger {
        &self.ledger
    }

    pub fn conflicts(&self) -> Vec<InventoryConflict> {
        self.ledger.conflicts(&self.store.rooms())
    }

    pub fn totals(&self) -> PricingTotals {
        calculate_totals(
            &self.store.rooms(),
            &self.ledger,
            self.stay_window().nights(),
        )
    }

    pub fn phase(&self) -> BookingPhase {
        self.flow.phase()
    }

    pub fn flow(&self) -> &BookingFlow {
        &self.flow
    }

    pub fn book_now(&mut self) -> Result<(), ApiError> {
        let window = self.stay_window();
        self.flow.choose_rooms(&self.ledger, &window)
    }

    // Returns the primary room shown on the guest form
    pub fn proceed_to_guest_info(&mut self) -> Result<RoomRecord, ApiError> {
        let rooms = self.store.rooms();
        let primary = self.flow.proceed_to_guest_info(&self.ledger, &rooms)?;
        rooms
            .iter()
            .find(|room| room.id == primary)
            .cloned()
            .ok_or_else(|| {
                ApiError::validation(ValidationField::Inventory, "Selected room not found")
            })
    }

    pub fn set_guest_details(&mut self, guest: GuestDetails) -> Result<(), ApiError> {
        self.flow.set_guest_details(guest)
    }

    pub fn set_payment_method(&mut self, method: Option<String>) -> Result<(), ApiError> {
        self.flow.set_payment_method(method)
    }

    pub fn attach_payment_proof(&mut self, proof: PaymentProof) -> Result<(), ApiError> {
        self.flow.attach_payment_proof(proof)
    }

    pub async fn submit(&mut self) -> Result<Confirmation, ApiError> {
        let hotel_id = self.require_hotel_id()?;
        let rooms = self.store.rooms();
        let ctx = SubmissionContext {
            hotel_id: &hotel_id,
            window: self.stay_window(),
            rooms: &rooms,
            config: &self.config,
        };
        let timeout = self.config.submission_timeout();
        self.flow
            .submit(self.api.as_ref(), &mut self.ledger, &ctx, timeout)
            .await
    }

    pub fn retry(&mut self) -> Result<(), ApiError> {
        self.flow.retry()
    }

    pub fn start_new_booking(&mut self) -> Result<(), ApiError> {
        if self.flow.phase() != BookingPhase::Confirmed {
            return Err(ApiError::validation(
                ValidationField::Phase,
                "The current booking is not finished",
            ));
        }
        self.flow = BookingFlow::new();
        Ok(())
    }

    // Notifications raised by push events since the last call
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = self.notify_rx.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    pub async fn shutdown(&mut self) {
        self.close_listener().await;
        tracing::info!("Booking engine shut down");
    }
}
