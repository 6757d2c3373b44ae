// Inventory store: the last-known room catalog for the active hotel and stay window.
// Snapshots are replaced wholesale; readers keep the previous one while a fetch is in flight.

use crate::api::{ApiError, BookingApi};
use crate::models::{Availability, RoomRecord, StayWindow};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct InventoryStats {
    pub refresh_triggers: AtomicUsize,
    pub fetches_started: AtomicUsize,
    pub fetches_succeeded: AtomicUsize,
    pub fetches_failed: AtomicUsize,
    pub coalesced_triggers: AtomicUsize,
    pub rejected_records: AtomicUsize,
    pub placeholder_installs: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InventoryStatsReport {
    pub refresh_triggers: usize,
    pub fetches_started: usize,
    pub fetches_succeeded: usize,
    pub fetches_failed: usize,
    pub coalesced_triggers: usize,
    pub rejected_records: usize,
    pub placeholder_installs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Authoritative,
    // Non-authoritative catalog shown while the backend is unreachable
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub hotel_id: String,
    pub window: StayWindow,
    pub rooms: Vec<RoomRecord>,
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
}

impl InventorySnapshot {
    pub fn is_placeholder(&self) -> bool {
        self.provenance == Provenance::Placeholder
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomRecord> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    // Every room lands in exactly one of the three views
    pub fn partition(&self) -> RoomPartition {
        let mut partition = RoomPartition::default();
        for room in &self.rooms {
            if room.has_stock() {
                partition.available.push(room.clone());
            } else if room.is_sold_out() {
                partition.sold_out.push(room.clone());
            } else {
                partition.unavailable.push(room.clone());
            }
        }
        partition
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPartition {
    pub available: Vec<RoomRecord>,
    pub sold_out: Vec<RoomRecord>,
    pub unavailable: Vec<RoomRecord>,
}

// Outcome of a listener-driven refresh
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed(usize),
    Coalesced,
    Failed(ApiError),
}

pub struct InventoryStore {
    api: Arc<dyn BookingApi>,
    snapshot: RwLock<Option<Arc<InventorySnapshot>>>,
    has_authoritative: AtomicBool,
    // Bumped by reset; fetches started under an older value are discarded
    generation: AtomicU64,
    in_flight: AtomicUsize,
    placeholder_on_failure: bool,
    stats: InventoryStats,
}

impl InventoryStore {
    pub fn new(api: Arc<dyn BookingApi>, placeholder_on_failure: bool) -> Self {
        Self {
            api,
            snapshot: RwLock::new(None),
            has_authoritative: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            placeholder_on_failure,
            stats: InventoryStats::default(),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<InventorySnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn rooms(&self) -> Vec<RoomRecord> {
        self.snapshot()
            .map(|snapshot| snapshot.rooms.clone())
            .unwrap_or_default()
    }

    pub fn room(&self, room_id: &str) -> Option<RoomRecord> {
        self.snapshot()?.room(room_id).cloned()
    }

    pub fn partition(&self) -> RoomPartition {
        self.snapshot()
            .map(|snapshot| snapshot.partition())
            .unwrap_or_default()
    }

    pub fn is_degraded(&self) -> bool {
        self.snapshot()
            .map_or(false, |snapshot| snapshot.is_placeholder())
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    // Forgets everything learned for the previous hotel, placeholder state included
    pub fn reset(&self) {
        let mut slot = self.snapshot.write();
        *slot = None;
        self.has_authoritative.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Inventory store reset");
    }

    // Fetches the catalog and swaps it in. Never retries on its own.
    pub async fn refresh(
        &self,
        hotel_id: &str,
        window: StayWindow,
    ) -> Result<Vec<RoomRecord>, ApiError> {
        self.stats.refresh_triggers.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight::enter(&self.in_flight);
        self.fetch(guard, hotel_id, window).await
    }

    // Refresh for invalidation events: a fetch already in flight absorbs the trigger
    pub async fn refresh_if_idle(&self, hotel_id: &str, window: StayWindow) -> RefreshOutcome {
        self.stats.refresh_triggers.fetch_add(1, Ordering::SeqCst);
        let Some(guard) = InFlight::enter_if_idle(&self.in_flight) else {
            self.stats.coalesced_triggers.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(hotel_id, "Refresh already in flight, trigger coalesced");
            return RefreshOutcome::Coalesced;
        };
        match self.fetch(guard, hotel_id, window).await {
            Ok(rooms) => RefreshOutcome::Refreshed(rooms.len()),
            Err(e) => RefreshOutcome::Failed(e),
        }
    }

    async fn fetch(
        &self,
        guard: InFlight<'_>,
        hotel_id: &str,
        window: StayWindow,
    ) -> Result<Vec<RoomRecord>, ApiError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.stats.fetches_started.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            hotel_id,
            check_in = ?window.check_in,
            check_out = ?window.check_out,
            "Fetching room inventory"
        );

        let result = self.api.fetch_rooms(hotel_id, &window).await;
        drop(guard);

        match result {
            Ok(records) => {
                let rooms = self.accept_records(hotel_id, records);
                self.install_authoritative(
                    generation,
                    InventorySnapshot {
                        hotel_id: hotel_id.to_string(),
                        window,
                        rooms: rooms.clone(),
                        provenance: Provenance::Authoritative,
                        fetched_at: Utc::now(),
                    },
                );
                self.stats.fetches_succeeded.fetch_add(1, Ordering::SeqCst);
                tracing::info!(hotel_id, rooms = rooms.len(), "Room inventory refreshed");
                Ok(rooms)
            }
            Err(e) => {
                self.stats.fetches_failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(hotel_id, error = %e, "Room inventory fetch failed");
                if self.placeholder_on_failure && !self.has_authoritative.load(Ordering::SeqCst) {
                    self.install_placeholder(generation, hotel_id, window);
                }
                Err(e)
            }
        }
    }

    fn accept_records(&self, hotel_id: &str, records: Vec<RoomRecord>) -> Vec<RoomRecord> {
        let total = records.len();
        let rooms: Vec<RoomRecord> = records
            .into_iter()
            .filter(|room| {
                let ok = room.is_consistent();
                if !ok {
                    tracing::warn!(
                        hotel_id,
                        room_id = %room.id,
                        total_rooms = room.total_rooms,
                        available_count = room.available_count,
                        "Rejecting inconsistent room record"
                    );
                }
                ok
            })
            .collect();
        self.stats
            .rejected_records
            .fetch_add(total - rooms.len(), Ordering::SeqCst);
        rooms
    }

    fn install_authoritative(&self, generation: u64, snapshot: InventorySnapshot) {
        let mut slot = self.snapshot.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(hotel_id = %snapshot.hotel_id, "Discarding inventory fetched before a reset");
            return;
        }
        *slot = Some(Arc::new(snapshot));
        // Flag flips under the same lock the placeholder path checks
        self.has_authoritative.store(true, Ordering::SeqCst);
    }

    fn install_placeholder(&self, generation: u64, hotel_id: &str, window: StayWindow) {
        let mut slot = self.snapshot.write();
        // A real catalog may have landed, or the store was reset, while this fetch was failing
        if self.has_authoritative.load(Ordering::SeqCst)
            || self.generation.load(Ordering::SeqCst) != generation
        {
            return;
        }
        *slot = Some(Arc::new(InventorySnapshot {
            hotel_id: hotel_id.to_string(),
            window,
            rooms: placeholder_catalog(),
            provenance: Provenance::Placeholder,
            fetched_at: Utc::now(),
        }));
        self.stats.placeholder_installs.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(hotel_id, "Serving placeholder room catalog");
    }

    pub fn stats(&self) -> InventoryStatsReport {
        InventoryStatsReport {
            refresh_triggers: self.stats.refresh_triggers.load(Ordering::SeqCst),
            fetches_started: self.stats.fetches_started.load(Ordering::SeqCst),
            fetches_succeeded: self.stats.fetches_succeeded.load(Ordering::SeqCst),
            fetches_failed: self.stats.fetches_failed.load(Ordering::SeqCst),
            coalesced_triggers: self.stats.coalesced_triggers.load(Ordering::SeqCst),
            rejected_records: self.stats.rejected_records.load(Ordering::SeqCst),
            placeholder_installs: self.stats.placeholder_installs.load(Ordering::SeqCst),
        }
    }
}

// Keeps the in-flight count right even when the fetching task is aborted
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }

    // Claims the counter only when nothing else is fetching
    fn enter_if_idle(counter: &'a AtomicUsize) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(clippy::too_many_arguments)]
fn placeholder_room(
    id: &str,
    room_type: &str,
    description: &str,
    base_price: f64,
    (per_adult_price, per_child_price): (f64, f64),
    discount: f64,
    (total_rooms, available_count, max_occupants): (u32, u32, u32),
    bed_type: &str,
    room_size: &str,
) -> RoomRecord {
    RoomRecord {
        id: id.to_string(),
        room_type: room_type.to_string(),
        base_price,
        per_adult_price,
        per_child_price,
        discount,
        tax_percentage: 18.0,
        max_occupants,
        total_rooms,
        available_count,
        availability: Availability::Available,
        bed_type: bed_type.to_string(),
        room_size: room_size.to_string(),
        description: description.to_string(),
        image: None,
    }
}

pub fn placeholder_catalog() -> Vec<RoomRecord> {
    vec![
        placeholder_room(
            "room1",
            "Deluxe Room",
            "Elegant room with comfortable amenities and stunning views.",
            2500.0,
            (100.0, 50.0),
            200.0,
            (10, 8, 2),
            "King Bed",
            "35 sq m",
        ),
        placeholder_room(
            "room2",
            "Executive Room",
            "Premium room with modern amenities and work desk perfect for business travelers.",
            3500.0,
            (120.0, 60.0),
            300.0,
            (6, 5, 2),
            "Queen Bed",
            "45 sq m",
        ),
        placeholder_room(
            "room3",
            "Suite",
            "Spacious suite with separate living area, perfect for families.",
            5500.0,
            (150.0, 75.0),
            500.0,
            (4, 3, 4),
            "King Bed + Sofa",
            "65 sq m",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_server::MockBookingApi;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn room(id: &str, availability: &str, total_rooms: u32, available_count: u32) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            room_type: format!("Type {}", id),
            base_price: 1000.0,
            total_rooms,
            available_count,
            availability: availability.to_string().into(),
            ..Default::default()
        }
    }

    fn window() -> StayWindow {
        StayWindow::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
        )
    }

    fn store_with(api: Arc<MockBookingApi>) -> InventoryStore {
        InventoryStore::new(api, true)
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        let store = store_with(api.clone());
        assert!(store.snapshot().is_none());

        let rooms = store.refresh("h1", window()).await.unwrap();
        assert_eq!(rooms.len(), 1);
        let first = store.snapshot().unwrap();
        assert_eq!(first.provenance, Provenance::Authoritative);
        assert_eq!(first.hotel_id, "h1");

        api.set_rooms(vec![room("b", "Available", 5, 1), room("c", "Available", 2, 0)]);
        store.refresh("h1", window()).await.unwrap();

        let second = store.snapshot().unwrap();
        assert_eq!(second.rooms.len(), 2);
        assert!(second.room("a").is_none());
        // Earlier readers keep the snapshot they were handed
        assert_eq!(first.rooms.len(), 1);
        assert_eq!(api.fetch_windows()[0], ("h1".to_string(), window()));
    }

    #[test]
    fn test_partition_is_disjoint() {
        let snapshot = InventorySnapshot {
            hotel_id: "h1".to_string(),
            window: StayWindow::default(),
            rooms: vec![
                room("in-stock", "Available", 5, 3),
                room("sold-out", "Available", 5, 0),
                room("closed", "Unavailable", 5, 5),
                room("maintenance", "Maintenance", 5, 0),
            ],
            provenance: Provenance::Authoritative,
            fetched_at: Utc::now(),
        };

        let partition = snapshot.partition();
        let ids = |rooms: &[RoomRecord]| rooms.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&partition.available), vec!["in-stock"]);
        assert_eq!(ids(&partition.sold_out), vec!["sold-out"]);
        assert_eq!(ids(&partition.unavailable), vec!["closed", "maintenance"]);
        assert_eq!(
            partition.available.len() + partition.sold_out.len() + partition.unavailable.len(),
            snapshot.rooms.len()
        );
    }

    #[tokio::test]
    async fn test_failure_without_prior_snapshot_installs_placeholder() {
        let api = Arc::new(MockBookingApi::new());
        api.fail_rooms(ApiError::network());
        let store = store_with(api.clone());

        let result = store.refresh("h1", window()).await;
        assert_eq!(result, Err(ApiError::network()));
        assert!(store.is_degraded());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.rooms.len(), 3);
        assert_eq!(snapshot.hotel_id, "h1");
        assert_eq!(store.stats().placeholder_installs, 1);
    }

    #[tokio::test]
    async fn test_placeholder_never_returns_after_real_fetch() {
        let api = Arc::new(MockBookingApi::new());
        api.fail_rooms(ApiError::network());
        let store = store_with(api.clone());
        let _ = store.refresh("h1", window()).await;
        assert!(store.is_degraded());

        api.set_rooms(vec![room("real", "Available", 3, 3)]);
        store.refresh("h1", window()).await.unwrap();
        assert!(!store.is_degraded());

        api.fail_rooms(ApiError::network());
        assert!(store.refresh("h1", window()).await.is_err());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.provenance, Provenance::Authoritative);
        assert_eq!(snapshot.rooms[0].id, "real");
        assert_eq!(store.stats().placeholder_installs, 1);
    }

    #[tokio::test]
    async fn test_placeholder_can_be_disabled() {
        let api = Arc::new(MockBookingApi::new());
        api.fail_rooms(ApiError::network());
        let store = InventoryStore::new(api, false);

        assert!(store.refresh("h1", window()).await.is_err());
        assert!(store.snapshot().is_none());
        assert!(store.partition().available.is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_records_are_rejected() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![
            room("ok", "Available", 4, 4),
            room("broken", "Available", 2, 7),
        ]));
        let store = store_with(api);

        let rooms = store.refresh("h1", window()).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "ok");
        assert_eq!(store.stats().rejected_records, 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_and_coalescing() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        let store = Arc::new(store_with(api.clone()));
        store.refresh("h1", window()).await.unwrap();

        api.set_rooms(vec![room("b", "Available", 5, 2)]);
        api.set_fetch_delay(100);

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.refresh_if_idle("h1", window()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Old snapshot still served while the fetch is in flight
        assert!(store.is_fetching());
        assert_eq!(store.rooms()[0].id, "a");
        assert_eq!(store.refresh_if_idle("h1", window()).await, RefreshOutcome::Coalesced);

        assert_eq!(slow.await.unwrap(), RefreshOutcome::Refreshed(1));
        assert_eq!(store.rooms()[0].id, "b");

        let stats = store.stats();
        assert_eq!(stats.refresh_triggers, 3);
        assert_eq!(stats.fetches_started, 2);
        assert_eq!(stats.coalesced_triggers, 1);
        assert_eq!(api.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_aborted_fetch_does_not_leave_store_busy() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        api.set_fetch_delay(1_000);
        let store = Arc::new(store_with(api.clone()));

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.refresh("h1", window()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.is_fetching());

        task.abort();
        let _ = task.await;
        assert!(!store.is_fetching());
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_reset_forgets_previous_hotel() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        let store = store_with(api.clone());
        store.refresh("hotelA", window()).await.unwrap();

        store.reset();
        assert!(store.snapshot().is_none());
        assert!(store.rooms().is_empty());

        // With no real catalog for the new hotel, the placeholder is allowed again
        api.fail_rooms(ApiError::network());
        assert!(store.refresh("hotelB", window()).await.is_err());
        assert!(store.is_degraded());
        assert_eq!(store.snapshot().unwrap().hotel_id, "hotelB");
    }

    #[tokio::test]
    async fn test_fetch_started_before_reset_is_discarded() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        api.set_fetch_delay(100);
        let store = Arc::new(store_with(api.clone()));

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.refresh("hotelA", window()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.reset();

        assert!(pending.await.unwrap().is_ok());
        assert!(store.snapshot().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_idle_refreshes_start_one_fetch() {
        let api = Arc::new(MockBookingApi::with_rooms(vec![room("a", "Available", 5, 2)]));
        api.set_fetch_delay(200);
        let store = Arc::new(store_with(api.clone()));

        let mut triggers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = store.clone();
            triggers.spawn(async move { store.refresh_if_idle("h1", window()).await });
        }
        let mut refreshed = 0;
        while let Some(outcome) = triggers.join_next().await {
            if let RefreshOutcome::Refreshed(_) = outcome.unwrap() {
                refreshed += 1;
            }
        }

        assert_eq!(refreshed, 1);
        assert_eq!(api.fetch_count(), 1);
        assert_eq!(store.stats().coalesced_triggers, 7);
        assert!(!store.is_fetching());
    }

    #[test]
    fn test_placeholder_catalog_is_consistent() {
        let catalog = placeholder_catalog();
        assert_eq!(catalog.len(), 3);
        assert!(catalog.iter().all(RoomRecord::is_consistent));
        assert!(catalog.iter().all(RoomRecord::has_stock));
        assert_eq!(catalog[0].base_price, 2500.0);
    }
}
