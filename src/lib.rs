// Room selection and pricing reconciliation engine for a hotel booking client

pub mod api;
pub mod booking;
pub mod engine;
pub mod inventory;
pub mod ledger;
pub mod listener;
pub mod models;
pub mod pricing;

// Re-export key types for convenience
pub use api::{ApiError, BookingApi, ClientError, EngineConfig, HttpBookingApi, ValidationErrors};
pub use booking::{
    BookingFlow, BookingPhase, BookingSubmission, Confirmation, ConfirmationSource, GuestDetails,
    PaymentProof,
};
pub use engine::BookingEngine;
pub use inventory::{InventorySnapshot, InventoryStore, Provenance, RoomPartition};
pub use ledger::{SelectionEntry, SelectionLedger};
pub use listener::{ListenerHandle, PushChannel, WsPushChannel};
pub use models::{Hotel, Notification, RoomEvent, RoomEventKind, RoomRecord, StayWindow};
pub use pricing::{calculate_totals, PricingTotals};
