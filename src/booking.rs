// Booking submission state machine and payload assembly.
//
// Idle -> RoomsChosen -> GuestInfoPending -> Submitting -> Confirmed
//                                                       \-> Failed -> GuestInfoPending (retry)

use crate::api::{ApiError, BookingApi, EngineConfig, ValidationErrors, ValidationField};
use crate::ledger::SelectionLedger;
use crate::models::{RoomRecord, StayWindow};
use crate::pricing::{calculate_totals, PricingTotals};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const PROVISIONAL_ID_LEN: usize = 8;
const PROVISIONAL_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRANSACTION_SUFFIX_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TRANSACTION_SUFFIX_LEN: usize = 9;

pub fn generate_provisional_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PROVISIONAL_ID_LEN)
        .map(|_| PROVISIONAL_ID_CHARSET[rng.gen_range(0..PROVISIONAL_ID_CHARSET.len())] as char)
        .collect()
}

pub fn generate_transaction_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TRANSACTION_SUFFIX_LEN)
        .map(|_| {
            TRANSACTION_SUFFIX_CHARSET[rng.gen_range(0..TRANSACTION_SUFFIX_CHARSET.len())] as char
        })
        .collect();
    format!("TXN_{}_{}", now.timestamp_millis(), suffix)
}

// First non-empty of confirmationId, bookingId, id in a submission response
pub fn authoritative_confirmation_id(body: &Value) -> Option<String> {
    ["confirmationId", "bookingId", "id"]
        .iter()
        .find_map(|key| match body.get(*key)? {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub country: String,
}

impl GuestDetails {
    fn fields(&self) -> [(ValidationField, &str, &'static str); 6] {
        [
            (ValidationField::FirstName, &self.first_name, "First name is required"),
            (ValidationField::LastName, &self.last_name, "Last name is required"),
            (ValidationField::Email, &self.email, "Email is required"),
            (ValidationField::Phone, &self.phone, "Phone is required"),
            (ValidationField::City, &self.city, "City is required"),
            (ValidationField::Country, &self.country, "Country is required"),
        ]
    }

    pub fn validate(&self, errors: &mut ValidationErrors) {
        for (field, value, message) in self.fields() {
            if value.trim().is_empty() {
                errors.push(field, message);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value, _)| value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentProof {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl PaymentProof {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    pub room_id: String,
    pub room_type: String,
    pub price_per_night: f64,
    pub max_guests: u32,
    pub bed_type: String,
    pub room_size: String,
}

impl From<&RoomRecord> for RoomDetails {
    fn from(room: &RoomRecord) -> Self {
        Self {
            room_id: room.id.clone(),
            room_type: room.room_type.clone(),
            price_per_night: room.base_price,
            max_guests: room.max_occupants,
            bed_type: room.bed_type.clone(),
            room_size: room.room_size.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    pub check_in: String,
    pub check_out: String,
    pub number_of_rooms: u32,
    pub number_of_adults: u32,
    pub number_of_children: u32,
    pub number_of_nights: u32,
    pub hotel_id: String,
    pub room_selections: SelectionLedger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountDetails {
    pub room_charges: f64,
    pub guest_charges: f64,
    pub subtotal: f64,
    pub taxes_and_fees: f64,
    pub discount: f64,
    pub grand_total: f64,
    pub currency: String,
}

impl AmountDetails {
    fn new(totals: &PricingTotals, currency: &str) -> Self {
        Self {
            room_charges: totals.room_charges,
            guest_charges: totals.guest_charges,
            subtotal: totals.subtotal,
            taxes_and_fees: totals.taxes,
            discount: totals.discount,
            grand_total: totals.total,
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub payment_method: String,
    pub payment_status: String,
    pub transaction_id: String,
    pub payment_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingMetadata {
    pub booking_date: DateTime<Utc>,
    pub booking_source: String,
    pub user_agent: String,
    pub ip_address: String,
    pub frontend_confirmation_id: String,
}

// The complete multipart package. Built in one go or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSubmission {
    pub guest_details: GuestDetails,
    pub room_details: RoomDetails,
    pub booking_details: BookingDetails,
    pub amount_details: AmountDetails,
    pub payment_details: PaymentDetails,
    pub booking_metadata: BookingMetadata,
    payment_proof: PaymentProof,
    encoded: Vec<(&'static str, String)>,
}

impl BookingSubmission {
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        guest_details: GuestDetails,
        room_details: RoomDetails,
        booking_details: BookingDetails,
        amount_details: AmountDetails,
        payment_details: PaymentDetails,
        booking_metadata: BookingMetadata,
        payment_proof: PaymentProof,
    ) -> Result<Self, serde_json::Error> {
        let encoded = vec![
            ("guestDetails", serde_json::to_string(&guest_details)?),
            ("roomDetails", serde_json::to_string(&room_details)?),
            ("bookingDetails", serde_json::to_string(&booking_details)?),
            ("amountDetails", serde_json::to_string(&amount_details)?),
            ("paymentDetails", serde_json::to_string(&payment_details)?),
            ("bookingMetadata", serde_json::to_string(&booking_metadata)?),
        ];

        Ok(Self {
            guest_details,
            room_details,
            booking_details,
            amount_details,
            payment_details,
            booking_metadata,
            payment_proof,
            encoded,
        })
    }

    pub fn provisional_id(&self) -> &str {
        &self.booking_metadata.frontend_confirmation_id
    }

    pub fn payment_proof(&self) -> &PaymentProof {
        &self.payment_proof
    }

    // JSON text parts in wire order; the payment proof travels as its own binary part
    pub fn encoded_parts(&self) -> &[(&'static str, String)] {
        &self.encoded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    Server,
    // Client-generated fallback, the server returned no identifier
    Provisional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub id: String,
    pub source: ConfirmationSource,
    pub provisional_id: String,
    pub grand_total: f64,
    pub confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn is_authoritative(&self) -> bool {
        self.source == ConfirmationSource::Server
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Idle,
    RoomsChosen,
    GuestInfoPending,
    Submitting,
    Confirmed,
    Failed,
}

// What the flow reads from the rest of the engine when it assembles a submission
pub struct SubmissionContext<'a> {
    pub hotel_id: &'a str,
    pub window: StayWindow,
    pub rooms: &'a [RoomRecord],
    pub config: &'a EngineConfig,
}

#[derive(Debug)]
pub struct BookingFlow {
    phase: BookingPhase,
    guest: GuestDetails,
    payment_method: Option<String>,
    payment_proof: Option<PaymentProof>,
    primary_room_id: Option<String>,
    confirmation: Option<Confirmation>,
    last_error: Option<ApiError>,
}

impl Default for BookingFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_stay(window: &StayWindow, errors: &mut ValidationErrors) {
    if window.check_in.is_none() {
        errors.push(ValidationField::CheckIn, "Check-in date is required");
    }
    if window.check_out.is_none() {
        errors.push(ValidationField::CheckOut, "Check-out date is required");
    }
    if window.is_complete() && window.check_in == window.check_out {
        errors.push(
            ValidationField::StayDates,
            "Check-in and check-out dates must be different",
        );
    }
}

fn validate_selection(ledger: &SelectionLedger, errors: &mut ValidationErrors) {
    if !ledger.has_any_selection() {
        errors.push(
            ValidationField::Selection,
            "You need to select at least one room to proceed",
        );
    }
}

impl BookingFlow {
    pub fn new() -> Self {
        Self {
            phase: BookingPhase::Idle,
            guest: GuestDetails::default(),
            payment_method: None,
            payment_proof: None,
            primary_room_id: None,
            confirmation: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> BookingPhase {
        self.phase
    }

    pub fn guest(&self) -> &GuestDetails {
        &self.guest
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn payment_proof(&self) -> Option<&PaymentProof> {
        self.payment_proof.as_ref()
    }

    // Display-only: the first selected room type. The full ledger is always billed.
    pub fn primary_room_id(&self) -> Option<&str> {
        self.primary_room_id.as_deref()
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        self.confirmation.as_ref()
    }

    pub fn last_error(&self) -> Option<&ApiError> {
        self.last_error.as_ref()
    }

    fn transition(&mut self, to: BookingPhase) {
        tracing::info!(from = ?self.phase, to = ?to, "Booking phase changed");
        self.phase = to;
    }

    fn ensure_editable(&self) -> Result<(), ApiError> {
        match self.phase {
            BookingPhase::Submitting => Err(ApiError::validation(
                ValidationField::Phase,
                "A booking is already being submitted",
            )),
            BookingPhase::Confirmed => Err(ApiError::validation(
                ValidationField::Phase,
                "This booking is already confirmed",
            )),
            _ => Ok(()),
        }
    }

    // Idle -> RoomsChosen. Also re-entered when the user changes rooms mid-flow.
    pub fn choose_rooms(
        &mut self,
        ledger: &SelectionLedger,
        window: &StayWindow,
    ) -> Result<(), ApiError> {
        self.ensure_editable()?;
        let mut errors = ValidationErrors::default();
        validate_selection(ledger, &mut errors);
        validate_stay(window, &mut errors);
        errors.into_result()?;

        self.primary_room_id = None;
        self.transition(BookingPhase::RoomsChosen);
        Ok(())
    }

    // RoomsChosen -> GuestInfoPending
    pub fn proceed_to_guest_info<'a>(
        &mut self,
        ledger: &'a SelectionLedger,
        rooms: &[RoomRecord],
    ) -> Result<&'a str, ApiError> {
        if !matches!(
            self.phase,
            BookingPhase::RoomsChosen | BookingPhase::GuestInfoPending
        ) {
            return Err(ApiError::validation(
                ValidationField::Phase,
                "Choose rooms and dates before entering guest details",
            ));
        }

        let primary = ledger.first_selected_room_id().ok_or_else(|| {
            ApiError::validation(
                ValidationField::Selection,
                "You need to select at least one room to proceed",
            )
        })?;
        if !rooms.iter().any(|room| room.id == primary) {
            return Err(ApiError::validation(
                ValidationField::Inventory,
                "The selected room is no longer offered, please choose again",
            ));
        }

        self.primary_room_id = Some(primary.to_string());
        self.transition(BookingPhase::GuestInfoPending);
        Ok(primary)
    }

    pub fn set_guest_details(&mut self, guest: GuestDetails) -> Result<(), ApiError> {
        self.ensure_editable()?;
        self.guest = guest;
        Ok(())
    }

    pub fn set_payment_method(&mut self, method: Option<String>) -> Result<(), ApiError> {
        self.ensure_editable()?;
        self.payment_method = method.filter(|method| !method.trim().is_empty());
        Ok(())
    }

    pub fn attach_payment_proof(&mut self, proof: PaymentProof) -> Result<(), ApiError> {
        self.ensure_editable()?;
        self.payment_proof = Some(proof);
        Ok(())
    }

    pub fn clear_payment_proof(&mut self) -> Result<(), ApiError> {
        self.ensure_editable()?;
        self.payment_proof = None;
        Ok(())
    }

    // Failed -> GuestInfoPending, keeping everything the user entered
    pub fn retry(&mut self) -> Result<(), ApiError> {
        if self.phase != BookingPhase::Failed {
            return Err(ApiError::validation(
                ValidationField::Phase,
                "Only a failed booking can be retried",
            ));
        }
        self.last_error = None;
        self.transition(BookingPhase::GuestInfoPending);
        Ok(())
    }

    // GuestInfoPending -> Submitting. Every check runs before anything is assembled.
    pub fn prepare_submission(
        &mut self,
        ledger: &SelectionLedger,
        ctx: &SubmissionContext<'_>,
    ) -> Result<BookingSubmission, ApiError> {
        if self.phase != BookingPhase::GuestInfoPending {
            return Err(ApiError::validation(
                ValidationField::Phase,
                "Guest details are not being collected",
            ));
        }

        let mut errors = ValidationErrors::default();
        self.guest.validate(&mut errors);
        match &self.payment_proof {
            None => errors.push(
                ValidationField::PaymentProof,
                "Payment proof image is required to confirm the booking",
            ),
            Some(proof) if proof.bytes.is_empty() => {
                errors.push(ValidationField::PaymentProof, "Payment proof file is empty")
            }
            Some(_) => {}
        }
        validate_selection(ledger, &mut errors);
        validate_stay(&ctx.window, &mut errors);
        for conflict in ledger.conflicts(ctx.rooms) {
            errors.push(
                ValidationField::Inventory,
                format!(
                    "Only {} {} left, {} selected",
                    conflict.available, conflict.room_type, conflict.requested
                ),
            );
        }

        // The ledger may have changed since guest info started; re-resolve the display room
        let primary = ledger
            .first_selected_room_id()
            .and_then(|id| ctx.rooms.iter().find(|room| room.id == id));
        if ledger.has_any_selection() && primary.is_none() {
            errors.push(
                ValidationField::Inventory,
                "The selected room is no longer offered, please choose again",
            );
        }
        errors.into_result()?;

        let (Some(primary), Some(proof)) = (primary, self.payment_proof.clone()) else {
            return Err(ApiError::validation(
                ValidationField::Payload,
                "Booking is incomplete",
            ));
        };

        let now = Utc::now();
        let nights = ctx.window.nights();
        let totals = calculate_totals(ctx.rooms, ledger, nights);
        let provisional_id = generate_provisional_id();
        let payment_method = self
            .payment_method
            .clone()
            .unwrap_or_else(|| ctx.config.default_payment_method.clone());

        let submission = BookingSubmission::assemble(
            self.guest.clone(),
            RoomDetails::from(primary),
            BookingDetails {
                check_in: ctx.window.check_in_param().unwrap_or_default(),
                check_out: ctx.window.check_out_param().unwrap_or_default(),
                number_of_rooms: totals.total_rooms,
                number_of_adults: totals.total_adults,
                number_of_children: totals.total_children,
                number_of_nights: nights,
                hotel_id: ctx.hotel_id.to_string(),
                room_selections: ledger.clone(),
            },
            AmountDetails::new(&totals, &ctx.config.currency),
            PaymentDetails {
                payment_method,
                payment_status: "pending".to_string(),
                transaction_id: generate_transaction_id(now),
                payment_date: now,
            },
            BookingMetadata {
                booking_date: now,
                booking_source: ctx.config.booking_source.clone(),
                user_agent: ctx.config.client_environment.clone(),
                ip_address: "unknown".to_string(),
                frontend_confirmation_id: provisional_id,
            },
            proof,
        )
        .map_err(|e| {
            ApiError::validation(
                ValidationField::Payload,
                format!("Booking could not be encoded: {}", e),
            )
        })?;

        self.primary_room_id = Some(primary.id.clone());
        self.transition(BookingPhase::Submitting);
        Ok(submission)
    }

    // Submitting -> Confirmed | Failed
    pub fn complete(
        &mut self,
        submission: &BookingSubmission,
        outcome: Result<Value, ApiError>,
        ledger: &mut SelectionLedger,
    ) -> Result<Confirmation, ApiError> {
        match outcome {
            Ok(body) => {
                let (id, source) = match authoritative_confirmation_id(&body) {
                    Some(id) => (id, ConfirmationSource::Server),
                    None => {
                        tracing::warn!(
                            provisional_id = submission.provisional_id(),
                            "Server returned no confirmation id, using provisional id"
                        );
                        (
                            submission.provisional_id().to_string(),
                            ConfirmationSource::Provisional,
                        )
                    }
                };
                let confirmation = Confirmation {
                    id,
                    source,
                    provisional_id: submission.provisional_id().to_string(),
                    grand_total: submission.amount_details.grand_total,
                    confirmed_at: Utc::now(),
                };

                ledger.clear();
                self.guest = GuestDetails::default();
                self.payment_method = None;
                self.payment_proof = None;
                self.primary_room_id = None;
                self.last_error = None;
                self.confirmation = Some(confirmation.clone());
                self.transition(BookingPhase::Confirmed);
                tracing::info!(
                    confirmation_id = %confirmation.id,
                    authoritative = confirmation.is_authoritative(),
                    "Booking confirmed"
                );
                Ok(confirmation)
            }
            Err(e) => {
                tracing::error!(
                    provisional_id = submission.provisional_id(),
                    error = %e,
                    "Booking submission failed"
                );
                self.last_error = Some(e.clone());
                self.transition(BookingPhase::Failed);
                Err(e)
            }
        }
    }

    // Full submission: validate, assemble, send within the timeout, settle the outcome.
    // Validation failures return before anything is sent.
    pub async fn submit(
        &mut self,
        api: &dyn BookingApi,
        ledger: &mut SelectionLedger,
        ctx: &SubmissionContext<'_>,
        timeout: Duration,
    ) -> Result<Confirmation, ApiError> {
        let submission = self.prepare_submission(ledger, ctx)?;

        let outcome = match tokio::time::timeout(timeout, api.submit_booking(&submission)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Booking submission timed out");
                Err(ApiError::network())
            }
        };
        self.complete(&submission, outcome, ledger)
    }
}
