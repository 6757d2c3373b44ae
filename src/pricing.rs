// Pricing calculator: derives the itemized total from an inventory snapshot and the ledger.
// Pure and cheap, recompute it whenever either input changes.

use crate::ledger::SelectionLedger;
use crate::models::RoomRecord;
use serde::Serialize;
use std::collections::HashMap;

// Flat tax applied to the subtotal, independent of each room's taxPercentage field
pub const TAX_PERCENTAGE: f64 = 18.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTotals {
    pub room_charges: f64,
    pub guest_charges: f64,
    pub subtotal: f64,
    pub taxes: f64,
    pub discount: f64,
    pub total: f64,
    pub total_rooms: u32,
    pub total_adults: u32,
    pub total_children: u32,
    // Active selections whose room id is missing from the snapshot
    #[serde(skip)]
    pub stale_room_ids: Vec<String>,
}

// Rounds to the nearest whole currency unit, halves away from zero.
// All priced amounts are non-negative, so this is round-half-up.
pub fn round_currency(amount: f64) -> f64 {
    amount.round()
}

pub fn tax_for(subtotal: f64) -> f64 {
    // Multiply before dividing so whole-unit subtotals stay exact
    round_currency(subtotal * TAX_PERCENTAGE / 100.0)
}

pub fn calculate_totals(
    rooms: &[RoomRecord],
    ledger: &SelectionLedger,
    nights: u32,
) -> PricingTotals {
    let by_id: HashMap<&str, &RoomRecord> =
        rooms.iter().map(|room| (room.id.as_str(), room)).collect();
    let nights = f64::from(nights);

    let mut totals = PricingTotals::default();
    for entry in ledger.active_entries() {
        let Some(room) = by_id.get(entry.room_id.as_str()) else {
            totals.stale_room_ids.push(entry.room_id.clone());
            continue;
        };

        totals.room_charges += room.base_price * nights * f64::from(entry.room_count);
        // Both child bands pay the same per-child rate
        totals.guest_charges += f64::from(entry.adults) * room.per_adult_price
            + f64::from(entry.child_age_5_to_12) * room.per_child_price
            + f64::from(entry.child_below_5) * room.per_child_price;

        totals.total_rooms = totals.total_rooms.saturating_add(entry.room_count);
        totals.total_adults = totals.total_adults.saturating_add(entry.adults);
        totals.total_children = totals.total_children.saturating_add(entry.children());
    }

    if !totals.stale_room_ids.is_empty() {
        tracing::debug!(
            stale = ?totals.stale_room_ids,
            "Selections not in the current snapshot were left out of the total"
        );
    }

    totals.subtotal = totals.room_charges + totals.guest_charges;
    totals.taxes = tax_for(totals.subtotal);
    // Per-room discounts are not applied at the aggregate level
    totals.discount = 0.0;
    totals.total = totals.subtotal + totals.taxes - totals.discount;
    totals
}
