// Selection ledger: the user's chosen quantity and occupants per room type

use crate::models::RoomRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEntry {
    pub room_id: String,
    pub room_count: u32,
    pub adults: u32,
    #[serde(rename = "childAge5to12")]
    pub child_age_5_to_12: u32,
    #[serde(rename = "childBelow5")]
    pub child_below_5: u32,
}

impl SelectionEntry {
    pub fn new(room_id: impl Into<String>, room_count: u32, adults: u32) -> Self {
        Self {
            room_id: room_id.into(),
            room_count,
            adults,
            child_age_5_to_12: 0,
            child_below_5: 0,
        }
    }

    pub fn with_children(mut self, child_age_5_to_12: u32, child_below_5: u32) -> Self {
        self.child_age_5_to_12 = child_age_5_to_12;
        self.child_below_5 = child_below_5;
        self
    }

    // Zero-room entries stay in the ledger but count for nothing
    pub fn is_active(&self) -> bool {
        self.room_count > 0
    }

    pub fn children(&self) -> u32 {
        self.child_age_5_to_12.saturating_add(self.child_below_5)
    }
}

// A selection asking for more rooms than the latest snapshot has left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConflict {
    pub room_id: String,
    pub room_type: String,
    pub requested: u32,
    pub available: u32,
}

// Keyed by room id, iterated in first-insertion order.
// Serializes as the `roomSelections` object of the booking payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct SelectionLedger {
    entries: IndexMap<String, SelectionEntry>,
}

impl SelectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // Upsert, last write wins. An existing room keeps its position in iteration order.
    pub fn set_selection(&mut self, room_id: &str, mut entry: SelectionEntry) {
        entry.room_id = room_id.to_string();
        tracing::debug!(
            room_id,
            room_count = entry.room_count,
            adults = entry.adults,
            "Selection updated"
        );
        self.entries.insert(room_id.to_string(), entry);
    }

    pub fn get(&self, room_id: &str) -> Option<&SelectionEntry> {
        self.entries.get(room_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.values()
    }

    pub fn active_entries(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.values().filter(|entry| entry.is_active())
    }

    pub fn total_selected_rooms(&self) -> u32 {
        self.active_entries()
            .fold(0u32, |total, entry| total.saturating_add(entry.room_count))
    }

    pub fn has_any_selection(&self) -> bool {
        self.active_entries().next().is_some()
    }

    pub fn first_selected_room_id(&self) -> Option<&str> {
        self.active_entries().next().map(|entry| entry.room_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // Rooms still in the snapshot whose available count fell below the selection.
    // Rooms missing from the snapshot are priced as stale, not reported here.
    pub fn conflicts(&self, rooms: &[RoomRecord]) -> Vec<InventoryConflict> {
        self.active_entries()
            .filter_map(|entry| {
                let room = rooms.iter().find(|room| room.id == entry.room_id)?;
                (entry.room_count > room.available_count).then(|| InventoryConflict {
                    room_id: entry.room_id.clone(),
                    room_type: room.room_type.clone(),
                    requested: entry.room_count,
                    available: room.available_count,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str, available_count: u32) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            room_type: format!("{} type", id),
            total_rooms: 10,
            available_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", 1, 2));
        ledger.set_selection("r1", SelectionEntry::new("r1", 3, 4));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("r1").unwrap().room_count, 3);
        assert_eq!(ledger.total_selected_rooms(), 3);
    }

    #[test]
    fn test_key_overrides_entry_room_id() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r2", SelectionEntry::new("something-else", 1, 1));
        assert_eq!(ledger.get("r2").unwrap().room_id, "r2");
    }

    #[test]
    fn test_zero_count_entries_are_not_selections() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", 0, 2));

        assert_eq!(ledger.len(), 1);
        assert!(!ledger.has_any_selection());
        assert_eq!(ledger.total_selected_rooms(), 0);
        assert_eq!(ledger.first_selected_room_id(), None);
    }

    #[test]
    fn test_first_selected_room_follows_insertion_order() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r3", SelectionEntry::new("r3", 0, 0));
        ledger.set_selection("r2", SelectionEntry::new("r2", 1, 1));
        ledger.set_selection("r1", SelectionEntry::new("r1", 2, 2));
        assert_eq!(ledger.first_selected_room_id(), Some("r2"));

        // Re-selecting r3 keeps its first slot, so it becomes the first active entry
        ledger.set_selection("r3", SelectionEntry::new("r3", 1, 1));
        assert_eq!(ledger.first_selected_room_id(), Some("r3"));
        assert_eq!(ledger.total_selected_rooms(), 4);
    }

    #[test]
    fn test_conflicts_only_for_known_rooms_over_available() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", 3, 2));
        ledger.set_selection("r2", SelectionEntry::new("r2", 1, 1));
        ledger.set_selection("gone", SelectionEntry::new("gone", 5, 1));

        let conflicts = ledger.conflicts(&[room("r1", 2), room("r2", 4)]);
        assert_eq!(
            conflicts,
            vec![InventoryConflict {
                room_id: "r1".to_string(),
                room_type: "r1 type".to_string(),
                requested: 3,
                available: 2,
            }]
        );
    }

    #[test]
    fn test_serializes_as_room_selections_object() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", 1, 2).with_children(1, 1));

        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "r1": {
                    "roomId": "r1",
                    "roomCount": 1,
                    "adults": 2,
                    "childAge5to12": 1,
                    "childBelow5": 1
                }
            })
        );
    }

    #[test]
    fn test_counts_saturate_instead_of_overflowing() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", u32::MAX, 1).with_children(u32::MAX, 2));
        ledger.set_selection("r2", SelectionEntry::new("r2", 3, 1));

        assert_eq!(ledger.get("r1").unwrap().children(), u32::MAX);
        assert_eq!(ledger.total_selected_rooms(), u32::MAX);
    }

    #[test]
    fn test_clear() {
        let mut ledger = SelectionLedger::new();
        ledger.set_selection("r1", SelectionEntry::new("r1", 1, 2));
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(!ledger.has_any_selection());
    }
}
