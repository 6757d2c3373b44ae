// Wire and domain records shared by the inventory, ledger, pricing and booking modules

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Availability flag as sent by the rooms endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Other(String),
}

// A record without the flag is not bookable
impl Default for Availability {
    fn default() -> Self {
        Availability::Other(String::new())
    }
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Availability::Available => "Available",
            Availability::Other(value) => value,
        }
    }
}

impl From<String> for Availability {
    fn from(value: String) -> Self {
        if value == "Available" {
            Availability::Available
        } else {
            Availability::Other(value)
        }
    }
}

impl Serialize for Availability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Availability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(String::deserialize(deserializer)?.into())
    }
}

// One bookable room type. Missing numeric fields default to zero like the catalog API does.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: String,
    #[serde(rename = "pricePerNight")]
    pub base_price: f64,
    pub per_adult_price: f64,
    pub per_child_price: f64,
    pub discount: f64,
    pub tax_percentage: f64,
    #[serde(rename = "maxGuests")]
    pub max_occupants: u32,
    pub total_rooms: u32,
    pub available_count: u32,
    pub availability: Availability,
    pub bed_type: String,
    pub room_size: String,
    #[serde(rename = "roomDescription")]
    pub description: String,
    pub image: Option<String>,
}

impl RoomRecord {
    // availableCount can never exceed the room type's inventory
    pub fn is_consistent(&self) -> bool {
        !self.id.is_empty() && self.available_count <= self.total_rooms
    }

    pub fn has_stock(&self) -> bool {
        self.availability.is_available() && self.available_count > 0
    }

    pub fn is_sold_out(&self) -> bool {
        self.availability.is_available() && self.available_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Hotel {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub contact: String,
    pub images: Vec<String>,
    pub path: String,
}

// Check-in/check-out pair. Either side stays unset until the user picks a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StayWindow {
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
}

impl StayWindow {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            check_in: Some(check_in),
            check_out: Some(check_out),
        }
    }

    // Parses the date inputs as typed by the user; empty strings leave the side unset
    pub fn parse(check_in: &str, check_out: &str) -> Result<Self, chrono::ParseError> {
        fn parse_side(value: &str) -> Result<Option<NaiveDate>, chrono::ParseError> {
            let value = value.trim();
            if value.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map(Some)
        }

        Ok(Self {
            check_in: parse_side(check_in)?,
            check_out: parse_side(check_out)?,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_some()
    }

    // Whole days between the dates. Unset or equal dates fall back to 1 night for
    // display and pricing only; booking validation rejects them separately.
    pub fn nights(&self) -> u32 {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => {
                let days = (check_out - check_in).num_days().unsigned_abs();
                u32::try_from(days).unwrap_or(u32::MAX).max(1)
            }
            _ => 1,
        }
    }

    pub fn check_in_param(&self) -> Option<String> {
        self.check_in.map(|date| date.format("%Y-%m-%d").to_string())
    }

    pub fn check_out_param(&self) -> Option<String> {
        self.check_out.map(|date| date.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    Created,
    Updated,
    Deleted,
}

impl RoomEventKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "roomCreated" => Some(RoomEventKind::Created),
            "roomUpdated" => Some(RoomEventKind::Updated),
            "roomDeleted" => Some(RoomEventKind::Deleted),
            _ => None,
        }
    }
}

// Invalidation event delivered by the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub kind: RoomEventKind,
    pub hotel_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn for_room_event(kind: RoomEventKind) -> Self {
        let (title, description) = match kind {
            RoomEventKind::Created => ("New room added!", "Room inventory has been updated."),
            RoomEventKind::Updated => ("Room updated!", "Room information has been updated."),
            RoomEventKind::Deleted => ("Room removed!", "A room has been removed from inventory."),
        };
        Self {
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_room_record_from_catalog_json() {
        let json = r#"{
            "_id": "room1",
            "hotel": "h1",
            "type": "Deluxe Room",
            "totalRooms": 10,
            "pricePerNight": 2500,
            "bedType": "King Bed",
            "perAdultPrice": 100,
            "perChildPrice": 50,
            "discount": 200,
            "taxPercentage": 18,
            "maxGuests": 2,
            "roomSize": "35 sq m",
            "availability": "Available",
            "availableCount": 8
        }"#;

        let room: RoomRecord = serde_json::from_str(json).unwrap();
        assert_eq!(room.id, "room1");
        assert_eq!(room.room_type, "Deluxe Room");
        assert_eq!(room.base_price, 2500.0);
        assert_eq!(room.available_count, 8);
        assert_eq!(room.availability, Availability::Available);
        assert!(room.is_consistent());
        assert!(room.has_stock());
        assert_eq!(room.image, None);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let room: RoomRecord =
            serde_json::from_str(r#"{"_id": "r9", "availability": "Maintenance"}"#).unwrap();
        assert_eq!(room.base_price, 0.0);
        assert_eq!(room.available_count, 0);
        assert_eq!(room.availability, Availability::Other("Maintenance".to_string()));
        assert!(!room.has_stock());
        assert!(!room.is_sold_out());
    }

    #[test]
    fn test_missing_availability_is_not_bookable() {
        let room: RoomRecord =
            serde_json::from_str(r#"{"_id": "r2", "totalRooms": 3, "availableCount": 3}"#).unwrap();
        assert!(!room.availability.is_available());
        assert!(!room.has_stock());
    }

    #[test]
    fn test_available_count_above_total_is_inconsistent() {
        let room = RoomRecord {
            id: "r1".to_string(),
            total_rooms: 2,
            available_count: 3,
            ..Default::default()
        };
        assert!(!room.is_consistent());
    }

    #[test_case("2025-06-01", "2025-06-03", 2; "forward range")]
    #[test_case("2025-06-03", "2025-06-01", 2; "reversed range uses absolute difference")]
    #[test_case("2025-06-01", "2025-06-01", 1; "equal dates fall back to one night")]
    #[test_case("2025-12-30", "2026-01-04", 5; "across year end")]
    fn test_nights(check_in: &str, check_out: &str, expected: u32) {
        let window = StayWindow::new(date(check_in), date(check_out));
        assert_eq!(window.nights(), expected);
    }

    #[test]
    fn test_unset_dates_fall_back_to_one_night() {
        assert_eq!(StayWindow::default().nights(), 1);
        let half = StayWindow::parse("2025-06-01", "").unwrap();
        assert!(!half.is_complete());
        assert_eq!(half.nights(), 1);
        assert_eq!(half.check_in_param().as_deref(), Some("2025-06-01"));
        assert_eq!(half.check_out_param(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StayWindow::parse("next friday", "2025-06-01").is_err());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(RoomEventKind::from_event_name("roomDeleted"), Some(RoomEventKind::Deleted));
        assert_eq!(RoomEventKind::from_event_name("hotelDeleted"), None);
        assert_eq!(
            Notification::for_room_event(RoomEventKind::Created).title,
            "New room added!"
        );
    }
}
