use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::inquiry::{PropertyId, ReservationId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Standard,
    Deluxe,
    Suite,
    Studio,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Deluxe => "deluxe",
            Self::Suite => "suite",
            Self::Studio => "studio",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::Deluxe => "Deluxe",
            Self::Suite => "Suite",
            Self::Studio => "Studio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "deluxe" => Some(Self::Deluxe),
            "suite" => Some(Self::Suite),
            "studio" => Some(Self::Studio),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub property_id: PropertyId,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in_date: DateTime<Utc>,
    pub check_out_date: DateTime<Utc>,
    pub room_type: RoomType,
    pub guest_count: u32,
    #[serde(default)]
    pub special_requests: Vec<String>,
}

impl Reservation {
    pub fn belongs_to(&self, property_id: &PropertyId) -> bool {
        &self.property_id == property_id
    }
}
