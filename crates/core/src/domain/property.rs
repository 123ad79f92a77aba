use serde::{Deserialize, Serialize};

use crate::domain::inquiry::PropertyId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkingType {
    Free,
    Paid,
    None,
}

impl ParkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyPolicies {
    #[serde(default)]
    pub pets_allowed: bool,
    #[serde(default)]
    pub smoking_allowed: bool,
    #[serde(default)]
    pub cancellation_policy: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub name: String,
    pub check_in_time: String,
    pub check_out_time: String,
    pub parking: ParkingType,
    #[serde(default)]
    pub parking_details: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub policies: PropertyPolicies,
    #[serde(default)]
    pub contact: ContactInfo,
}
