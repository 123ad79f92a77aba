use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub String);

/// A guest's free-text question plus the identifiers it was asked against.
///
/// Built once per request and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inquiry {
    pub message: String,
    pub property_id: Option<PropertyId>,
    pub reservation_id: Option<ReservationId>,
}

impl Inquiry {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), property_id: None, reservation_id: None }
    }

    pub fn for_property(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(PropertyId(property_id.into()));
        self
    }

    pub fn for_reservation(mut self, reservation_id: impl Into<String>) -> Self {
        self.reservation_id = Some(ReservationId(reservation_id.into()));
        self
    }

    /// Stable key over every field that can change the answer. Each field is
    /// length-prefixed so no two distinct inquiries share an encoding.
    pub fn fingerprint(&self) -> String {
        let mut encoded = String::new();
        push_field(&mut encoded, Some(self.message.as_str()));
        push_field(&mut encoded, self.property_id.as_ref().map(|id| id.0.as_str()));
        push_field(&mut encoded, self.reservation_id.as_ref().map(|id| id.0.as_str()));
        stable_hash(&encoded)
    }
}

fn push_field(encoded: &mut String, field: Option<&str>) {
    match field {
        Some(value) => {
            encoded.push_str(&value.len().to_string());
            encoded.push(':');
            encoded.push_str(value);
        }
        None => encoded.push('-'),
    }
    encoded.push(';');
}

/// Hex SHA-256 of the input, used for every cache key derived from free text.
pub fn stable_hash(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
