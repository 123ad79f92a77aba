use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::property::Property;
use crate::domain::reservation::Reservation;

/// Flat placeholder-name to value map assembled from the property and
/// reservation records of one request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredContext {
    values: BTreeMap<String, String>,
}

impl StructuredContext {
    pub fn build(property: Option<&Property>, reservation: Option<&Reservation>) -> Self {
        let mut context = Self::default();

        if let Some(property) = property {
            context.insert("property_name", &property.name);
            context.insert("check_in_time", &property.check_in_time);
            context.insert("check_out_time", &property.check_out_time);
            if let Some(details) = &property.parking_details {
                context.insert("parking_details", details);
            }
            if !property.amenities.is_empty() {
                context.insert("amenities_list", &property.amenities.join(", "));
            }
            if let Some(policy) = &property.policies.cancellation_policy {
                context.insert("cancellation_policy", policy);
            }
            context.insert("pets_allowed", yes_no(property.policies.pets_allowed));
            context.insert("smoking_allowed", yes_no(property.policies.smoking_allowed));
            if let Some(phone) = &property.contact.phone {
                context.insert("contact_phone", phone);
            }
            if let Some(email) = &property.contact.email {
                context.insert("contact_email", email);
            }
        }

        if let Some(reservation) = reservation {
            context.insert("guest_name", &reservation.guest_name);
            context.insert("guest_count", &reservation.guest_count.to_string());
            context.insert("room_type", reservation.room_type.display_name());
            context.insert(
                "reservation_check_in",
                &reservation.check_in_date.format("%B %d, %Y").to_string(),
            );
            context.insert(
                "reservation_check_out",
                &reservation.check_out_date.format("%B %d, %Y").to_string(),
            );
            if !reservation.special_requests.is_empty() {
                context.insert("special_requests", &reservation.special_requests.join(", "));
            }
        }

        context
    }

    /// Empty values are dropped so a lookup never resolves to blank text.
    pub fn insert(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.values.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for StructuredContext
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Self::default();
        for (key, value) in iter {
            context.insert(key.as_ref(), value.as_ref());
        }
        context
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::StructuredContext;
    use crate::domain::inquiry::{PropertyId, ReservationId};
    use crate::domain::property::{ContactInfo, ParkingType, Property, PropertyPolicies};
    use crate::domain::reservation::{Reservation, RoomType};

    fn property() -> Property {
        Property {
            id: PropertyId("prop_001".to_string()),
            name: "Sunset Beach Resort".to_string(),
            check_in_time: "3:00 PM".to_string(),
            check_out_time: "11:00 AM".to_string(),
            parking: ParkingType::Free,
            parking_details: Some("Free parking available on-site".to_string()),
            amenities: vec!["WiFi".to_string(), "Pool".to_string()],
            policies: PropertyPolicies {
                pets_allowed: false,
                smoking_allowed: false,
                cancellation_policy: Some("Free cancellation up to 48 hours".to_string()),
            },
            contact: ContactInfo { phone: Some("+1-555-0100".to_string()), email: None },
        }
    }

    #[test]
    fn empty_without_records() {
        assert!(StructuredContext::build(None, None).is_empty());
    }

    #[test]
    fn property_fields_are_flattened() {
        let context = StructuredContext::build(Some(&property()), None);

        assert_eq!(context.get("check_in_time"), Some("3:00 PM"));
        assert_eq!(context.get("amenities_list"), Some("WiFi, Pool"));
        assert_eq!(context.get("pets_allowed"), Some("No"));
        assert_eq!(context.get("contact_phone"), Some("+1-555-0100"));
        assert_eq!(context.get("contact_email"), None);
    }

    #[test]
    fn reservation_dates_and_room_are_formatted() {
        let reservation = Reservation {
            id: ReservationId("res_001".to_string()),
            property_id: PropertyId("prop_001".to_string()),
            guest_name: "Guest".to_string(),
            guest_email: "guest@example.com".to_string(),
            check_in_date: Utc.with_ymd_and_hms(2024, 3, 15, 15, 0, 0).unwrap(),
            check_out_date: Utc.with_ymd_and_hms(2024, 3, 18, 11, 0, 0).unwrap(),
            room_type: RoomType::Deluxe,
            guest_count: 2,
            special_requests: vec!["Early check-in".to_string(), "High floor".to_string()],
        };

        let context = StructuredContext::build(None, Some(&reservation));

        assert_eq!(context.get("room_type"), Some("Deluxe"));
        assert_eq!(context.get("reservation_check_in"), Some("March 15, 2024"));
        assert_eq!(context.get("special_requests"), Some("Early check-in, High floor"));
        assert_eq!(context.get("guest_count"), Some("2"));
    }

    #[test]
    fn blank_values_are_not_stored() {
        let context: StructuredContext = [("a", "  "), ("b", "value")].into_iter().collect();
        assert_eq!(context.len(), 1);
        assert_eq!(context.get("a"), None);
    }
}
