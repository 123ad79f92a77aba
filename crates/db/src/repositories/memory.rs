use std::collections::HashMap;

use tokio::sync::RwLock;

use concierge_core::domain::{Property, PropertyId, Reservation, ReservationId};

use super::{PropertyRepository, RepositoryError, ReservationRepository};

#[derive(Default)]
pub struct InMemoryPropertyRepository {
    properties: RwLock<HashMap<String, Property>>,
}

impl InMemoryPropertyRepository {
    pub fn with_properties(properties: impl IntoIterator<Item = Property>) -> Self {
        let properties =
            properties.into_iter().map(|property| (property.id.0.clone(), property)).collect();
        Self { properties: RwLock::new(properties) }
    }
}

#[async_trait::async_trait]
impl PropertyRepository for InMemoryPropertyRepository {
    async fn find_by_id(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError> {
        let properties = self.properties.read().await;
        Ok(properties.get(&id.0).cloned())
    }

    async fn save(&self, property: Property) -> Result<(), RepositoryError> {
        let mut properties = self.properties.write().await;
        properties.insert(property.id.0.clone(), property);
        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.properties.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: RwLock<HashMap<String, Reservation>>,
}

impl InMemoryReservationRepository {
    pub fn with_reservations(reservations: impl IntoIterator<Item = Reservation>) -> Self {
        let reservations = reservations
            .into_iter()
            .map(|reservation| (reservation.id.0.clone(), reservation))
            .collect();
        Self { reservations: RwLock::new(reservations) }
    }
}

#[async_trait::async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        Ok(reservations.get(&id.0).cloned())
    }

    async fn list_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        let mut matching: Vec<Reservation> = reservations
            .values()
            .filter(|reservation| reservation.belongs_to(property_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.check_in_date.cmp(&b.check_in_date));
        Ok(matching)
    }

    async fn save(&self, reservation: Reservation) -> Result<(), RepositoryError> {
        let mut reservations = self.reservations.write().await;
        reservations.insert(reservation.id.0.clone(), reservation);
        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.reservations.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use concierge_core::domain::{
        ParkingType, Property, PropertyId, Reservation, ReservationId, RoomType,
    };

    use super::{InMemoryPropertyRepository, InMemoryReservationRepository};
    use crate::repositories::{PropertyRepository, ReservationRepository};

    fn property(id: &str) -> Property {
        Property {
            id: PropertyId(id.to_string()),
            name: "Harbor View".to_string(),
            check_in_time: "3:00 PM".to_string(),
            check_out_time: "11:00 AM".to_string(),
            parking: ParkingType::Free,
            parking_details: None,
            amenities: vec![],
            policies: Default::default(),
            contact: Default::default(),
        }
    }

    fn reservation(id: &str, property_id: &str, day: u32) -> Reservation {
        Reservation {
            id: ReservationId(id.to_string()),
            property_id: PropertyId(property_id.to_string()),
            guest_name: "Ada".to_string(),
            guest_email: "ada@example.com".to_string(),
            check_in_date: Utc.with_ymd_and_hms(2026, 7, day, 15, 0, 0).unwrap(),
            check_out_date: Utc.with_ymd_and_hms(2026, 7, day + 3, 11, 0, 0).unwrap(),
            room_type: RoomType::Suite,
            guest_count: 2,
            special_requests: vec![],
        }
    }

    #[tokio::test]
    async fn missing_property_is_none_not_error() {
        let repo = InMemoryPropertyRepository::with_properties([property("P1")]);
        assert!(repo.find_by_id(&PropertyId("P1".into())).await.expect("find").is_some());
        assert!(repo.find_by_id(&PropertyId("P9".into())).await.expect("find").is_none());
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn reservations_are_listed_per_property_by_check_in() {
        let repo = InMemoryReservationRepository::default();
        repo.save(reservation("R2", "P1", 20)).await.expect("save");
        repo.save(reservation("R1", "P1", 10)).await.expect("save");
        repo.save(reservation("R3", "P2", 5)).await.expect("save");

        let listed =
            repo.list_for_property(&PropertyId("P1".into())).await.expect("list for property");
        let ids: Vec<&str> = listed.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
    }
}
