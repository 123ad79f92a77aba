use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use concierge_core::domain::{Property, Reservation};

use crate::repositories::{PropertyRepository, RepositoryError, ReservationRepository};

/// Guest records loaded from `{ "properties": [...], "reservations": [...] }`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedDataset {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub properties: usize,
    pub reservations: usize,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("could not read fixture file `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse fixtures: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("reservation `{reservation}` references unknown property `{property}`")]
    DanglingProperty { reservation: String, property: String },
    #[error("duplicate {kind} id `{id}` in fixtures")]
    DuplicateId { kind: &'static str, id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SeedDataset {
    pub fn from_json(raw: &str) -> Result<Self, FixtureError> {
        let dataset: Self = serde_json::from_str(raw)?;
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| FixtureError::Read { path: path.to_path_buf(), source })?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), FixtureError> {
        let mut property_ids = BTreeSet::new();
        for property in &self.properties {
            if !property_ids.insert(property.id.0.as_str()) {
                return Err(FixtureError::DuplicateId { kind: "property", id: property.id.0.clone() });
            }
        }

        let mut reservation_ids = BTreeSet::new();
        for reservation in &self.reservations {
            if !reservation_ids.insert(reservation.id.0.as_str()) {
                return Err(FixtureError::DuplicateId {
                    kind: "reservation",
                    id: reservation.id.0.clone(),
                });
            }
            if !property_ids.contains(reservation.property_id.0.as_str()) {
                return Err(FixtureError::DanglingProperty {
                    reservation: reservation.id.0.clone(),
                    property: reservation.property_id.0.clone(),
                });
            }
        }

        Ok(())
    }

    /// Upserts properties before reservations so foreign keys resolve.
    pub async fn apply(
        &self,
        properties: &dyn PropertyRepository,
        reservations: &dyn ReservationRepository,
    ) -> Result<SeedResult, FixtureError> {
        for property in &self.properties {
            properties.save(property.clone()).await?;
        }
        for reservation in &self.reservations {
            reservations.save(reservation.clone()).await?;
        }

        tracing::info!(
            event_name = "db.fixtures.seeded",
            properties = self.properties.len(),
            reservations = self.reservations.len(),
            "seeded guest records"
        );

        Ok(SeedResult { properties: self.properties.len(), reservations: self.reservations.len() })
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::{PropertyId, ReservationId};

    use super::{FixtureError, SeedDataset};
    use crate::repositories::{
        InMemoryPropertyRepository, InMemoryReservationRepository, PropertyRepository,
        ReservationRepository,
    };

    const FIXTURE: &str = r#"{
        "properties": [{
            "id": "PROP-001",
            "name": "Sunset Beach Resort",
            "check_in_time": "3:00 PM",
            "check_out_time": "11:00 AM",
            "parking": "free",
            "amenities": ["Pool", "Gym"]
        }],
        "reservations": [{
            "id": "RES-001",
            "property_id": "PROP-001",
            "guest_name": "John Smith",
            "guest_email": "john@example.com",
            "check_in_date": "2026-03-15T15:00:00Z",
            "check_out_date": "2026-03-19T11:00:00Z",
            "room_type": "deluxe",
            "guest_count": 2
        }]
    }"#;

    #[tokio::test]
    async fn fixture_is_applied_to_repositories() {
        let dataset = SeedDataset::from_json(FIXTURE).expect("parse fixture");
        let properties = InMemoryPropertyRepository::default();
        let reservations = InMemoryReservationRepository::default();

        let result = dataset.apply(&properties, &reservations).await.expect("apply");

        assert_eq!(result.properties, 1);
        assert_eq!(result.reservations, 1);
        let property = properties
            .find_by_id(&PropertyId("PROP-001".to_string()))
            .await
            .expect("find")
            .expect("seeded property");
        assert_eq!(property.amenities, vec!["Pool".to_string(), "Gym".to_string()]);
        assert!(reservations
            .find_by_id(&ReservationId("RES-001".to_string()))
            .await
            .expect("find")
            .is_some());
    }

    #[test]
    fn reservation_for_unknown_property_is_rejected() {
        let raw = FIXTURE.replace("\"property_id\": \"PROP-001\"", "\"property_id\": \"PROP-404\"");
        let error = SeedDataset::from_json(&raw).expect_err("dangling property");
        assert!(matches!(error, FixtureError::DanglingProperty { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let error = SeedDataset::from_json("{ not json").expect_err("invalid json");
        assert!(matches!(error, FixtureError::Parse(_)));
    }
}
