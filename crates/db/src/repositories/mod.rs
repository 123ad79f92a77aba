use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::{Property, PropertyId, Reservation, ReservationId};

pub mod memory;
pub mod property;
pub mod reservation;

pub use memory::{InMemoryPropertyRepository, InMemoryReservationRepository};
pub use property::SqlPropertyRepository;
pub use reservation::SqlReservationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Read/write access to property records. Lookups that find nothing return
/// `Ok(None)`; errors are reserved for store failures.
#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn find_by_id(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError>;
    async fn save(&self, property: Property) -> Result<(), RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find_by_id(&self, id: &ReservationId)
        -> Result<Option<Reservation>, RepositoryError>;
    async fn list_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Vec<Reservation>, RepositoryError>;
    async fn save(&self, reservation: Reservation) -> Result<(), RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
}
