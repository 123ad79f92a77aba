pub mod cache;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use cache::RedisCache;
pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use fixtures::{FixtureError, SeedDataset, SeedResult};
pub use repositories::{
    InMemoryPropertyRepository, InMemoryReservationRepository, PropertyRepository,
    RepositoryError, ReservationRepository, SqlPropertyRepository, SqlReservationRepository,
};
