use chrono::Utc;
use sqlx::Row;

use concierge_core::domain::{ContactInfo, ParkingType, Property, PropertyId, PropertyPolicies};

use super::{PropertyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPropertyRepository {
    pool: DbPool,
}

impl SqlPropertyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T, E: std::fmt::Display>(result: Result<T, E>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_property(row: &sqlx::sqlite::SqliteRow) -> Result<Property, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let name: String = decode(row.try_get("name"))?;
    let check_in_time: String = decode(row.try_get("check_in_time"))?;
    let check_out_time: String = decode(row.try_get("check_out_time"))?;
    let parking_str: String = decode(row.try_get("parking"))?;
    let parking_details: Option<String> = decode(row.try_get("parking_details"))?;
    let amenities_json: String = decode(row.try_get("amenities_json"))?;
    let pets_allowed: bool = decode(row.try_get("pets_allowed"))?;
    let smoking_allowed: bool = decode(row.try_get("smoking_allowed"))?;
    let cancellation_policy: Option<String> = decode(row.try_get("cancellation_policy"))?;
    let contact_phone: Option<String> = decode(row.try_get("contact_phone"))?;
    let contact_email: Option<String> = decode(row.try_get("contact_email"))?;

    let parking = ParkingType::parse(&parking_str).ok_or_else(|| {
        RepositoryError::Decode(format!("property `{id}` has unknown parking type `{parking_str}`"))
    })?;
    let amenities: Vec<String> = decode(serde_json::from_str(&amenities_json))?;

    Ok(Property {
        id: PropertyId(id),
        name,
        check_in_time,
        check_out_time,
        parking,
        parking_details,
        amenities,
        policies: PropertyPolicies { pets_allowed, smoking_allowed, cancellation_policy },
        contact: ContactInfo { phone: contact_phone, email: contact_email },
    })
}

#[async_trait::async_trait]
impl PropertyRepository for SqlPropertyRepository {
    async fn find_by_id(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, check_in_time, check_out_time, parking, parking_details,
                    amenities_json, pets_allowed, smoking_allowed, cancellation_policy,
                    contact_phone, contact_email
             FROM property WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_property(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, property: Property) -> Result<(), RepositoryError> {
        let amenities_json = decode(serde_json::to_string(&property.amenities))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO property (id, name, check_in_time, check_out_time, parking,
                                   parking_details, amenities_json, pets_allowed,
                                   smoking_allowed, cancellation_policy, contact_phone,
                                   contact_email, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 check_in_time = excluded.check_in_time,
                 check_out_time = excluded.check_out_time,
                 parking = excluded.parking,
                 parking_details = excluded.parking_details,
                 amenities_json = excluded.amenities_json,
                 pets_allowed = excluded.pets_allowed,
                 smoking_allowed = excluded.smoking_allowed,
                 cancellation_policy = excluded.cancellation_policy,
                 contact_phone = excluded.contact_phone,
                 contact_email = excluded.contact_email,
                 updated_at = excluded.updated_at",
        )
        .bind(&property.id.0)
        .bind(&property.name)
        .bind(&property.check_in_time)
        .bind(&property.check_out_time)
        .bind(property.parking.as_str())
        .bind(&property.parking_details)
        .bind(&amenities_json)
        .bind(property.policies.pets_allowed)
        .bind(property.policies.smoking_allowed)
        .bind(&property.policies.cancellation_policy)
        .bind(&property.contact.phone)
        .bind(&property.contact.email)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM property")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::{ContactInfo, ParkingType, Property, PropertyId, PropertyPolicies};

    use super::SqlPropertyRepository;
    use crate::repositories::{PropertyRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_property() -> Property {
        Property {
            id: PropertyId("PROP-001".to_string()),
            name: "Sunset Beach Resort".to_string(),
            check_in_time: "3:00 PM".to_string(),
            check_out_time: "11:00 AM".to_string(),
            parking: ParkingType::Paid,
            parking_details: Some("Valet parking at $25 per night".to_string()),
            amenities: vec!["Pool".to_string(), "Spa".to_string()],
            policies: PropertyPolicies {
                pets_allowed: true,
                smoking_allowed: false,
                cancellation_policy: Some("Free cancellation up to 48 hours".to_string()),
            },
            contact: ContactInfo {
                phone: Some("+1-555-0100".to_string()),
                email: Some("frontdesk@sunsetbeach.example".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_every_field() {
        let repo = SqlPropertyRepository::new(setup().await);
        let property = sample_property();

        repo.save(property.clone()).await.expect("save");
        let found = repo.find_by_id(&property.id).await.expect("find").expect("should exist");

        assert_eq!(found, property);
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn save_updates_existing_row() {
        let repo = SqlPropertyRepository::new(setup().await);
        let mut property = sample_property();
        repo.save(property.clone()).await.expect("save");

        property.check_in_time = "4:00 PM".to_string();
        property.amenities.clear();
        repo.save(property.clone()).await.expect("update");

        let found = repo.find_by_id(&property.id).await.expect("find").expect("should exist");
        assert_eq!(found.check_in_time, "4:00 PM");
        assert!(found.amenities.is_empty());
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let repo = SqlPropertyRepository::new(setup().await);
        let found = repo.find_by_id(&PropertyId("missing".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn corrupt_amenities_surface_as_decode_error() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO property (id, name, check_in_time, check_out_time, parking,
                                   amenities_json, created_at, updated_at)
             VALUES ('BAD', 'Broken', '3 PM', '11 AM', 'free', 'not-json', '', '')",
        )
        .execute(&pool)
        .await
        .expect("insert corrupt row");

        let repo = SqlPropertyRepository::new(pool);
        let error = repo
            .find_by_id(&PropertyId("BAD".to_string()))
            .await
            .expect_err("corrupt json should fail decoding");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }
}
