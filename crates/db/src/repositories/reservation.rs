use chrono::{DateTime, Utc};
use sqlx::Row;

use concierge_core::domain::{PropertyId, Reservation, ReservationId, RoomType};

use super::{RepositoryError, ReservationRepository};
use crate::DbPool;

pub struct SqlReservationRepository {
    pool: DbPool,
}

impl SqlReservationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, property_id, guest_name, guest_email, check_in_date,
        check_out_date, room_type, guest_count, special_requests_json
 FROM reservation";

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{field} `{value}`: {e}")))
}

fn row_to_reservation(row: &sqlx::sqlite::SqliteRow) -> Result<Reservation, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let property_id: String =
        row.try_get("property_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guest_name: String =
        row.try_get("guest_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guest_email: String =
        row.try_get("guest_email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let check_in_str: String =
        row.try_get("check_in_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let check_out_str: String =
        row.try_get("check_out_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let room_type_str: String =
        row.try_get("room_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guest_count: i64 =
        row.try_get("guest_count").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let special_requests_json: String = row
        .try_get("special_requests_json")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let room_type = RoomType::parse(&room_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("reservation `{id}` has unknown room type `{room_type_str}`"))
    })?;
    let special_requests: Vec<String> = serde_json::from_str(&special_requests_json)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guest_count = u32::try_from(guest_count)
        .map_err(|_| RepositoryError::Decode(format!("invalid guest_count {guest_count}")))?;

    Ok(Reservation {
        id: ReservationId(id),
        property_id: PropertyId(property_id),
        guest_name,
        guest_email,
        check_in_date: parse_timestamp("check_in_date", &check_in_str)?,
        check_out_date: parse_timestamp("check_out_date", &check_out_str)?,
        room_type,
        guest_count,
        special_requests,
    })
}

#[async_trait::async_trait]
impl ReservationRepository for SqlReservationRepository {
    async fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_reservation(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        let rows =
            sqlx::query(&format!("{SELECT_COLUMNS} WHERE property_id = ? ORDER BY check_in_date"))
                .bind(&property_id.0)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_reservation).collect()
    }

    async fn save(&self, reservation: Reservation) -> Result<(), RepositoryError> {
        let special_requests_json = serde_json::to_string(&reservation.special_requests)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO reservation (id, property_id, guest_name, guest_email, check_in_date,
                                      check_out_date, room_type, guest_count,
                                      special_requests_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 property_id = excluded.property_id,
                 guest_name = excluded.guest_name,
                 guest_email = excluded.guest_email,
                 check_in_date = excluded.check_in_date,
                 check_out_date = excluded.check_out_date,
                 room_type = excluded.room_type,
                 guest_count = excluded.guest_count,
                 special_requests_json = excluded.special_requests_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&reservation.id.0)
        .bind(&reservation.property_id.0)
        .bind(&reservation.guest_name)
        .bind(&reservation.guest_email)
        .bind(reservation.check_in_date.to_rfc3339())
        .bind(reservation.check_out_date.to_rfc3339())
        .bind(reservation.room_type.as_str())
        .bind(i64::from(reservation.guest_count))
        .bind(&special_requests_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM reservation")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }
}
