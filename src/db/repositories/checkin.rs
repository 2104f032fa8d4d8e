use chrono::NaiveDate;
use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::UserId;
use crate::db::models::checkin::CheckinRecord;

#[derive(Debug)]
pub struct CheckinRepository {
    pool: &'static Pool<Postgres>,
}

impl CheckinRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_on_day(
        &self,
        user_id: &UserId,
        day: NaiveDate,
    ) -> SqlxResult<Option<CheckinRecord>> {
        sqlx::query_as::<_, CheckinRecord>(&format!(
            "SELECT {} FROM checkin WHERE user_id = $1 AND day = $2",
            sql_fragment::CHECKIN_FIELDS
        ))
        .bind(user_id)
        .bind(day)
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_between(
        &self,
        user_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SqlxResult<Vec<CheckinRecord>> {
        sqlx::query_as::<_, CheckinRecord>(&format!(
            r#"
            SELECT {}
            FROM checkin
            WHERE user_id = $1
            AND day BETWEEN $2 AND $3
            ORDER BY day ASC
            "#,
            sql_fragment::CHECKIN_FIELDS
        ))
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await
    }
}
