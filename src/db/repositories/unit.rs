use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::UnitId;
use crate::db::models::progress::{UnitDefinition, UnitRow};
use crate::db::repositories::Repository;

/// Read access to the curriculum; units are authored elsewhere
#[derive(Debug)]
pub struct UnitRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for UnitRepository {
    type Ident = UnitId;
    type Output = UnitRow;

    const BASE_FIELDS: &'static str = sql_fragment::UNIT_FIELDS;
    const TABLE_NAME: &'static str = "curriculum_unit";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

impl UnitRepository {
    #[instrument(skip(self))]
    pub async fn get_prerequisites(&self, unit_id: &UnitId) -> SqlxResult<Vec<UnitId>> {
        sqlx::query_scalar::<_, UnitId>(
            r#"
            SELECT prerequisite_id
            FROM unit_prerequisite
            WHERE unit_id = $1
            ORDER BY prerequisite_id
            "#,
        )
        .bind(unit_id)
        .fetch_all(self.pool)
        .await
    }

    /// The unit together with its prerequisite ids
    #[instrument(skip(self))]
    pub async fn get_definition(&self, unit_id: &UnitId) -> SqlxResult<Option<UnitDefinition>> {
        match self.get_by_id(unit_id).await? {
            Some(row) => {
                let prerequisites = self.get_prerequisites(unit_id).await?;
                Ok(Some(row.into_definition(prerequisites)))
            }
            None => Ok(None),
        }
    }
}
