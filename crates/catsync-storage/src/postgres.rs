use std::time::Duration;

use async_trait::async_trait;
use catsync_core::{
    CanonicalRecord, CatalogTable, EventSchedule, Price, Provenance, RecordUpdate,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{ActiveId, CatalogStore, StoreError};

const SELECT_COLUMNS: &str = "id, source, source_external_id, title, slug, description, category, \
     price_amount, price_currency, rating::float8 AS rating, image_url, gallery, booking_url, \
     affiliate_url, venue, timezone, starts_at, start_date, start_time, end_date, end_time, \
     is_active, is_featured, created_at, updated_at";

/// Postgres-backed store. Table names come from [`CatalogTable`], never from input.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("running migrations: {e}")))?;
        info!("catalog migrations applied");
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    source: String,
    source_external_id: String,
    title: String,
    slug: String,
    description: Option<String>,
    category: String,
    price_amount: Option<f64>,
    price_currency: Option<String>,
    rating: Option<f64>,
    image_url: Option<String>,
    gallery: Json<Vec<String>>,
    booking_url: Option<String>,
    affiliate_url: Option<String>,
    venue: Option<String>,
    timezone: Option<String>,
    starts_at: Option<DateTime<Utc>>,
    start_date: Option<NaiveDate>,
    start_time: Option<NaiveTime>,
    end_date: Option<NaiveDate>,
    end_time: Option<NaiveTime>,
    is_active: bool,
    is_featured: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecordRow> for CanonicalRecord {
    fn from(row: RecordRow) -> Self {
        let price = match (row.price_amount, row.price_currency) {
            (Some(amount), Some(currency)) => Some(Price { amount, currency }),
            _ => None,
        };
        let schedule = match (row.timezone, row.starts_at, row.start_date, row.start_time) {
            (Some(timezone), Some(starts_at), Some(start_date), Some(start_time)) => {
                Some(EventSchedule {
                    timezone,
                    starts_at,
                    start_date,
                    start_time,
                    end_date: row.end_date,
                    end_time: row.end_time,
                })
            }
            _ => None,
        };
        CanonicalRecord {
            id: row.id,
            provenance: Provenance::new(row.source, row.source_external_id),
            title: row.title,
            slug: row.slug,
            description: row.description,
            category: row.category,
            price,
            rating: row.rating,
            image_url: row.image_url,
            gallery: row.gallery.0,
            booking_url: row.booking_url,
            affiliate_url: row.affiliate_url,
            venue: row.venue,
            schedule,
            is_active: row.is_active,
            is_featured: row.is_featured,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn find_one(
        &self,
        table: CatalogTable,
        provenance: &Provenance,
    ) -> Result<Option<CanonicalRecord>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} WHERE source = $1 AND source_external_id = $2"
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(&provenance.source)
            .bind(&provenance.source_external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(CanonicalRecord::from))
    }

    async fn insert(&self, table: CatalogTable, record: &CanonicalRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {table} (id, source, source_external_id, title, slug, description, \
             category, price_amount, price_currency, rating, image_url, gallery, booking_url, \
             affiliate_url, venue, timezone, starts_at, start_date, start_time, end_date, \
             end_time, is_active, is_featured, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CAST($10 AS NUMERIC(2, 1)), $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)"
        );
        let schedule = record.schedule.as_ref();
        sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.provenance.source)
            .bind(&record.provenance.source_external_id)
            .bind(&record.title)
            .bind(&record.slug)
            .bind(&record.description)
            .bind(&record.category)
            .bind(record.price.as_ref().map(|p| p.amount))
            .bind(record.price.as_ref().map(|p| p.currency.clone()))
            .bind(record.rating)
            .bind(&record.image_url)
            .bind(Json(&record.gallery))
            .bind(&record.booking_url)
            .bind(&record.affiliate_url)
            .bind(&record.venue)
            .bind(schedule.map(|s| s.timezone.clone()))
            .bind(schedule.map(|s| s.starts_at))
            .bind(schedule.map(|s| s.start_date))
            .bind(schedule.map(|s| s.start_time))
            .bind(schedule.and_then(|s| s.end_date))
            .bind(schedule.and_then(|s| s.end_time))
            .bind(record.is_active)
            .bind(record.is_featured)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update(
        &self,
        table: CatalogTable,
        id: Uuid,
        update: &RecordUpdate,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {table} SET title = $2, slug = $3, description = $4, category = $5, \
             price_amount = $6, price_currency = $7, rating = CAST($8 AS NUMERIC(2, 1)), \
             image_url = $9, gallery = $10, booking_url = $11, affiliate_url = $12, venue = $13, \
             timezone = $14, starts_at = $15, start_date = $16, start_time = $17, \
             end_date = $18, end_time = $19, is_active = TRUE, updated_at = $20 \
             WHERE id = $1"
        );
        let schedule = update.schedule.as_ref();
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(&update.title)
            .bind(&update.slug)
            .bind(&update.description)
            .bind(&update.category)
            .bind(update.price.as_ref().map(|p| p.amount))
            .bind(update.price.as_ref().map(|p| p.currency.clone()))
            .bind(update.rating)
            .bind(&update.image_url)
            .bind(Json(&update.gallery))
            .bind(&update.booking_url)
            .bind(&update.affiliate_url)
            .bind(&update.venue)
            .bind(schedule.map(|s| s.timezone.clone()))
            .bind(schedule.map(|s| s.starts_at))
            .bind(schedule.map(|s| s.start_date))
            .bind(schedule.map(|s| s.start_time))
            .bind(schedule.and_then(|s| s.end_date))
            .bind(schedule.and_then(|s| s.end_time))
            .bind(update.updated_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_active_ids(
        &self,
        table: CatalogTable,
        source: &str,
    ) -> Result<Vec<ActiveId>, StoreError> {
        let sql = format!(
            "SELECT id, source_external_id FROM {table} WHERE source = $1 AND is_active \
             ORDER BY source_external_id"
        );
        let rows = sqlx::query_as::<_, (Uuid, String)>(&sql)
            .bind(source)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, source_external_id)| ActiveId {
                id,
                source_external_id,
            })
            .collect())
    }

    async fn deactivate(&self, table: CatalogTable, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("UPDATE {table} SET is_active = FALSE WHERE id = ANY($1) AND is_active");
        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
