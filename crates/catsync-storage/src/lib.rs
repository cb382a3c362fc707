//! Catalog store interface + HTTP fetch utilities for the catalog sync engine.

use std::collections::HashMap;

use async_trait::async_trait;
use catsync_core::{CanonicalRecord, CatalogTable, Provenance, RecordUpdate};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

mod http;
mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "catsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Row identity returned to the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveId {
    pub id: Uuid,
    pub source_external_id: String,
}

/// Operations the sync engine needs from the relational store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_one(
        &self,
        table: CatalogTable,
        provenance: &Provenance,
    ) -> Result<Option<CanonicalRecord>, StoreError>;

    async fn insert(&self, table: CatalogTable, record: &CanonicalRecord) -> Result<(), StoreError>;

    async fn update(
        &self,
        table: CatalogTable,
        id: Uuid,
        update: &RecordUpdate,
    ) -> Result<(), StoreError>;

    async fn list_active_ids(
        &self,
        table: CatalogTable,
        source: &str,
    ) -> Result<Vec<ActiveId>, StoreError>;

    /// Flips `is_active` to false for the given rows that are still active.
    /// Returns the number of rows actually changed.
    async fn deactivate(&self, table: CatalogTable, ids: &[Uuid]) -> Result<u64, StoreError>;
}

/// In-process store with the same uniqueness rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<CatalogTable, Vec<CanonicalRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, table: CatalogTable) -> Vec<CanonicalRecord> {
        let tables = self.tables.lock().await;
        tables.get(&table).cloned().unwrap_or_default()
    }

    pub async fn get(&self, table: CatalogTable, provenance: &Provenance) -> Option<CanonicalRecord> {
        let tables = self.tables.lock().await;
        tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|r| &r.provenance == provenance).cloned())
    }

    /// Out-of-band operator edit, used to check the engine leaves such fields alone.
    pub async fn set_featured(&self, table: CatalogTable, id: Uuid, featured: bool) -> bool {
        let mut tables = self.tables.lock().await;
        match tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
        {
            Some(row) => {
                row.is_featured = featured;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_one(
        &self,
        table: CatalogTable,
        provenance: &Provenance,
    ) -> Result<Option<CanonicalRecord>, StoreError> {
        Ok(self.get(table, provenance).await)
    }

    async fn insert(&self, table: CatalogTable, record: &CanonicalRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table).or_default();
        if rows.iter().any(|r| r.provenance == record.provenance) {
            return Err(StoreError::UniqueViolation {
                constraint: format!("{table}_source_external_id_key"),
            });
        }
        if rows.iter().any(|r| r.slug == record.slug) {
            return Err(StoreError::UniqueViolation {
                constraint: format!("{table}_slug_key"),
            });
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn update(
        &self,
        table: CatalogTable,
        id: Uuid,
        update: &RecordUpdate,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table).or_default();
        if rows.iter().any(|r| r.id != id && r.slug == update.slug) {
            return Err(StoreError::UniqueViolation {
                constraint: format!("{table}_slug_key"),
            });
        }
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.apply_update(update);
        Ok(())
    }

    async fn list_active_ids(
        &self,
        table: CatalogTable,
        source: &str,
    ) -> Result<Vec<ActiveId>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.is_active && r.provenance.source == source)
                    .map(|r| ActiveId {
                        id: r.id,
                        source_external_id: r.provenance.source_external_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn deactivate(&self, table: CatalogTable, ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| r.is_active && ids.contains(&r.id)) {
            row.is_active = false;
            changed += 1;
        }
        Ok(changed)
    }
}
