//! Upsert-by-provenance. Each candidate is reconciled on its own; a failure is
//! counted and the batch moves on.

use catsync_core::{CanonicalRecord, CatalogTable, RecordCandidate, RecordUpdate};
use catsync_storage::{CatalogStore, StoreError};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub errored: usize,
}

impl ReconcileStats {
    pub fn record(&mut self, outcome: &Result<ReconcileOutcome, StoreError>) {
        match outcome {
            Ok(ReconcileOutcome::Inserted) => self.inserted += 1,
            Ok(ReconcileOutcome::Updated) => self.updated += 1,
            Err(_) => self.errored += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.errored
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn CatalogStore,
    table: CatalogTable,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn CatalogStore, table: CatalogTable) -> Self {
        Self { store, table }
    }

    /// Exactly one of insert/update, keyed by the candidate's provenance.
    pub async fn reconcile_one(
        &self,
        candidate: RecordCandidate,
    ) -> Result<ReconcileOutcome, StoreError> {
        let now = Utc::now();
        match self.store.find_one(self.table, &candidate.provenance).await? {
            Some(existing) => {
                let update = RecordUpdate::from_candidate(candidate, now);
                self.store.update(self.table, existing.id, &update).await?;
                Ok(ReconcileOutcome::Updated)
            }
            None => {
                let record = CanonicalRecord::from_candidate(candidate, now);
                self.store.insert(self.table, &record).await?;
                Ok(ReconcileOutcome::Inserted)
            }
        }
    }

    /// Reconciles candidates in order; never stops early.
    pub async fn reconcile_all(&self, candidates: Vec<RecordCandidate>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for candidate in candidates {
            let external_id = candidate.provenance.source_external_id.clone();
            let title = candidate.title.clone();
            let outcome = self.reconcile_one(candidate).await;
            match &outcome {
                Ok(kind) => debug!(table = %self.table, %external_id, ?kind, "record reconciled"),
                Err(err) => warn!(
                    table = %self.table,
                    %external_id,
                    %title,
                    error = %err,
                    "record reconcile failed"
                ),
            }
            stats.record(&outcome);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catsync_core::Provenance;
    use catsync_storage::{ActiveId, MemoryStore};
    use uuid::Uuid;

    fn candidate(ext_id: &str, title: &str) -> RecordCandidate {
        RecordCandidate {
            provenance: Provenance::new("platinumlist", ext_id),
            title: title.to_string(),
            slug: catsync_adapters::transform::slugify(title, ext_id),
            description: Some(format!("About {title}")),
            category: "music".into(),
            price: None,
            rating: Some(4.5),
            image_url: None,
            gallery: vec![],
            booking_url: None,
            affiliate_url: None,
            venue: None,
            schedule: None,
        }
    }

    /// Delegates to a memory store but fails writes for chosen external ids.
    struct FlakyStore {
        inner: MemoryStore,
        fail_for: Vec<&'static str>,
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn find_one(
            &self,
            table: CatalogTable,
            provenance: &Provenance,
        ) -> Result<Option<CanonicalRecord>, StoreError> {
            self.inner.find_one(table, provenance).await
        }

        async fn insert(&self, table: CatalogTable, record: &CanonicalRecord) -> Result<(), StoreError> {
            if self
                .fail_for
                .contains(&record.provenance.source_external_id.as_str())
            {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.insert(table, record).await
        }

        async fn update(
            &self,
            table: CatalogTable,
            id: Uuid,
            update: &RecordUpdate,
        ) -> Result<(), StoreError> {
            self.inner.update(table, id, update).await
        }

        async fn list_active_ids(
            &self,
            table: CatalogTable,
            source: &str,
        ) -> Result<Vec<ActiveId>, StoreError> {
            self.inner.list_active_ids(table, source).await
        }

        async fn deactivate(&self, table: CatalogTable, ids: &[Uuid]) -> Result<u64, StoreError> {
            self.inner.deactivate(table, ids).await
        }
    }

    #[tokio::test]
    async fn second_pass_updates_instead_of_inserting() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, CatalogTable::Events);
        let batch = vec![candidate("1", "Jazz Night"), candidate("2", "Comedy Club")];

        let first = reconciler.reconcile_all(batch.clone()).await;
        assert_eq!(first, ReconcileStats { inserted: 2, updated: 0, errored: 0 });
        let after_first = store.records(CatalogTable::Events).await;

        let second = reconciler.reconcile_all(batch).await;
        assert_eq!(second, ReconcileStats { inserted: 0, updated: 2, errored: 0 });
        let after_second = store.records(CatalogTable::Events).await;

        assert_eq!(after_first.len(), after_second.len());
        for (a, b) in after_first.iter().zip(&after_second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.slug, b.slug);
            assert_eq!(a.title, b.title);
            assert_eq!(a.created_at, b.created_at);
            assert!(b.is_active);
        }
    }

    #[tokio::test]
    async fn update_reactivates_and_preserves_manual_fields() {
        let store = MemoryStore::new();
        let table = CatalogTable::Events;
        let reconciler = Reconciler::new(&store, table);
        reconciler.reconcile_one(candidate("5", "Old Title")).await.unwrap();

        let row = store.get(table, &Provenance::new("platinumlist", "5")).await.unwrap();
        store.set_featured(table, row.id, true).await;
        store.deactivate(table, &[row.id]).await.unwrap();

        let outcome = reconciler.reconcile_one(candidate("5", "New Title")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);

        let row = store.get(table, &Provenance::new("platinumlist", "5")).await.unwrap();
        assert_eq!(row.title, "New Title");
        assert_eq!(row.slug, "new-title-5");
        assert!(row.is_active);
        assert!(row.is_featured);
    }

    #[tokio::test]
    async fn one_failing_record_does_not_stop_the_batch() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_for: vec!["2"],
        };
        let reconciler = Reconciler::new(&store, CatalogTable::Attractions);
        let stats = reconciler
            .reconcile_all(vec![
                candidate("1", "Aquarium"),
                candidate("2", "Sky Views"),
                candidate("3", "Desert Safari"),
            ])
            .await;

        assert_eq!(stats, ReconcileStats { inserted: 2, updated: 0, errored: 1 });
        assert_eq!(stats.processed(), 3);
        let stored: Vec<_> = store
            .inner
            .records(CatalogTable::Attractions)
            .await
            .into_iter()
            .map(|r| r.provenance.source_external_id)
            .collect();
        assert_eq!(stored, vec!["1".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn slug_collision_is_counted_as_an_error() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, CatalogTable::Events);
        let mut clash = candidate("9", "Other");
        clash.slug = "jazz-night-1".into();
        let stats = reconciler
            .reconcile_all(vec![candidate("1", "Jazz Night"), clash])
            .await;
        assert_eq!(stats, ReconcileStats { inserted: 1, updated: 0, errored: 1 });
    }
}
