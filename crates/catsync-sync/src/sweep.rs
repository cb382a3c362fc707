//! Deactivates rows the provider stopped listing.

use std::collections::HashSet;

use catsync_core::CatalogTable;
use catsync_storage::{CatalogStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deactivated: u64,
    pub skipped: bool,
}

/// Flips `is_active` to false for every active row of `source` whose external id
/// is not in `observed`. An empty observed set never sweeps anything.
pub async fn sweep_unobserved(
    store: &dyn CatalogStore,
    table: CatalogTable,
    source: &str,
    observed: &HashSet<String>,
) -> Result<SweepReport, StoreError> {
    if observed.is_empty() {
        warn!(%table, %source, "observed set is empty; sweep skipped");
        return Ok(SweepReport {
            deactivated: 0,
            skipped: true,
        });
    }

    let stale: Vec<Uuid> = store
        .list_active_ids(table, source)
        .await?
        .into_iter()
        .filter(|active| !observed.contains(&active.source_external_id))
        .map(|active| active.id)
        .collect();

    let deactivated = if stale.is_empty() {
        0
    } else {
        store.deactivate(table, &stale).await?
    };
    info!(%table, %source, deactivated, "sweep finished");
    Ok(SweepReport {
        deactivated,
        skipped: false,
    })
}
