//! Run orchestration: fetch, filter, transform, reconcile, sweep, summarize.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catsync_adapters::{
    ClassificationRules, ListingPageSource, PaginatedFetcher, ProviderClient, ProviderConfig,
    RecordFilter, RegionMatcher, StopReason, TransformContext, Transformer,
};
use catsync_core::{CatalogTable, SyncFlavor};
use catsync_storage::{CatalogStore, HttpClientConfig, HttpFetcher, PgStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod reconcile;
pub mod sweep;

pub use config::{ConfigError, SyncConfig};
pub use reconcile::{ReconcileOutcome, ReconcileStats, Reconciler};
pub use sweep::{sweep_unobserved, SweepReport};

pub const CRATE_NAME: &str = "catsync-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    pub fn is_failed(self) -> bool {
        self == RunOutcome::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Reconciling,
    Sweeping,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Reconciling => "reconciling",
            RunState::Sweeping => "sweeping",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(state: &mut RunState, next: RunState) {
    info!(from = %state, to = %next, "run state changed");
    *state = next;
}

/// Terminal report of one run. `errored` counts records that were processed
/// but failed; `fetched` counts every unique listing the provider returned.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub flavor: SyncFlavor,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub filtered_out: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errored: usize,
    pub deactivated: u64,
    pub pages: u32,
    pub stop_reason: Option<StopReason>,
    pub sweep_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl RunSummary {
    /// Fatal result: nothing processed.
    pub fn failed(
        flavor: SyncFlavor,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            flavor,
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Failed,
            fetched: 0,
            filtered_out: 0,
            inserted: 0,
            updated: 0,
            errored: 0,
            deactivated: 0,
            pages: 0,
            stop_reason: None,
            sweep_skipped: true,
            failure: Some(failure.into()),
        }
    }
}

/// One sync flavor wired to its page source and store.
pub struct CatalogSync {
    flavor: SyncFlavor,
    fetcher: PaginatedFetcher,
    filter: RecordFilter,
    transformer: Transformer,
    pages: Arc<dyn ListingPageSource>,
    store: Arc<dyn CatalogStore>,
}

impl CatalogSync {
    /// The flavor and source come from the transformer's context.
    pub fn new(
        fetcher: PaginatedFetcher,
        filter: RecordFilter,
        transformer: Transformer,
        pages: Arc<dyn ListingPageSource>,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            flavor: transformer.context().flavor,
            fetcher,
            filter,
            transformer,
            pages,
            store,
        }
    }

    pub fn from_config(
        config: &SyncConfig,
        flavor: SyncFlavor,
        store: Arc<dyn CatalogStore>,
    ) -> Result<Self> {
        let rules = match &config.rules_path {
            Some(path) => ClassificationRules::from_path(path)
                .with_context(|| format!("loading classification rules from {}", path.display()))?,
            None => ClassificationRules::default(),
        };
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let provider = ProviderClient::new(
            http,
            ProviderConfig {
                base_url: config.provider_base_url.clone(),
                api_key: config.provider_api_key.clone(),
                price_scope: config.price_scope.clone(),
            },
        );
        let context = TransformContext::new(config.source.clone(), flavor)
            .with_rules(rules.table(flavor).clone())
            .with_affiliate(config.affiliate_template.clone(), config.partner_ref.clone())
            .with_default_timezone(config.default_timezone);

        Ok(Self::new(
            PaginatedFetcher::new(config.page_size, config.max_pages, config.page_delay),
            RecordFilter::new(flavor, RegionMatcher::from_csv(config.region_for(flavor))),
            Transformer::new(context),
            Arc::new(provider),
            store,
        ))
    }

    pub fn flavor(&self) -> SyncFlavor {
        self.flavor
    }

    fn table(&self) -> CatalogTable {
        self.flavor.table()
    }

    fn source(&self) -> &str {
        &self.transformer.context().source
    }

    /// Runs one full cycle. Never returns an error: every failure is folded
    /// into the summary.
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("catalog_sync", flavor = %self.flavor, run_id = %run_id);
        self.run_cycle(run_id).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid) -> RunSummary {
        let started_at = Utc::now();
        let mut state = RunState::Idle;
        info!(table = %self.table(), source = self.source(), "catalog sync starting");

        enter(&mut state, RunState::Fetching);
        let fetched = self.fetcher.fetch_all(self.pages.as_ref()).await;
        if fetched.failed_before_any_page() {
            enter(&mut state, RunState::Failed);
            error!(stop = %fetched.stop, "first page failed; nothing collected");
            let mut summary =
                RunSummary::failed(self.flavor, run_id, started_at, fetched.stop.to_string());
            summary.stop_reason = Some(fetched.stop);
            return summary;
        }

        let mut observed: HashSet<String> = HashSet::new();
        let mut candidates = Vec::with_capacity(fetched.listings.len());
        let mut filtered_out = 0usize;
        let mut transform_errors = 0usize;
        for listing in &fetched.listings {
            if let Err(rejection) = self.filter.check(listing) {
                debug!(external_id = %listing.id, ?rejection, "listing filtered out");
                filtered_out += 1;
                continue;
            }
            observed.insert(listing.id.clone());
            match self.transformer.transform(listing) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    transform_errors += 1;
                    warn!(
                        external_id = %listing.id,
                        title = listing.name.as_deref().unwrap_or_default(),
                        error = %err,
                        "listing transform failed"
                    );
                }
            }
        }

        enter(&mut state, RunState::Reconciling);
        let stats = Reconciler::new(self.store.as_ref(), self.table())
            .reconcile_all(candidates)
            .await;

        enter(&mut state, RunState::Sweeping);
        let mut failure = None;
        let sweep = match sweep_unobserved(self.store.as_ref(), self.table(), self.source(), &observed)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "sweep failed; no rows deactivated");
                failure = Some(format!("sweep failed: {err}"));
                SweepReport::default()
            }
        };

        enter(&mut state, RunState::Done);
        let errored = stats.errored + transform_errors;
        let outcome = if errored > 0 || fetched.stop.is_failure() || failure.is_some() {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        };

        let summary = RunSummary {
            flavor: self.flavor,
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
            fetched: fetched.listings.len(),
            filtered_out,
            inserted: stats.inserted,
            updated: stats.updated,
            errored,
            deactivated: sweep.deactivated,
            pages: fetched.pages_fetched,
            stop_reason: Some(fetched.stop),
            sweep_skipped: sweep.skipped,
            failure,
        };
        info!(
            outcome = ?summary.outcome,
            fetched = summary.fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            errored = summary.errored,
            deactivated = summary.deactivated,
            "catalog sync finished"
        );
        summary
    }
}

/// Reads configuration from the environment, connects the store once and runs
/// each flavor in order.
pub async fn run_flavors_from_env(flavors: &[SyncFlavor]) -> Vec<RunSummary> {
    match SyncConfig::from_env() {
        Ok(config) => run_flavors(&config, flavors).await,
        Err(err) => {
            error!(error = %err, "configuration error");
            fail_all(flavors, &err.to_string())
        }
    }
}

pub async fn run_flavors(config: &SyncConfig, flavors: &[SyncFlavor]) -> Vec<RunSummary> {
    let store: Arc<dyn CatalogStore> = match PgStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "store unreachable");
            return fail_all(flavors, &format!("store unreachable: {err}"));
        }
    };

    let mut summaries = Vec::with_capacity(flavors.len());
    for &flavor in flavors {
        let summary = match CatalogSync::from_config(config, flavor, store.clone()) {
            Ok(sync) => sync.run().await,
            Err(err) => {
                error!(%flavor, error = %format!("{err:#}"), "sync setup failed");
                RunSummary::failed(flavor, Uuid::new_v4(), Utc::now(), format!("{err:#}"))
            }
        };
        summaries.push(summary);
    }
    summaries
}

fn fail_all(flavors: &[SyncFlavor], reason: &str) -> Vec<RunSummary> {
    flavors
        .iter()
        .map(|&flavor| RunSummary::failed(flavor, Uuid::new_v4(), Utc::now(), reason))
        .collect()
}
