use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::category::{CategoryPolicy, CategoryResolver};
use crate::client::CatalogClient;
use crate::clock::now_epoch_secs;
use crate::feedback::Feedback;
use crate::item::{CatalogFilter, Credentials, PageResult, SyncMode};
use crate::kv::KvStore;
use crate::lock::{DEFAULT_STALE_LOCK, SyncLock};
use crate::progress::{ProgressTracker, SyncPhase};
use crate::reconcile::{BatchReport, DEFAULT_BATCH_SIZE, ProductReconciler, SkipReason};
use crate::store::{ProductStore, StoreError, TaxonomyStore};
use crate::sweep::{
    DEFAULT_STALE_AFTER, DEFAULT_SWEEP_LIMIT, DiscontinuationSweeper, RemoteVerification,
};

/// Feedback entries kept in a persisted run summary.
const MAX_FEEDBACK: usize = 200;

/// Errors that end a run early.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Without page 1 there are no totals to paginate by.
    #[error("first page fetch failed: {0}")]
    FirstPage(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Tunables for a distributor integration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Distributor label. Namespaces lock/progress keys and tags products.
    pub distributor: String,
    pub credentials: Credentials,
    pub page_size: u32,
    /// Pause between page fetches.
    pub page_delay: Duration,
    pub batch_size: usize,
    pub stale_after: Duration,
    pub sweep_limit: usize,
    /// Re-check deletion candidates against the distributor before deleting.
    pub verify_deletions: bool,
    pub lock_ttl: Duration,
    pub stale_lock_after: Duration,
    pub category_policy: CategoryPolicy,
    pub fallback_category: String,
}

impl SyncSettings {
    pub fn new(distributor: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            distributor: distributor.into(),
            credentials,
            page_size: 100,
            page_delay: Duration::from_secs(1),
            batch_size: DEFAULT_BATCH_SIZE,
            stale_after: DEFAULT_STALE_AFTER,
            sweep_limit: DEFAULT_SWEEP_LIMIT,
            verify_deletions: false,
            lock_ttl: Duration::from_secs(3600),
            stale_lock_after: DEFAULT_STALE_LOCK,
            category_policy: CategoryPolicy::Strict,
            fallback_category: "Uncategorized".into(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.distributor.trim().is_empty() {
            return Err(SyncError::Configuration("distributor label is empty".into()));
        }
        if self.credentials.api_id.trim().is_empty() {
            return Err(SyncError::Configuration("missing distributor api_id".into()));
        }
        if self.category_policy == CategoryPolicy::Lenient
            && self.fallback_category.trim().is_empty()
        {
            return Err(SyncError::Configuration(
                "lenient category policy needs a fallback category".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_key(&self) -> String {
        format!("catalog_sync:{}:lock", self.distributor)
    }

    pub fn progress_key(&self) -> String {
        format!("catalog_sync:{}:progress", self.distributor)
    }

    pub fn abort_key(&self) -> String {
        format!("catalog_sync:{}:abort", self.distributor)
    }

    pub fn last_run_key(&self) -> String {
        format!("catalog_sync:{}:last_run", self.distributor)
    }
}

/// Collaborators and settings for a run.
#[derive(Clone)]
pub struct SyncContext {
    pub client: Arc<dyn CatalogClient>,
    pub products: Arc<dyn ProductStore>,
    pub taxonomy: Arc<dyn TaxonomyStore>,
    pub kv: Arc<dyn KvStore>,
    pub settings: SyncSettings,
}

/// What to sync and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub mode: SyncMode,
    pub filter: CatalogFilter,
    /// Run even if another run holds the lock.
    pub force: bool,
}

impl SyncRequest {
    pub fn full() -> Self {
        Self {
            mode: SyncMode::Full,
            filter: CatalogFilter::All,
            force: false,
        }
    }

    pub fn partial() -> Self {
        Self {
            mode: SyncMode::Partial,
            ..Self::full()
        }
    }

    pub fn with_filter(mut self, filter: CatalogFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Running,
    Completed,
    Aborted,
    Failed,
}

/// Persisted record of the most recent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub distributor: String,
    pub mode: SyncMode,
    pub forced: bool,
    pub outcome: RunOutcome,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub total_pages: u32,
    pub items_expected: u64,
    /// Pages reconciled, in the order they were processed.
    pub pages_processed: Vec<u32>,
    /// Pages skipped after the client gave up on them.
    pub failed_pages: Vec<u32>,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub category_updates: u64,
    pub swept: bool,
    pub deleted: u64,
    pub skip_reasons: BTreeMap<SkipReason, u64>,
    pub feedback: Vec<Feedback>,
    pub error: Option<String>,
}

impl RunSummary {
    fn start(settings: &SyncSettings, request: &SyncRequest) -> Self {
        Self {
            distributor: settings.distributor.clone(),
            mode: request.mode,
            forced: request.force,
            outcome: RunOutcome::Running,
            started_at: now_epoch_secs(),
            finished_at: None,
            total_pages: 0,
            items_expected: 0,
            pages_processed: Vec::new(),
            failed_pages: Vec::new(),
            processed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            category_updates: 0,
            swept: false,
            deleted: 0,
            skip_reasons: BTreeMap::new(),
            feedback: Vec::new(),
            error: None,
        }
    }

    fn push_feedback(&mut self, feedback: Feedback) {
        if self.feedback.len() < MAX_FEEDBACK {
            self.feedback.push(feedback);
        }
    }

    fn absorb(&mut self, page: u32, report: BatchReport) {
        self.pages_processed.push(page);
        self.processed += report.processed;
        self.created += report.created;
        self.updated += report.updated;
        self.skipped += report.skipped;
        self.category_updates += report.category_updates;
        for (reason, count) in report.skip_reasons {
            *self.skip_reasons.entry(reason).or_default() += count;
        }
        for feedback in report.feedback {
            self.push_feedback(feedback);
        }
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(now_epoch_secs());
    }
}

/// Live status for admin surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub active: bool,
    pub lock_age_secs: u64,
    /// Held longer than `stale_lock_after`; probably abandoned.
    pub lock_stale: bool,
    pub phase: SyncPhase,
    pub current_page: u32,
    pub total_pages: u32,
    pub processed: u64,
    pub expected: u64,
    pub abort_requested: bool,
}

/// Result of [`SyncOrchestrator::run`]. Errors never escape as `Err`; they
/// are recorded in the summary of a `Failed` outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(RunSummary),
    Aborted(RunSummary),
    Failed(RunSummary),
    /// Another run holds the lock and `force` was not set.
    AlreadyRunning(RunStatus),
}

impl SyncOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(s) | Self::Aborted(s) | Self::Failed(s) => Some(s),
            Self::AlreadyRunning(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Cloneable handle that asks a running sync to stop at its next page
/// boundary.
#[derive(Clone)]
pub struct AbortHandle {
    token: Arc<Mutex<CancellationToken>>,
    kv: Arc<dyn KvStore>,
    key: String,
    ttl: Duration,
}

impl AbortHandle {
    /// Cancel the in-process run and leave a flag for runs in other
    /// processes sharing the same store.
    pub fn request_abort(&self) -> Result<(), StoreError> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
        self.kv.set(&self.key, "1", Some(self.ttl))
    }
}

enum RunEnd {
    Completed,
    Aborted,
}

/// Releases the lock and clears transient state however the run ends,
/// including by panic.
struct RunGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let settings = &self.orchestrator.ctx.settings;
        let owned = match self.orchestrator.lock.release(&settings.lock_key()) {
            Ok(owned) => owned,
            Err(e) => {
                tracing::error!(error = %e, "failed to release sync lock");
                true
            }
        };
        // Progress and the abort flag belong to whoever holds the lock now.
        if !owned {
            tracing::warn!("sync lock taken over by another run; leaving its state in place");
            return;
        }
        self.orchestrator.progress.clear();
        if let Err(e) = self.orchestrator.ctx.kv.delete(&settings.abort_key()) {
            tracing::warn!(error = %e, "failed to clear abort flag");
        }
    }
}

/// Drives a sync run end to end: lock, paginate, reconcile, sweep, release.
///
/// Pages are fetched and reconciled strictly in ascending order, one at a
/// time. Abort requests are honored at page boundaries only, and an aborted
/// run never sweeps.
pub struct SyncOrchestrator {
    ctx: SyncContext,
    lock: SyncLock,
    progress: ProgressTracker,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext) -> Self {
        let lock = SyncLock::new(Arc::clone(&ctx.kv));
        let progress = ProgressTracker::new(Arc::clone(&ctx.kv), ctx.settings.progress_key());
        Self {
            ctx,
            lock,
            progress,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.ctx.settings
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: Arc::clone(&self.cancel),
            kv: Arc::clone(&self.ctx.kv),
            key: self.ctx.settings.abort_key(),
            ttl: self.ctx.settings.lock_ttl,
        }
    }

    pub fn request_abort(&self) -> Result<(), StoreError> {
        tracing::info!(distributor = %self.ctx.settings.distributor, "abort requested");
        self.abort_handle().request_abort()
    }

    /// Clear the lock and progress regardless of who holds them.
    pub fn force_release_lock(&self) -> Result<(), StoreError> {
        self.lock.force_release(&self.ctx.settings.lock_key())?;
        self.progress.clear();
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        let settings = &self.ctx.settings;
        let lock = match self.lock.is_held(&settings.lock_key()) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "could not read lock state");
                crate::lock::LockState {
                    held: false,
                    age_secs: 0,
                }
            }
        };
        let progress = self.progress.snapshot();
        let abort_requested = matches!(self.ctx.kv.get(&settings.abort_key()), Ok(Some(_)));

        RunStatus {
            active: lock.held,
            lock_age_secs: lock.age_secs,
            lock_stale: lock.is_stale(settings.stale_lock_after),
            phase: progress.phase,
            current_page: progress.current_page,
            total_pages: progress.total_pages,
            processed: progress.processed,
            expected: progress.expected,
            abort_requested,
        }
    }

    /// Summary of the most recent finished run, if any.
    pub fn last_run(&self) -> Result<Option<RunSummary>, StoreError> {
        let Some(raw) = self.ctx.kv.get(&self.ctx.settings.last_run_key())? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Database(format!("unreadable run summary: {e}")))
    }

    /// Run a sync. Never returns a raw error: failures come back as
    /// [`SyncOutcome::Failed`] with the error text in the summary.
    pub async fn run(&self, request: SyncRequest) -> SyncOutcome {
        let settings = &self.ctx.settings;
        let mut summary = RunSummary::start(settings, &request);

        if let Err(e) = settings.validate() {
            tracing::error!(error = %e, "sync not started");
            summary.error = Some(e.to_string());
            summary.finish(RunOutcome::Failed);
            return SyncOutcome::Failed(summary);
        }

        match self.acquire(&request) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(distributor = %settings.distributor, "sync already in progress");
                return SyncOutcome::AlreadyRunning(self.status());
            }
            Err(e) => {
                tracing::error!(error = %e, "could not take sync lock");
                summary.error = Some(e.to_string());
                summary.finish(RunOutcome::Failed);
                return SyncOutcome::Failed(summary);
            }
        }

        let _guard = RunGuard { orchestrator: self };
        let token = self.reset_abort();

        tracing::info!(
            distributor = %settings.distributor,
            mode = %request.mode,
            forced = request.force,
            "sync started"
        );

        let outcome = match self.execute(&request, &token, &mut summary).await {
            Ok(RunEnd::Completed) => RunOutcome::Completed,
            Ok(RunEnd::Aborted) => RunOutcome::Aborted,
            Err(e) => {
                tracing::error!(error = %e, "sync failed");
                summary.push_feedback(Feedback::error(e.to_string()));
                summary.error = Some(e.to_string());
                RunOutcome::Failed
            }
        };
        summary.finish(outcome);

        tracing::info!(
            outcome = ?outcome,
            processed = summary.processed,
            created = summary.created,
            skipped = summary.skipped,
            deleted = summary.deleted,
            failed_pages = summary.failed_pages.len(),
            "sync finished"
        );
        self.persist_summary(&summary);

        match outcome {
            RunOutcome::Aborted => SyncOutcome::Aborted(summary),
            RunOutcome::Failed => SyncOutcome::Failed(summary),
            RunOutcome::Completed | RunOutcome::Running => SyncOutcome::Completed(summary),
        }
    }

    fn acquire(&self, request: &SyncRequest) -> Result<bool, SyncError> {
        let settings = &self.ctx.settings;
        let key = settings.lock_key();
        let result = if request.force {
            self.lock.acquire_forced(&key, settings.lock_ttl).map(|()| true)
        } else {
            self.lock.try_acquire(&key, settings.lock_ttl)
        };
        result.map_err(|e| SyncError::Lock(e.to_string()))
    }

    /// Fresh cancellation token and cleared abort flag for a new run.
    fn reset_abort(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        if let Err(e) = self.ctx.kv.delete(&self.ctx.settings.abort_key()) {
            tracing::warn!(error = %e, "could not clear stale abort flag");
        }
        token
    }

    fn abort_requested(&self, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return true;
        }
        match self.ctx.kv.get(&self.ctx.settings.abort_key()) {
            Ok(Some(_)) => {
                token.cancel();
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "could not read abort flag");
                false
            }
        }
    }

    /// Wait out the inter-page delay. Returns false if aborted meanwhile.
    async fn pace(&self, token: &CancellationToken) -> bool {
        let delay = self.ctx.settings.page_delay;
        if delay.is_zero() {
            return !token.is_cancelled();
        }
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn fetch(&self, request: &SyncRequest, page: u32) -> PageResult {
        let settings = &self.ctx.settings;
        match self
            .ctx
            .client
            .fetch_page(
                &settings.credentials,
                request.mode,
                &request.filter,
                page,
                settings.page_size,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => PageResult::failed(page, e.to_string()),
        }
    }

    async fn execute(
        &self,
        request: &SyncRequest,
        token: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<RunEnd, SyncError> {
        let settings = &self.ctx.settings;
        let mode = request.mode;

        self.progress.clear();
        self.progress.set_phase(SyncPhase::Paginating);

        let first = self.fetch(request, 1).await;
        if let Some(error) = first.error {
            return Err(SyncError::FirstPage(error));
        }

        let total_pages = first.total_pages.max(1);
        summary.total_pages = total_pages;
        summary.items_expected = u64::from(first.total_items);
        self.progress.set_totals(total_pages, u64::from(first.total_items));

        let mut resolver = CategoryResolver::new(
            Arc::clone(&self.ctx.taxonomy),
            mode,
            settings.category_policy,
            settings.fallback_category.clone(),
        );
        if mode.is_full() {
            resolver.ensure_special_categories().await?;
            resolver.ensure_regular_categories(&first.categories).await?;
        }

        let mut reconciler = ProductReconciler::new(
            Arc::clone(&self.ctx.products),
            resolver,
            settings.distributor.clone(),
            settings.batch_size,
        );

        let mut pending = Some(first);
        for page in 1..=total_pages {
            let result = match pending.take() {
                Some(result) => result,
                None => {
                    if self.abort_requested(token) || !self.pace(token).await {
                        tracing::info!(page, "sync aborted before fetching page");
                        summary.push_feedback(Feedback::info(format!(
                            "aborted before page {page} of {total_pages}"
                        )));
                        return Ok(RunEnd::Aborted);
                    }

                    self.progress.set_phase(SyncPhase::Paginating);
                    let result = self.fetch(request, page).await;
                    if let Some(error) = &result.error {
                        tracing::warn!(page, error = %error, "page fetch failed; continuing");
                        summary.failed_pages.push(page);
                        summary.push_feedback(Feedback::warning(format!(
                            "page {page} skipped: {error}"
                        )));
                        self.progress.set_current_page(page);
                        continue;
                    }
                    result
                }
            };

            if mode.is_full() {
                let missing = categories_to_ensure(reconciler.categories(), &result);
                if !missing.is_empty() {
                    reconciler
                        .categories_mut()
                        .ensure_regular_categories(&missing)
                        .await?;
                }
            }

            self.progress.set_phase(SyncPhase::Reconciling);
            self.progress.set_current_page(page);

            let report = reconciler.reconcile_batch(&result.items, mode).await;
            tracing::info!(
                page,
                total_pages,
                items = result.items.len(),
                processed = report.processed,
                created = report.created,
                skipped = report.skipped,
                "page reconciled"
            );
            self.progress.add_processed(result.items.len() as u64);
            summary.absorb(page, report);
        }

        if !mode.is_full() {
            return Ok(RunEnd::Completed);
        }
        if !matches!(request.filter, CatalogFilter::All) {
            tracing::debug!(
                filter = ?request.filter,
                "filtered run; discontinuation sweep skipped"
            );
            return Ok(RunEnd::Completed);
        }
        if !summary.failed_pages.is_empty() {
            tracing::warn!(
                failed_pages = ?summary.failed_pages,
                "incomplete catalog coverage; discontinuation sweep skipped"
            );
            summary.push_feedback(Feedback::warning(
                "discontinuation sweep skipped: some pages failed",
            ));
            return Ok(RunEnd::Completed);
        }

        self.progress.set_phase(SyncPhase::Sweeping);
        let mut sweeper =
            DiscontinuationSweeper::new(Arc::clone(&self.ctx.products), settings.distributor.clone());
        if settings.verify_deletions {
            sweeper = sweeper.with_verification(RemoteVerification {
                client: Arc::clone(&self.ctx.client),
                credentials: settings.credentials.clone(),
            });
        }

        let active = reconciler.into_confirmed_active();
        let report = sweeper
            .sweep(&active, settings.stale_after, settings.sweep_limit)
            .await?;
        tracing::info!(
            candidates = report.candidates,
            deleted = report.deleted,
            retained = report.retained,
            "discontinuation sweep finished"
        );
        summary.swept = true;
        summary.deleted = report.deleted;
        for feedback in report.feedback {
            summary.push_feedback(feedback);
        }

        Ok(RunEnd::Completed)
    }

    fn persist_summary(&self, summary: &RunSummary) {
        let encoded = match serde_json::to_string(summary) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "could not encode run summary");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .kv
            .set(&self.ctx.settings.last_run_key(), &encoded, None)
        {
            tracing::error!(error = %e, "could not persist run summary");
        }
    }
}

/// Regular categories a full-run page needs that the resolver cannot place:
/// listed page categories it has not loaded, plus declared item categories
/// that match nothing.
fn categories_to_ensure(resolver: &CategoryResolver, page: &PageResult) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let listed = page.categories.iter().filter(|name| !resolver.knows(name));
    let declared = page
        .items
        .iter()
        .map(|item| &item.category)
        .filter(|name| !name.trim().is_empty() && !resolver.matches(name));
    for name in listed.chain(declared) {
        let name = name.trim();
        if !names.iter().any(|known| known == name) {
            names.push(name.to_owned());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryTaxonomyStore, catalog_item, catalog_pages};

    fn resolver(names: &[&str]) -> CategoryResolver {
        CategoryResolver::new(
            Arc::new(InMemoryTaxonomyStore::with_categories(names)),
            SyncMode::Full,
            CategoryPolicy::Strict,
            "Uncategorized",
        )
    }

    #[tokio::test]
    async fn unlisted_item_categories_are_ensured() {
        let mut resolver = resolver(&["Tools"]);
        resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        let mut pages = catalog_pages(vec![vec![
            catalog_item("A", "Tools"),
            catalog_item("B", "Garden"),
            catalog_item("C", " Garden "),
            catalog_item("D", ""),
        ]]);
        pages[0].categories.clear();

        assert_eq!(categories_to_ensure(&resolver, &pages[0]), vec!["Garden"]);
    }

    #[tokio::test]
    async fn partial_matches_need_nothing() {
        let mut resolver = resolver(&["Wooden Widgets"]);
        resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        let mut pages = catalog_pages(vec![vec![catalog_item("W-1", "Widgets")]]);
        pages[0].categories = vec!["Wooden Widgets".into()];

        assert!(categories_to_ensure(&resolver, &pages[0]).is_empty());
    }
}
