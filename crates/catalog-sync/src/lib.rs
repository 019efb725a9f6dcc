pub mod category;
pub mod client;
pub mod clock;
pub mod feedback;
pub mod item;
pub mod kv;
pub mod lock;
pub mod order;
pub mod orchestrator;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod sweep;

pub use category::{CategoryPolicy, CategoryResolver, ResolvedCategories, SpecialCategory};
pub use client::{CatalogClient, CatalogError};
pub use feedback::Feedback;
pub use item::{
    CatalogFilter, CatalogItem, Credentials, DimensionError, Dimensions, MAX_PAGE_SIZE, PageResult,
    StockStatus, SyncMode, clamp_page_size, parse_price_cents,
};
pub use kv::{KvStore, MemoryKvStore};
pub use lock::{LockState, SyncLock};
pub use orchestrator::{
    AbortHandle, RunOutcome, RunStatus, RunSummary, SyncContext, SyncError, SyncOrchestrator,
    SyncOutcome, SyncRequest, SyncSettings,
};
pub use order::{Address, Order, OrderClient, OrderConfirmation, OrderError, OrderLine};
pub use progress::{ProgressSnapshot, ProgressTracker, SyncPhase};
pub use reconcile::{BatchReport, ProductReconciler, SkipReason};
pub use store::{
    CategoryRef, CategoryTerm, LocalProduct, NewProduct, ProductId, ProductStore, ProductUpdate,
    StaleProduct, StoreError, TaxonomyStore,
};
pub use sweep::{DiscontinuationSweeper, RemoteVerification, SweepReport};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
