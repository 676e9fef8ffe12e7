//! Main credit ledger orchestration layer
//!
//! Ties together the pack store, the writer actor and metrics into the
//! async API callers use.
//!
//! # Example
//!
//! ```no_run
//! use credit_core::{Config, CreditLedger, NewPack};
//!
//! #[tokio::main]
//! async fn main() -> credit_core::Result<()> {
//!     let config = Config::default();
//!     let ledger = CreditLedger::open(config).await?;
//!
//!     ledger.create(NewPack::new(0, 100, 1)).await?;
//!     let plan = ledger.consume(40).await?;
//!     assert!(plan.is_satisfied());
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    config::StorageBackend,
    memory::MemoryStore,
    metrics::Metrics,
    rules::RuleChain,
    storage::Storage,
    store::PackStore,
    types::{ConsumptionPlan, CreditPack, NewPack, PackId},
    Config, Error, Result,
};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main credit ledger interface
pub struct CreditLedger {
    /// Actor handle; every operation goes through the single writer
    handle: LedgerHandle,

    /// Actor task, awaited on shutdown
    actor: JoinHandle<()>,

    /// Metrics shared with the actor
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditLedger")
            .field("service_name", &self.config.service_name)
            .field("storage", &self.config.storage)
            .finish()
    }
}

impl CreditLedger {
    /// Open ledger with the backend named in `config`
    pub async fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn PackStore> = match config.storage {
            StorageBackend::Rocksdb => Arc::new(Storage::open(&config)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };

        Self::with_store(store, config).await
    }

    /// Open ledger over an existing store
    pub async fn with_store(store: Arc<dyn PackStore>, config: Config) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let (handle, actor) =
            spawn_ledger_actor(store, metrics.clone(), config.actor.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            storage = ?config.storage,
            "Credit ledger opened"
        );

        Ok(Self {
            handle,
            actor,
            metrics,
            config,
        })
    }

    /// Create a pack at its requested position
    ///
    /// Packs at or after a taken position move up by one; the shift and the
    /// insert commit together.
    pub async fn create(&self, params: NewPack) -> Result<CreditPack> {
        self.create_cancellable(params, CancellationToken::new())
            .await
    }

    /// [`create`](Self::create), abandoned if `cancel` fires before commit
    pub async fn create_cancellable(
        &self,
        params: NewPack,
        cancel: CancellationToken,
    ) -> Result<CreditPack> {
        params.validate()?;
        let allocation = self.handle.create_pack(params, cancel).await?;
        Ok(allocation.pack)
    }

    /// Draw `units` from packs in position order and persist the balances
    pub async fn consume(&self, units: u64) -> Result<ConsumptionPlan> {
        self.consume_cancellable(units, CancellationToken::new())
            .await
    }

    /// [`consume`](Self::consume), abandoned if `cancel` fires before commit
    pub async fn consume_cancellable(
        &self,
        units: u64,
        cancel: CancellationToken,
    ) -> Result<ConsumptionPlan> {
        self.handle.consume(units, cancel).await
    }

    /// Compute how `units` would be drawn, without writing anything
    pub async fn plan_consumption(&self, units: u64) -> Result<ConsumptionPlan> {
        self.handle.plan_consumption(units).await
    }

    /// Run `effect` on a pack if every guard in `chain` accepts it
    ///
    /// Guards run in chain order and the first rejection is returned as is.
    /// A balance change made by the effect is persisted when it returns Ok.
    pub async fn execute<P, T, F>(
        &self,
        chain: impl Into<Arc<RuleChain<P>>>,
        pack_id: PackId,
        params: P,
        effect: F,
    ) -> Result<T>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut CreditPack, &P) -> Result<T> + Send + 'static,
    {
        self.execute_cancellable(chain, pack_id, params, effect, CancellationToken::new())
            .await
    }

    /// [`execute`](Self::execute), abandoned if `cancel` fires before commit
    pub async fn execute_cancellable<P, T, F>(
        &self,
        chain: impl Into<Arc<RuleChain<P>>>,
        pack_id: PackId,
        params: P,
        effect: F,
        cancel: CancellationToken,
    ) -> Result<T>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut CreditPack, &P) -> Result<T> + Send + 'static,
    {
        self.handle
            .execute(chain.into(), pack_id, params, effect, cancel)
            .await
    }

    /// Get pack by ID
    pub async fn get_pack(&self, pack_id: PackId) -> Result<CreditPack> {
        self.handle.get_pack(pack_id).await
    }

    /// All packs, lowest position first
    pub async fn list_packs(&self) -> Result<Vec<CreditPack>> {
        self.handle.list_packs().await
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    ///
    /// Returns once the actor has drained its mailbox and released the
    /// store, so the same data directory can be reopened right away.
    pub async fn shutdown(self) -> Result<()> {
        let sent = self.handle.shutdown().await;

        self.actor
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger actor failed: {}", e)))?;

        tracing::info!(service = %self.config.service_name, "Credit ledger shut down");
        sent
    }
}
