//! Actor-based concurrency for the credit ledger
//!
//! All mutation goes through one tokio task that owns the write side of the
//! pack store:
//! - Each command runs read → compute → commit with nothing interleaved
//! - Concurrent creates cannot both see a free position
//! - Concurrent consumes cannot both spend the same balance
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   allocator::create_pack / consumption::consume /     │
//! │   rules::execute_on_pack                              │
//! │                       │                               │
//! │                       ▼                               │
//! │             PackStore::commit(WriteSet)               │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    allocator::{self, Allocation},
    consumption,
    metrics::Metrics,
    rules::{self, RuleChain},
    store::PackStore,
    types::{ConsumptionPlan, CreditPack, NewPack, Order, PackId},
    Error, Result,
};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Guarded execution packaged to run on the writer
pub type GuardedJob = Box<dyn FnOnce(&dyn PackStore, &Metrics) + Send>;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Create a pack at its requested position
    CreatePack {
        params: NewPack,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<Allocation>>,
    },

    /// Consume units and persist the new balances
    Consume {
        units: u64,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<ConsumptionPlan>>,
    },

    /// Plan a consumption without writing
    PlanConsumption {
        units: u64,
        response: oneshot::Sender<Result<ConsumptionPlan>>,
    },

    /// Run a guarded execution
    Execute { job: GuardedJob },

    /// Get pack by ID
    GetPack {
        pack_id: PackId,
        response: oneshot::Sender<Result<CreditPack>>,
    },

    /// List packs by position
    ListPacks {
        response: oneshot::Sender<Result<Vec<CreditPack>>>,
    },

    /// Shutdown actor
    Shutdown,
}

impl fmt::Debug for LedgerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerMessage::CreatePack { params, .. } => {
                f.debug_struct("CreatePack").field("params", params).finish()
            }
            LedgerMessage::Consume { units, .. } => {
                f.debug_struct("Consume").field("units", units).finish()
            }
            LedgerMessage::PlanConsumption { units, .. } => {
                f.debug_struct("PlanConsumption").field("units", units).finish()
            }
            LedgerMessage::Execute { .. } => f.write_str("Execute"),
            LedgerMessage::GetPack { pack_id, .. } => {
                f.debug_struct("GetPack").field("pack_id", pack_id).finish()
            }
            LedgerMessage::ListPacks { .. } => f.write_str("ListPacks"),
            LedgerMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    store: Arc<dyn PackStore>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics
    metrics: Metrics,
}

impl fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerActor").finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn PackStore>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                tracing::info!("Credit ledger actor shutting down");
                break;
            }

            let started = Instant::now();
            self.handle_message(msg);
            self.metrics
                .record_command_duration(started.elapsed().as_secs_f64());
        }

        // Releases the store before the task completes
        drop(self.store);
        tracing::info!("Credit ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&self, msg: LedgerMessage) {
        let store = self.store.as_ref();

        match msg {
            LedgerMessage::CreatePack {
                params,
                cancel,
                response,
            } => {
                let result = allocator::create_pack(store, params, &cancel);
                match &result {
                    Ok(allocation) => self.metrics.record_pack_created(allocation.shifted),
                    Err(e) => log_failure("create", e),
                }
                let _ = response.send(result);
            }

            LedgerMessage::Consume {
                units,
                cancel,
                response,
            } => {
                let result = consumption::consume(store, units, &cancel);
                match &result {
                    Ok(plan) => self
                        .metrics
                        .record_consumption(plan.units_consumed(), plan.units_remaining),
                    Err(e) => log_failure("consume", e),
                }
                let _ = response.send(result);
            }

            LedgerMessage::PlanConsumption { units, response } => {
                let _ = response.send(consumption::preview(store, units));
            }

            LedgerMessage::Execute { job } => job(store, &self.metrics),

            LedgerMessage::GetPack { pack_id, response } => {
                let result = store
                    .find_by_id(pack_id)
                    .and_then(|pack| pack.ok_or_else(|| Error::PackNotFound(pack_id.to_string())));
                let _ = response.send(result);
            }

            LedgerMessage::ListPacks { response } => {
                let _ = response.send(store.find_all_ordered(Order::Ascending));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Faults log at error, refused or cancelled requests at warn
fn log_failure(operation: &'static str, err: &Error) {
    if err.is_fault() {
        tracing::error!(operation, error = %err, "Ledger command failed");
    } else {
        tracing::warn!(operation, error = %err, "Ledger command refused");
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn send(&self, msg: LedgerMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create a pack
    pub async fn create_pack(
        &self,
        params: NewPack,
        cancel: CancellationToken,
    ) -> Result<Allocation> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.request(|response| LedgerMessage::CreatePack {
            params,
            cancel,
            response,
        })
        .await
    }

    /// Consume units and persist balances
    pub async fn consume(&self, units: u64, cancel: CancellationToken) -> Result<ConsumptionPlan> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.request(|response| LedgerMessage::Consume {
            units,
            cancel,
            response,
        })
        .await
    }

    /// Plan a consumption without writing
    pub async fn plan_consumption(&self, units: u64) -> Result<ConsumptionPlan> {
        self.request(|response| LedgerMessage::PlanConsumption { units, response })
            .await
    }

    /// Run `effect` on a pack behind `chain`
    pub async fn execute<P, T, F>(
        &self,
        chain: Arc<RuleChain<P>>,
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
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.request(move |response| LedgerMessage::Execute {
            job: Box::new(move |store: &dyn PackStore, metrics: &Metrics| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    rules::execute_on_pack(store, &chain, pack_id, &params, effect, &cancel)
                }));

                let result = outcome.unwrap_or_else(|_| {
                    tracing::error!(pack_id = %pack_id, "Guarded execution panicked");
                    Err(Error::Effect("effect panicked".to_string()))
                });

                match &result {
                    Ok(_) => metrics.record_effect_applied(),
                    Err(e) if e.is_rejection() => metrics.record_guard_rejection(),
                    Err(e) => log_failure("execute", e),
                }
                let _ = response.send(result);
            }),
        })
        .await
    }

    /// Get pack by ID
    pub async fn get_pack(&self, pack_id: PackId) -> Result<CreditPack> {
        self.request(|response| LedgerMessage::GetPack { pack_id, response })
            .await
    }

    /// List packs by position
    pub async fn list_packs(&self) -> Result<Vec<CreditPack>> {
        self.request(|response| LedgerMessage::ListPacks { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.send(LedgerMessage::Shutdown).await
    }
}

/// Spawn the ledger actor
///
/// The returned task handle completes once the actor has stopped and
/// released the store.
pub fn spawn_ledger_actor(
    store: Arc<dyn PackStore>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(store, rx, metrics);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (LedgerHandle::new(tx), task)
}
