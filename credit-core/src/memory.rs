//! In-process pack store
//!
//! Keeps packs in a hash map with a `BTreeMap` position index. Used by tests
//! and by deployments configured with the `memory` backend.

use crate::{
    error::Result,
    store::{PackStore, WriteSet},
    types::{CreditPack, Order, PackId},
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Inner {
    packs: HashMap<PackId, CreditPack>,
    positions: BTreeMap<i64, PackId>,
}

impl Inner {
    fn ordered(&self, order: Order) -> Vec<CreditPack> {
        let mut packs: Vec<CreditPack> = self
            .positions
            .values()
            .filter_map(|id| self.packs.get(id).cloned())
            .collect();
        if order == Order::Descending {
            packs.reverse();
        }
        packs
    }
}

/// Pack store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackStore for MemoryStore {
    fn find_all_ordered(&self, order: Order) -> Result<Vec<CreditPack>> {
        Ok(self.inner.read().ordered(order))
    }

    fn find_with_positive_balance(&self) -> Result<Vec<CreditPack>> {
        let mut packs = self.inner.read().ordered(Order::Ascending);
        packs.retain(|pack| pack.credit > 0);
        Ok(packs)
    }

    fn find_by_id(&self, id: PackId) -> Result<Option<CreditPack>> {
        Ok(self.inner.read().packs.get(&id).cloned())
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write();

        let staged = writes.stage(
            |id| Ok(inner.packs.get(&id).cloned()),
            |position| Ok(inner.positions.get(&position).copied()),
        )?;

        for write in &staged {
            if let Some(previous) = write.previous_position {
                if inner.positions.get(&previous) == Some(&write.pack.id) {
                    inner.positions.remove(&previous);
                }
            }
        }

        for write in staged {
            inner.positions.insert(write.pack.position, write.pack.id);
            inner.packs.insert(write.pack.id, write.pack);
        }

        tracing::debug!(ops = writes.len(), "Memory store commit applied");

        Ok(())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner.read().packs.len() as u64)
    }
}
