//! Pack store abstraction
//!
//! Every mutation reaches a store as a [`WriteSet`]: an ordered list of puts
//! and field increments applied as one atomic unit. Before a backend writes
//! anything the set is staged against current state, which enforces:
//!
//! - Position uniqueness: no two packs end up on the same position
//! - Balance floor: credit never drops below zero
//! - Increments only target packs that exist

use crate::{
    error::{Error, Result},
    types::{CreditPack, Order, PackField, PackId},
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Persistence collaborator for credit packs
pub trait PackStore: Send + Sync {
    /// All packs sorted by position
    fn find_all_ordered(&self, order: Order) -> Result<Vec<CreditPack>>;

    /// Packs with `credit > 0`, lowest position first
    fn find_with_positive_balance(&self) -> Result<Vec<CreditPack>>;

    /// Pack by ID
    fn find_by_id(&self, id: PackId) -> Result<Option<CreditPack>>;

    /// Apply every op in the set, or none of them
    fn commit(&self, writes: WriteSet) -> Result<()>;

    /// Number of stored packs
    fn count(&self) -> Result<u64>;

    /// Insert or replace a single pack
    fn save(&self, pack: CreditPack) -> Result<()> {
        self.commit(WriteSet::new().put(pack))
    }

    /// Add `delta` to one integer field of a pack
    fn increment_field(&self, id: PackId, field: PackField, delta: i64) -> Result<()> {
        self.commit(WriteSet::new().increment(id, field, delta))
    }
}

/// Single write operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace a pack record
    Put(CreditPack),

    /// Add `delta` to a field of an existing pack
    Increment {
        /// Target pack
        id: PackId,
        /// Field to change
        field: PackField,
        /// Signed change
        delta: i64,
    },
}

/// Ordered set of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

/// A pack as it will look after commit
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    /// Position the pack held before the commit (`None` for new packs)
    pub previous_position: Option<i64>,
    /// Record to write
    pub pack: CreditPack,
}

impl WriteSet {
    /// Empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a put
    pub fn put(mut self, pack: CreditPack) -> Self {
        self.ops.push(WriteOp::Put(pack));
        self
    }

    /// Append an increment
    pub fn increment(mut self, id: PackId, field: PackField, delta: i64) -> Self {
        self.ops.push(WriteOp::Increment { id, field, delta });
        self
    }

    /// Ops in application order
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Resolve the set against current state and check invariants
    ///
    /// `load` reads a pack by ID, `owner_of` reads which pack currently holds
    /// a position. Nothing is written; the caller applies the returned
    /// records only if this succeeds.
    pub(crate) fn stage<L, O>(&self, mut load: L, mut owner_of: O) -> Result<Vec<StagedWrite>>
    where
        L: FnMut(PackId) -> Result<Option<CreditPack>>,
        O: FnMut(i64) -> Result<Option<PackId>>,
    {
        let now = Utc::now();
        let mut staged: Vec<StagedWrite> = Vec::with_capacity(self.ops.len());
        let mut index: HashMap<PackId, usize> = HashMap::new();

        for op in &self.ops {
            match op {
                WriteOp::Put(pack) => match index.get(&pack.id) {
                    Some(&slot) => staged[slot].pack = pack.clone(),
                    None => {
                        let existing = load(pack.id)?;
                        let mut pack = pack.clone();
                        match &existing {
                            Some(current) => pack.created_at = current.created_at,
                            None => pack.created_at = now,
                        }
                        index.insert(pack.id, staged.len());
                        staged.push(StagedWrite {
                            previous_position: existing.map(|current| current.position),
                            pack,
                        });
                    }
                },
                WriteOp::Increment { id, field, delta } => {
                    let slot = match index.get(id) {
                        Some(&slot) => slot,
                        None => {
                            let current =
                                load(*id)?.ok_or_else(|| Error::PackNotFound(id.to_string()))?;
                            index.insert(*id, staged.len());
                            staged.push(StagedWrite {
                                previous_position: Some(current.position),
                                pack: current,
                            });
                            staged.len() - 1
                        }
                    };
                    apply_increment(&mut staged[slot].pack, *field, *delta)?;
                }
            }
        }

        let mut landing = HashSet::with_capacity(staged.len());
        for write in &staged {
            if !landing.insert(write.pack.position) {
                return Err(Error::PositionConflict(write.pack.position));
            }
        }

        for write in &mut staged {
            if let Some(holder) = owner_of(write.pack.position)? {
                if holder != write.pack.id && !index.contains_key(&holder) {
                    return Err(Error::PositionConflict(write.pack.position));
                }
            }
            write.pack.updated_at = now;
        }

        Ok(staged)
    }
}

fn apply_increment(pack: &mut CreditPack, field: PackField, delta: i64) -> Result<()> {
    match field {
        PackField::Position => {
            pack.position = pack.position.checked_add(delta).ok_or_else(|| {
                Error::InvariantViolation(format!("position overflow on pack {}", pack.id))
            })?;
        }
        PackField::Credit => {
            pack.credit = pack.credit.checked_add_signed(delta).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "credit of pack {} cannot change by {} from {}",
                    pack.id, delta, pack.credit
                ))
            })?;
        }
    }
    Ok(())
}
