//! Position allocation for new packs
//!
//! A new pack always lands on the position it asks for. If that position is
//! taken, every pack at or after it moves up by one, which keeps positions
//! unique and leaves the relative order of existing packs unchanged. Shifts
//! and the insert are committed as one write set.

use crate::{
    error::{Error, Result},
    store::{PackStore, WriteSet},
    types::{CreditPack, NewPack, Order, PackField, PackId},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Packs that must move up by one so `position` can be taken
///
/// Empty when nothing sits on `position`. Otherwise the whole `>= position`
/// range is returned, so a pack one slot further along that the first shift
/// would collide with moves too.
pub fn shift_targets(existing: &[CreditPack], position: i64) -> Vec<PackId> {
    let taken = existing.iter().any(|pack| pack.position == position);
    if !taken {
        return Vec::new();
    }

    existing
        .iter()
        .filter(|pack| pack.position >= position)
        .map(|pack| pack.id)
        .collect()
}

/// Writes that shift the colliding range and insert `pack`
pub fn insertion_writes(existing: &[CreditPack], pack: CreditPack) -> WriteSet {
    shift_targets(existing, pack.position)
        .into_iter()
        .fold(WriteSet::new(), |writes, id| {
            writes.increment(id, PackField::Position, 1)
        })
        .put(pack)
}

/// Result of inserting a pack
#[derive(Debug, Clone)]
pub struct Allocation {
    /// The saved pack
    pub pack: CreditPack,

    /// How many existing packs moved up
    pub shifted: usize,
}

/// Create a pack at its requested position, shifting others as needed
///
/// Must run on the single writer; the read and the commit are not locked
/// together here.
pub fn create_pack(
    store: &dyn PackStore,
    params: NewPack,
    cancel: &CancellationToken,
) -> Result<Allocation> {
    params.validate()?;

    // Descending order: the shift range sits at the front
    let existing = store.find_all_ordered(Order::Descending)?;
    let pack = params.into_pack(Uuid::now_v7());
    let writes = insertion_writes(&existing, pack.clone());
    let shifted = writes.len() - 1;

    if cancel.is_cancelled() {
        tracing::warn!(position = params.position, "Pack creation cancelled before commit");
        return Err(Error::Cancelled);
    }

    store.commit(writes)?;

    let saved = store
        .find_by_id(pack.id)?
        .ok_or_else(|| Error::Storage(format!("Pack {} missing after commit", pack.id)))?;

    tracing::info!(
        pack_id = %saved.id,
        position = saved.position,
        credit = saved.credit,
        sms_cost = saved.sms_cost,
        shifted,
        "Credit pack created"
    );

    Ok(Allocation {
        pack: saved,
        shifted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn packs_at(positions: &[i64]) -> Vec<CreditPack> {
        positions
            .iter()
            .map(|p| NewPack::new(*p, 100, 1).into_pack(Uuid::now_v7()))
            .collect()
    }

    fn seeded_store(positions: &[i64]) -> (MemoryStore, Vec<CreditPack>) {
        let store = MemoryStore::new();
        let packs = packs_at(positions);
        for pack in &packs {
            store.save(pack.clone()).unwrap();
        }
        (store, packs)
    }

    fn ordered_ids(store: &MemoryStore) -> Vec<PackId> {
        store
            .find_all_ordered(Order::Ascending)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn test_no_collision_no_shift() {
        let existing = packs_at(&[0, 1, 2]);
        assert!(shift_targets(&existing, 3).is_empty());
        assert!(shift_targets(&existing, -1).is_empty());
    }

    #[test]
    fn test_gap_is_not_a_collision() {
        let existing = packs_at(&[0, 5]);
        assert!(shift_targets(&existing, 3).is_empty());
    }

    #[test]
    fn test_collision_selects_whole_range() {
        let existing = packs_at(&[0, 1, 2, 7]);
        let targets = shift_targets(&existing, 1);

        let expected: Vec<PackId> = existing[1..].iter().map(|p| p.id).collect();
        assert_eq!(targets, expected);
    }

    #[test]
    fn test_insertion_writes_end_with_put() {
        let existing = packs_at(&[0, 1]);
        let pack = NewPack::new(0, 10, 1).into_pack(Uuid::now_v7());
        let writes = insertion_writes(&existing, pack.clone());

        assert_eq!(writes.len(), 3);
        assert!(matches!(writes.ops().last(), Some(crate::store::WriteOp::Put(p)) if p.id == pack.id));
    }

    #[test]
    fn test_create_in_the_middle() {
        let (store, packs) = seeded_store(&[0, 1, 2]);
        let allocation =
            create_pack(&store, NewPack::new(1, 10, 1), &CancellationToken::new()).unwrap();

        assert_eq!(allocation.shifted, 2);
        assert_eq!(allocation.pack.position, 1);
        assert_eq!(
            ordered_ids(&store),
            vec![packs[0].id, allocation.pack.id, packs[1].id, packs[2].id]
        );
    }

    #[test]
    fn test_create_at_the_end() {
        let (store, packs) = seeded_store(&[0, 1, 2]);
        let allocation =
            create_pack(&store, NewPack::new(3, 10, 1), &CancellationToken::new()).unwrap();

        assert_eq!(allocation.shifted, 0);
        assert_eq!(
            ordered_ids(&store),
            vec![packs[0].id, packs[1].id, packs[2].id, allocation.pack.id]
        );
    }

    #[test]
    fn test_create_rejects_zero_cost() {
        let (store, _) = seeded_store(&[0]);
        let result = create_pack(&store, NewPack::new(0, 10, 0), &CancellationToken::new());

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_cancelled_create_writes_nothing() {
        let (store, packs) = seeded_store(&[0, 1]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = create_pack(&store, NewPack::new(0, 10, 1), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(ordered_ids(&store), vec![packs[0].id, packs[1].id]);
    }
}
