//! Greedy consumption of credit packs
//!
//! Packs are drained in position order. Each pack contributes as many whole
//! units as its balance pays for, a pack is only partially spent when the
//! request runs out first, and packs after that point are not visited.
//!
//! # Invariants
//!
//! - Conservation: `units_consumed + units_remaining == requested`
//! - Balance floor: a pack never gives more than `credit / sms_cost` units

use crate::{
    error::{Error, Result},
    store::{PackStore, WriteSet},
    types::{ConsumptionPlan, CreditPack, PackUsage},
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Compute how `requested` units are drawn from `packs`
///
/// `packs` must already be in consumption order. Packs with no balance are
/// skipped without an entry; a funded pack too small for a single unit is
/// recorded with zero units.
pub fn plan(packs: &[CreditPack], requested: u64) -> ConsumptionPlan {
    packs
        .iter()
        .filter(|pack| !pack.is_depleted())
        .fold(
            ConsumptionPlan {
                units_remaining: requested,
                used_packs: Vec::new(),
            },
            |mut acc, pack| {
                if acc.units_remaining == 0 {
                    return acc;
                }

                let units_used = acc.units_remaining.min(pack.unit_capacity());
                acc.units_remaining -= units_used;
                acc.used_packs.push(PackUsage {
                    id: pack.id,
                    units_used,
                    credit_remaining_after: pack.credit - units_used * pack.sms_cost,
                });
                acc
            },
        )
}

/// Balance updates that carry out `plan`
///
/// Each drawn pack is rewritten with its planned balance, so a draw is never
/// limited by the signed range of an increment.
pub fn debit_writes(packs: &[CreditPack], plan: &ConsumptionPlan) -> Result<WriteSet> {
    let by_id: HashMap<_, _> = packs.iter().map(|pack| (pack.id, pack)).collect();
    let mut writes = WriteSet::new();

    for usage in plan.used_packs.iter().filter(|usage| usage.units_used > 0) {
        let pack = by_id
            .get(&usage.id)
            .ok_or_else(|| Error::PackNotFound(usage.id.to_string()))?;
        writes = writes.put(CreditPack {
            credit: usage.credit_remaining_after,
            ..(*pack).clone()
        });
    }

    Ok(writes)
}

/// Plan a consumption against current balances without writing anything
pub fn preview(store: &dyn PackStore, requested: u64) -> Result<ConsumptionPlan> {
    let packs = store.find_with_positive_balance()?;
    Ok(plan(&packs, requested))
}

/// Plan a consumption and persist the new balances in one commit
///
/// Must run on the single writer so no other mutation lands between the
/// read and the commit.
pub fn consume(
    store: &dyn PackStore,
    requested: u64,
    cancel: &CancellationToken,
) -> Result<ConsumptionPlan> {
    let packs = store.find_with_positive_balance()?;
    let plan = plan(&packs, requested);
    let writes = debit_writes(&packs, &plan)?;

    if cancel.is_cancelled() {
        tracing::warn!(requested, "Consumption cancelled before commit");
        return Err(Error::Cancelled);
    }

    store.commit(writes)?;

    tracing::debug!(
        requested,
        consumed = plan.units_consumed(),
        unmet = plan.units_remaining,
        packs = plan.used_packs.len(),
        "Credit consumed"
    );

    Ok(plan)
}
