//! Property-based tests for credit ledger invariants
//!
//! These tests use proptest to verify:
//! - Unique positions: no two packs share a position after any create
//! - Order stability: a colliding insert shifts exactly the packs at or after it
//! - Conservation: units consumed + units unmet == units requested
//! - Balance floor: consumption never draws more than a pack holds

use credit_core::{Config, CreditLedger, NewPack, StorageBackend};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// Strategy for generating pack requests
fn new_pack_strategy() -> impl Strategy<Value = NewPack> {
    (-5i64..15, 0u64..200, 1u64..6)
        .prop_map(|(position, credit, sms_cost)| NewPack::new(position, credit, sms_cost))
}

/// Strategy for generating pack balances in position order
fn balances_strategy() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..100, 1u64..5), 0..10)
}

async fn create_test_ledger() -> CreditLedger {
    let mut config = Config::default();
    config.storage = StorageBackend::Memory;
    CreditLedger::open(config).await.unwrap()
}

proptest! {
    /// Property: positions stay unique across any sequence of creates
    #[test]
    fn prop_positions_unique(requests in prop::collection::vec(new_pack_strategy(), 1..25)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;

            for (i, request) in requests.iter().enumerate() {
                ledger.create(*request).await.unwrap();

                let packs = ledger.list_packs().await.unwrap();
                prop_assert_eq!(packs.len(), i + 1);

                let positions: HashSet<i64> = packs.iter().map(|p| p.position).collect();
                prop_assert_eq!(positions.len(), packs.len());
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: inserting on a taken position moves every pack at or after it up by one
    #[test]
    fn prop_colliding_insert_shifts_tail(existing in 1i64..12, target_seed in 0i64..100) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            let target = target_seed % existing;

            for position in 0..existing {
                ledger.create(NewPack::new(position, 10, 1)).await.unwrap();
            }
            let before: HashMap<_, _> = ledger
                .list_packs()
                .await
                .unwrap()
                .into_iter()
                .map(|p| (p.id, p.position))
                .collect();

            let inserted = ledger.create(NewPack::new(target, 10, 1)).await.unwrap();
            prop_assert_eq!(inserted.position, target);

            let after = ledger.list_packs().await.unwrap();
            prop_assert_eq!(after.len() as i64, existing + 1);

            for pack in after.iter().filter(|p| p.id != inserted.id) {
                let original = before[&pack.id];
                if original < target {
                    prop_assert_eq!(pack.position, original);
                } else {
                    prop_assert_eq!(pack.position, original + 1);
                }
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: consumed plus unmet units always equal the request
    #[test]
    fn prop_consumption_conserves_units(
        balances in balances_strategy(),
        requested in 0u64..400,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            for (position, (credit, sms_cost)) in balances.iter().enumerate() {
                ledger
                    .create(NewPack::new(position as i64, *credit, *sms_cost))
                    .await
                    .unwrap();
            }

            let plan = ledger.consume(requested).await.unwrap();
            let consumed: u64 = plan.used_packs.iter().map(|u| u.units_used).sum();

            prop_assert_eq!(consumed + plan.units_remaining, requested);
            prop_assert_eq!(plan.units_consumed(), consumed);

            let capacity: u64 = balances.iter().map(|(c, s)| c / s).sum();
            prop_assert_eq!(consumed, requested.min(capacity));

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: every debit fits inside the balance it was drawn from
    #[test]
    fn prop_balances_never_overdrawn(
        balances in balances_strategy(),
        requests in prop::collection::vec(0u64..60, 1..6),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            for (position, (credit, sms_cost)) in balances.iter().enumerate() {
                ledger
                    .create(NewPack::new(position as i64, *credit, *sms_cost))
                    .await
                    .unwrap();
            }

            for requested in requests {
                let before: HashMap<_, _> = ledger
                    .list_packs()
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|p| (p.id, p))
                    .collect();

                let plan = ledger.consume(requested).await.unwrap();

                for usage in &plan.used_packs {
                    let pack = &before[&usage.id];
                    let debit = usage.units_used * pack.sms_cost;
                    prop_assert!(debit <= pack.credit);
                    prop_assert_eq!(usage.credit_remaining_after, pack.credit - debit);

                    let stored = ledger.get_pack(usage.id).await.unwrap();
                    prop_assert_eq!(stored.credit, usage.credit_remaining_after);
                }
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
