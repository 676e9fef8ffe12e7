//! Guarded execution against a single pack
//!
//! A [`RuleChain`] is an ordered list of guards in front of an effect. Guards
//! run first to last against the pack as stored; the first one to reject
//! ends the run with its own error and the effect is never called. The
//! effect sees the pack mutably, and a changed balance is written back once
//! it returns.

use crate::{
    error::{Error, Result},
    store::{PackStore, WriteSet},
    types::{CreditPack, PackId},
};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Precondition checked before an effect runs
pub trait Guard<P>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Return an error to stop the chain
    fn check(&self, pack: &CreditPack, params: &P) -> Result<()>;
}

/// Guard built from a closure, see [`guard_fn`]
pub struct FnGuard<F> {
    name: String,
    check: F,
}

/// Wrap a closure as a named guard
pub fn guard_fn<P, F>(name: impl Into<String>, check: F) -> FnGuard<F>
where
    F: Fn(&CreditPack, &P) -> Result<()> + Send + Sync,
{
    FnGuard {
        name: name.into(),
        check,
    }
}

impl<F> fmt::Debug for FnGuard<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGuard").field("name", &self.name).finish()
    }
}

impl<P, F> Guard<P> for FnGuard<F>
where
    F: Fn(&CreditPack, &P) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, pack: &CreditPack, params: &P) -> Result<()> {
        (self.check)(pack, params)
    }
}

/// Ordered guards, outermost first
pub struct RuleChain<P> {
    guards: Vec<Box<dyn Guard<P>>>,
}

impl<P> RuleChain<P> {
    /// Chain with no guards; the effect always runs
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// Append a guard; it runs after every guard already in the chain
    pub fn with_guard(mut self, guard: impl Guard<P> + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Number of guards
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the chain has no guards
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Guard names in evaluation order
    pub fn names(&self) -> Vec<&str> {
        self.guards.iter().map(|guard| guard.name()).collect()
    }

    /// Run every guard in order, stopping at the first rejection
    pub fn check(&self, pack: &CreditPack, params: &P) -> Result<()> {
        for guard in &self.guards {
            tracing::debug!(guard = guard.name(), pack_id = %pack.id, "Evaluating guard");
            if let Err(err) = guard.check(pack, params) {
                tracing::warn!(
                    guard = guard.name(),
                    pack_id = %pack.id,
                    error = %err,
                    "Guard rejected execution"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Check the guards, then hand the pack to `effect`
    pub fn execute<T, F>(&self, pack: &mut CreditPack, params: &P, effect: F) -> Result<T>
    where
        F: FnOnce(&mut CreditPack, &P) -> Result<T>,
    {
        self.check(pack, params)?;
        effect(pack, params)
    }
}

impl<P> Default for RuleChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for RuleChain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleChain")
            .field("guards", &self.names())
            .finish()
    }
}

/// Fetch a pack, run `chain` and `effect` on it, and persist a new balance
///
/// Effects may change `credit` only. Any other field change is refused and
/// nothing is written. Must run on the single writer.
pub fn execute_on_pack<P, T, F>(
    store: &dyn PackStore,
    chain: &RuleChain<P>,
    pack_id: PackId,
    params: &P,
    effect: F,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnOnce(&mut CreditPack, &P) -> Result<T>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let original = store
        .find_by_id(pack_id)?
        .ok_or_else(|| Error::PackNotFound(pack_id.to_string()))?;

    let mut working = original.clone();
    let value = chain.execute(&mut working, params, effect)?;

    if working.id != original.id
        || working.position != original.position
        || working.sms_cost != original.sms_cost
    {
        return Err(Error::InvariantViolation(format!(
            "effect on pack {} changed more than its credit",
            pack_id
        )));
    }

    if working.credit != original.credit {
        if cancel.is_cancelled() {
            tracing::warn!(pack_id = %pack_id, "Guarded execution cancelled before commit");
            return Err(Error::Cancelled);
        }

        let updated = CreditPack {
            credit: working.credit,
            ..original
        };
        store.commit(WriteSet::new().put(updated))?;

        tracing::debug!(
            pack_id = %pack_id,
            credit = working.credit,
            "Guarded effect updated balance"
        );
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::NewPack;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Params {
        threshold: u64,
    }

    fn stored_pack(store: &MemoryStore, credit: u64, sms_cost: u64) -> CreditPack {
        let pack = NewPack::new(0, credit, sms_cost).into_pack(Uuid::now_v7());
        store.save(pack.clone()).unwrap();
        pack
    }

    fn reject(
        name: &'static str,
    ) -> FnGuard<impl Fn(&CreditPack, &Params) -> Result<()> + Send + Sync> {
        guard_fn(name, move |_: &CreditPack, _: &Params| {
            Err(Error::rejected(name, "always"))
        })
    }

    #[test]
    fn test_empty_chain_runs_effect() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);
        let chain = RuleChain::<Params>::new();

        let value = execute_on_pack(
            &store,
            &chain,
            pack.id,
            &Params { threshold: 0 },
            |p, _| Ok(p.credit / 2),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(value, 5);
    }

    #[test]
    fn test_first_rejection_wins() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);
        let chain = RuleChain::new().with_guard(reject("first")).with_guard(reject("second"));

        let err = execute_on_pack(
            &store,
            &chain,
            pack.id,
            &Params { threshold: 0 },
            |_, _| Ok(()),
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Rejected { ref guard, .. } if guard == "first"));
    }

    #[test]
    fn test_rejection_skips_later_guards_and_effect() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let chain = RuleChain::new()
            .with_guard(guard_fn("threshold", |p: &CreditPack, params: &Params| {
                if p.credit > params.threshold {
                    Err(Error::rejected("threshold", "too much credit"))
                } else {
                    Ok(())
                }
            }))
            .with_guard(guard_fn("counter", move |_: &CreditPack, _: &Params| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));

        let mut effect_ran = false;
        let result = execute_on_pack(
            &store,
            &chain,
            pack.id,
            &Params { threshold: 5 },
            |p, _| {
                effect_ran = true;
                p.credit = 0;
                Ok(())
            },
            &CancellationToken::new(),
        );

        assert!(result.unwrap_err().is_rejection());
        assert!(!effect_ran);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.find_by_id(pack.id).unwrap().unwrap().credit, 10);
    }

    #[test]
    fn test_effect_credit_change_is_persisted() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);

        execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            pack.id,
            &Params { threshold: 0 },
            |p, _| {
                p.credit += 15;
                Ok(())
            },
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(store.find_by_id(pack.id).unwrap().unwrap().credit, 25);
    }

    #[test]
    fn test_effect_may_not_move_pack() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);

        let result = execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            pack.id,
            &Params { threshold: 0 },
            |p, _| {
                p.position = 9;
                p.credit = 1;
                Ok(())
            },
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        let stored = store.find_by_id(pack.id).unwrap().unwrap();
        assert_eq!(stored.position, 0);
        assert_eq!(stored.credit, 10);
    }

    #[test]
    fn test_effect_error_writes_nothing() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);

        let result: Result<()> = execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            pack.id,
            &Params { threshold: 0 },
            |p, _| {
                p.credit = 0;
                Err(Error::Effect("Cannot split".to_string()))
            },
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(Error::Effect(_))));
        assert_eq!(store.find_by_id(pack.id).unwrap().unwrap().credit, 10);
    }

    #[test]
    fn test_cancelled_before_fetch() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut effect_ran = false;
        let result = execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            pack.id,
            &Params { threshold: 0 },
            |_, _| {
                effect_ran = true;
                Ok(())
            },
            &cancel,
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!effect_ran);
    }

    #[test]
    fn test_cancelled_during_effect_writes_nothing() {
        let store = MemoryStore::new();
        let pack = stored_pack(&store, 10, 2);
        let cancel = CancellationToken::new();

        let result = execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            pack.id,
            &Params { threshold: 0 },
            |p, _| {
                p.credit = 3;
                cancel.cancel();
                Ok(())
            },
            &cancel,
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.find_by_id(pack.id).unwrap().unwrap().credit, 10);
    }

    #[test]
    fn test_unknown_pack() {
        let store = MemoryStore::new();
        let result = execute_on_pack(
            &store,
            &RuleChain::<Params>::new(),
            Uuid::now_v7(),
            &Params { threshold: 0 },
            |_, _| Ok(()),
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(Error::PackNotFound(_))));
    }

    #[test]
    fn test_chain_names_in_order() {
        let chain = RuleChain::<Params>::new()
            .with_guard(reject("a"))
            .with_guard(reject("b"));

        assert_eq!(chain.names(), vec!["a", "b"]);
        assert_eq!(chain.len(), 2);
    }
}
