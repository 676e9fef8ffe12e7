//! Built-in guards
//!
//! Both guards read their ceiling from the execution params through
//! [`PackLimits`]. A missing ceiling means the guard has nothing to enforce
//! and lets the chain continue.

use crate::{
    error::{Error, Result},
    rules::Guard,
    types::CreditPack,
};
use serde::{Deserialize, Serialize};

/// Ceilings a guarded execution may carry
pub trait PackLimits {
    /// Highest unit cost the caller accepts
    fn max_sms_cost(&self) -> Option<u64>;

    /// Highest balance the caller accepts
    fn max_credit(&self) -> Option<u64>;
}

/// Plain ceilings, for callers without their own params type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    /// Highest unit cost accepted
    pub sms_cost: Option<u64>,

    /// Highest balance accepted
    pub credit: Option<u64>,
}

impl PackLimits for Limits {
    fn max_sms_cost(&self) -> Option<u64> {
        self.sms_cost
    }

    fn max_credit(&self) -> Option<u64> {
        self.credit
    }
}

/// Rejects packs whose unit cost is above the caller's ceiling
#[derive(Debug, Clone, Copy, Default)]
pub struct NotExpensive;

impl<P: PackLimits> Guard<P> for NotExpensive {
    fn name(&self) -> &str {
        "not_expensive"
    }

    fn check(&self, pack: &CreditPack, params: &P) -> Result<()> {
        match params.max_sms_cost() {
            Some(ceiling) if pack.sms_cost > ceiling => Err(Error::TooCostly {
                sms_cost: pack.sms_cost,
                ceiling,
            }),
            _ => Ok(()),
        }
    }
}

/// Rejects packs holding more credit than the caller's ceiling
#[derive(Debug, Clone, Copy, Default)]
pub struct LowBudget;

impl<P: PackLimits> Guard<P> for LowBudget {
    fn name(&self) -> &str {
        "low_budget"
    }

    fn check(&self, pack: &CreditPack, params: &P) -> Result<()> {
        match params.max_credit() {
            Some(ceiling) if pack.credit > ceiling => Err(Error::TooRich {
                credit: pack.credit,
                ceiling,
            }),
            _ => Ok(()),
        }
    }
}
