//! Core types for the credit ledger
//!
//! All balances and costs are whole units. A pack's `credit` is drawn down in
//! multiples of its `sms_cost`, so `credit / sms_cost` is the number of
//! messages the pack can still pay for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Credit pack identifier (UUIDv7, assigned at creation)
pub type PackId = Uuid;

/// A prepaid pool of credit with a consumption priority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPack {
    /// Unique pack ID
    pub id: PackId,

    /// Consumption priority; lower positions are drained first
    pub position: i64,

    /// Remaining balance
    pub credit: u64,

    /// Cost of one unit (message) drawn from this pack
    pub sms_cost: u64,

    /// Created timestamp (set by the store)
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp (set by the store)
    pub updated_at: DateTime<Utc>,
}

impl CreditPack {
    /// Number of whole units the remaining balance pays for
    ///
    /// A zero `sms_cost` never passes validation; should one reach storage
    /// anyway the pack is treated as having no capacity.
    pub fn unit_capacity(&self) -> u64 {
        self.credit.checked_div(self.sms_cost).unwrap_or(0)
    }

    /// Whether the balance is exhausted
    pub fn is_depleted(&self) -> bool {
        self.credit == 0
    }
}

/// Parameters for creating a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPack {
    /// Requested position
    pub position: i64,

    /// Opening balance
    pub credit: u64,

    /// Cost of one unit
    pub sms_cost: u64,
}

impl NewPack {
    /// Create new pack parameters
    pub fn new(position: i64, credit: u64, sms_cost: u64) -> Self {
        Self {
            position,
            credit,
            sms_cost,
        }
    }

    /// Reject parameters the consumption engine cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.sms_cost == 0 {
            return Err(crate::Error::InvalidRequest(
                "sms cost must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the record to persist; timestamps are restamped by the store
    pub(crate) fn into_pack(self, id: PackId) -> CreditPack {
        let now = Utc::now();
        CreditPack {
            id,
            position: self.position,
            credit: self.credit,
            sms_cost: self.sms_cost,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Units drawn from a single pack by one consumption request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackUsage {
    /// Pack the units were drawn from
    pub id: PackId,

    /// Units drawn
    pub units_used: u64,

    /// Pack balance after the draw
    pub credit_remaining_after: u64,
}

/// Per-pack breakdown of one consumption request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionPlan {
    /// Demand the packs could not cover (0 if fully satisfied)
    pub units_remaining: u64,

    /// Packs visited, in consumption order
    pub used_packs: Vec<PackUsage>,
}

impl ConsumptionPlan {
    /// Total units drawn across all packs
    pub fn units_consumed(&self) -> u64 {
        self.used_packs.iter().map(|usage| usage.units_used).sum()
    }

    /// Whether the whole request was covered
    pub fn is_satisfied(&self) -> bool {
        self.units_remaining == 0
    }
}

/// Sort direction for position scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Lowest position first
    Ascending,
    /// Highest position first
    Descending,
}

/// Integer fields a store can increment in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackField {
    /// Consumption priority
    Position,
    /// Remaining balance
    Credit,
}

impl fmt::Display for PackField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackField::Position => write!(f, "position"),
            PackField::Credit => write!(f, "credit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(credit: u64, sms_cost: u64) -> CreditPack {
        NewPack::new(0, credit, sms_cost).into_pack(Uuid::now_v7())
    }

    #[test]
    fn test_unit_capacity_truncates() {
        assert_eq!(pack(10, 1).unit_capacity(), 10);
        assert_eq!(pack(10, 3).unit_capacity(), 3);
        assert_eq!(pack(1, 2).unit_capacity(), 0);
        assert_eq!(pack(10, 0).unit_capacity(), 0);
    }

    #[test]
    fn test_new_pack_validation() {
        assert!(NewPack::new(0, 10, 1).validate().is_ok());
        assert!(NewPack::new(-4, 0, 7).validate().is_ok());

        let err = NewPack::new(0, 10, 0).validate().unwrap_err();
        assert!(matches!(err, crate::Error::InvalidRequest(_)));
    }

    #[test]
    fn test_plan_totals() {
        let plan = ConsumptionPlan {
            units_remaining: 3,
            used_packs: vec![
                PackUsage {
                    id: Uuid::now_v7(),
                    units_used: 5,
                    credit_remaining_after: 0,
                },
                PackUsage {
                    id: Uuid::now_v7(),
                    units_used: 2,
                    credit_remaining_after: 1,
                },
            ],
        };

        assert_eq!(plan.units_consumed(), 7);
        assert!(!plan.is_satisfied());
        assert!(ConsumptionPlan::default().is_satisfied());
    }
}
