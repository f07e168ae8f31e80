//! FEFO allocation: pure batch-selection algorithm.
//!
//! Given a required quantity and a medicine's eligible batches in FEFO
//! order, produce the ordered draw-down plan and the unmet shortfall.
//! No I/O and no side effects; applying the plan is the orchestrator's job.

use crate::types::Batch;

/// One planned draw against a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draw {
    pub batch_id: u64,
    pub qty: u32,
}

/// The result of a FEFO allocation
#[derive(Clone, Debug, Default)]
pub struct Allocation {
    /// Ordered (batch, quantity) draws summing to `required - shortfall`
    pub plan: Vec<Draw>,
    /// Unmet portion of the requirement
    pub shortfall: u32,
}

impl Allocation {
    pub fn total_drawn(&self) -> u32 {
        self.plan.iter().map(|d| d.qty).sum()
    }
}

/// Allocate `required` units across `batches` in the given order.
///
/// `batches` must already be FEFO-sorted (expiry ascending, no-expiry last,
/// batch id tie-break) and contain only stocked, unexpired batches; the
/// inventory's `eligible_batches` provides exactly that.
pub fn allocate(required: u32, batches: &[Batch]) -> Allocation {
    let mut remaining = required;
    let mut plan = Vec::new();

    for batch in batches {
        if remaining == 0 {
            break;
        }
        let drawn = remaining.min(batch.quantity);
        if drawn > 0 {
            plan.push(Draw {
                batch_id: batch.id,
                qty: drawn,
            });
            remaining -= drawn;
        }
    }

    Allocation {
        plan,
        shortfall: remaining,
    }
}
