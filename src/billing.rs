//! Billing Aggregator (§4.10): sums a homogeneous batch of receipts into a
//! period record. Pure function, no I/O — the caller supplies the receipt
//! batch and the period window.

use chrono::{DateTime, Utc};

use crate::errors::GateError;
use crate::identifiers::{GateId, ReceiptId, SubjectId};
use crate::receipts::ConsumptionReceipt;

#[derive(Debug, Clone)]
pub struct BillingPeriod {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub subject_id: SubjectId,
    pub gate_id: GateId,
    pub total_calls: u64,
    pub total_cost_cents: i64,
    pub total_platform_fee_cents: i64,
    pub receipt_ids: Vec<ReceiptId>,
}

/// Aggregate `receipts` into a single period record. All receipts must share
/// the same `subject_id` and `gate_id`; a mixed batch is a caller error, not
/// a partial result. An empty batch has no period to report.
pub fn aggregate(
    receipts: &[ConsumptionReceipt],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<Option<BillingPeriod>, GateError> {
    let Some(first) = receipts.first() else {
        return Ok(None);
    };

    for receipt in receipts {
        if receipt.subject_id != first.subject_id || receipt.gate_id != first.gate_id {
            return Err(GateError::invalid(
                "billing aggregation requires a homogeneous batch (same subject_id and gate_id)",
            ));
        }
    }

    let total_calls = receipts.iter().map(|r| r.consumption.units).sum();
    let total_cost_cents = receipts.iter().map(|r| r.consumption.cost_cents).sum();
    let total_platform_fee_cents = receipts.iter().map(|r| r.consumption.platform_fee_cents).sum();
    let receipt_ids = receipts.iter().map(|r| r.receipt_id.clone()).collect();

    Ok(Some(BillingPeriod {
        period_start,
        period_end,
        subject_id: first.subject_id.clone(),
        gate_id: first.gate_id.clone(),
        total_calls,
        total_cost_cents,
        total_platform_fee_cents,
        receipt_ids,
    }))
}
