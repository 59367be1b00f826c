//! crates/refund_agent_core/src/refund.rs
//!
//! The refund workflow's pure pre-conditions and state machine.
//!
//! States: PROCESSING (initial) → APPROVED | DENIED (terminal). There is no
//! intermediate review state: every pre-condition is deterministic and
//! evaluated at filing time, and anything needing human judgment is an
//! external escalation, not an automaton state. The store adapter calls
//! these checks inside its transaction so the invariants hold under
//! concurrent filings.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::RefundStatus;
use crate::ports::{PortError, PortResult};
use crate::taxonomy::{category, Category, OrderTimestamps};

/// Everything `file_refund` needs, passed explicitly: the resolved user and
/// the filing details. No ambient session state.
#[derive(Debug, Clone)]
pub struct RefundFiling {
    pub user_id: Uuid,
    pub order_item_id: Uuid,
    pub category_code: String,
    pub reason: String,
    pub evidence: Option<String>,
}

/// The two terminal outcomes an operator can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundDecision {
    Approved,
    Denied,
}

impl RefundDecision {
    pub fn as_status(&self) -> RefundStatus {
        match self {
            RefundDecision::Approved => RefundStatus::Approved,
            RefundDecision::Denied => RefundStatus::Denied,
        }
    }
}

/// Evaluates the filing pre-conditions in order: duplicate prevention,
/// taxonomy membership, eligibility window. Returns the canonical category
/// on success so the caller can persist against its seeded id.
///
/// `existing` is every refund status already recorded for the order item;
/// DENIED entries do not block a new filing.
pub fn validate_filing(
    existing: &[RefundStatus],
    category_code: &str,
    timestamps: &OrderTimestamps,
    now: DateTime<Utc>,
) -> PortResult<&'static Category> {
    if existing.iter().any(RefundStatus::blocks_new_filing) {
        return Err(PortError::DuplicateRefund);
    }

    let category = category(category_code)
        .ok_or_else(|| PortError::InvalidTaxonomy(category_code.to_string()))?;

    category
        .rule
        .evaluate(category.code, timestamps, now)
        .map_err(PortError::IneligibleWindow)?;

    Ok(category)
}

/// Checks the PROCESSING → terminal transition. A refund already in a
/// terminal state reports `AlreadyResolved`; a second resolution attempt is
/// a caller bug and must never be silently ignored.
pub fn resolve_transition(
    current: RefundStatus,
    decision: RefundDecision,
) -> PortResult<RefundStatus> {
    if current.is_terminal() {
        return Err(PortError::AlreadyResolved);
    }
    Ok(decision.as_status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn delivered_days_ago(days: i64, now: DateTime<Utc>) -> OrderTimestamps {
        OrderTimestamps {
            created_at: now - Duration::days(days + 3),
            delivered_at: Some(now - Duration::days(days)),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn processing_refund_blocks_second_filing() {
        let err = validate_filing(
            &[RefundStatus::Processing],
            "DAMAGED_ITEM",
            &delivered_days_ago(1, now()),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, PortError::DuplicateRefund));
    }

    #[test]
    fn approved_refund_blocks_second_filing() {
        let err = validate_filing(
            &[RefundStatus::Denied, RefundStatus::Approved],
            "DAMAGED_ITEM",
            &delivered_days_ago(1, now()),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, PortError::DuplicateRefund));
    }

    #[test]
    fn denied_refund_does_not_block_refiling() {
        let category = validate_filing(
            &[RefundStatus::Denied],
            "DAMAGED_ITEM",
            &delivered_days_ago(1, now()),
            now(),
        )
        .unwrap();
        assert_eq!(category.code, "DAMAGED_ITEM");
    }

    #[test]
    fn unknown_category_is_invalid_taxonomy() {
        let err = validate_filing(&[], "BUYERS_REMORSE", &delivered_days_ago(1, now()), now())
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidTaxonomy(code) if code == "BUYERS_REMORSE"));
    }

    #[test]
    fn damaged_item_ten_days_after_delivery_is_ineligible() {
        let err = validate_filing(&[], "DAMAGED_ITEM", &delivered_days_ago(10, now()), now())
            .unwrap_err();
        match err {
            PortError::IneligibleWindow(rule) => assert!(rule.contains("DAMAGED_ITEM")),
            other => panic!("expected IneligibleWindow, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_check_runs_before_taxonomy_check() {
        // Both violations present: duplicate wins, per the filing order.
        let err = validate_filing(
            &[RefundStatus::Processing],
            "BUYERS_REMORSE",
            &delivered_days_ago(1, now()),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, PortError::DuplicateRefund));
    }

    #[test]
    fn resolve_from_processing_reaches_terminal() {
        assert_eq!(
            resolve_transition(RefundStatus::Processing, RefundDecision::Approved).unwrap(),
            RefundStatus::Approved
        );
        assert_eq!(
            resolve_transition(RefundStatus::Processing, RefundDecision::Denied).unwrap(),
            RefundStatus::Denied
        );
    }

    #[test]
    fn terminal_states_reject_resolution() {
        for status in [RefundStatus::Approved, RefundStatus::Denied] {
            let err = resolve_transition(status, RefundDecision::Approved).unwrap_err();
            assert!(matches!(err, PortError::AlreadyResolved));
        }
    }
}
