//! crates/refund_agent_core/src/taxonomy.rs
//!
//! The fixed refund taxonomy and its eligibility windows.
//!
//! Each canonical category carries a declarative `WindowRule` (which order
//! timestamp to measure from, and the comparison to apply). Rules are
//! evaluated generically, so adding a category means adding a table row,
//! not a code path.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Days after order creation by which delivery is promised. LATE_DELIVERY
/// measures the delivery delay against this date.
pub const DELIVERY_SLA_DAYS: i64 = 5;

/// Which order timestamp a window rule measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBasis {
    /// The order's creation timestamp.
    CreatedAt,
    /// The order's delivery timestamp; null until fulfilled.
    DeliveredAt,
    /// How far past the promised date (`created_at` + SLA) the order was
    /// actually delivered.
    DeliveryDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Filing must happen within this many hours of the basis timestamp.
    WithinHours(i64),
    /// Filing must happen within this many days of the basis timestamp.
    WithinDays(i64),
    /// The basis duration must exceed this many days.
    ExceedsDays(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRule {
    pub basis: TimeBasis,
    pub check: WindowCheck,
}

/// Order timestamps a rule is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct OrderTimestamps {
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WindowRule {
    /// Evaluates this rule at `now`. On failure returns the human-readable
    /// name of the rule that failed, which callers surface verbatim.
    pub fn evaluate(
        &self,
        category: &str,
        ts: &OrderTimestamps,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        match self.basis {
            TimeBasis::CreatedAt => self.check_elapsed(category, now - ts.created_at, "order"),
            TimeBasis::DeliveredAt => match ts.delivered_at {
                Some(delivered) => self.check_elapsed(category, now - delivered, "delivery"),
                None => Err(format!("{}: order has not been delivered yet", category)),
            },
            TimeBasis::DeliveryDelay => match ts.delivered_at {
                Some(delivered) => {
                    let promised = ts.created_at + Duration::days(DELIVERY_SLA_DAYS);
                    self.check_elapsed(category, delivered - promised, "the promised date")
                }
                None => Err(format!("{}: order has not been delivered yet", category)),
            },
        }
    }

    fn check_elapsed(
        &self,
        category: &str,
        elapsed: Duration,
        basis_label: &str,
    ) -> Result<(), String> {
        match self.check {
            WindowCheck::WithinHours(hours) => {
                if elapsed <= Duration::hours(hours) {
                    Ok(())
                } else {
                    Err(format!(
                        "{}: must be filed within {} hours of {}",
                        category, hours, basis_label
                    ))
                }
            }
            WindowCheck::WithinDays(days) => {
                if elapsed <= Duration::days(days) {
                    Ok(())
                } else {
                    Err(format!(
                        "{}: must be filed within {} days of {}",
                        category, days, basis_label
                    ))
                }
            }
            WindowCheck::ExceedsDays(days) => {
                if elapsed > Duration::days(days) {
                    Ok(())
                } else {
                    Err(format!(
                        "{}: delivery was not more than {} days past {}",
                        category, days, basis_label
                    ))
                }
            }
        }
    }
}

/// One canonical refund category.
#[derive(Debug, Clone, Copy)]
pub struct Category {
    pub code: &'static str,
    pub description: &'static str,
    pub rule: WindowRule,
}

/// The fixed, pre-seeded taxonomy. Immutable reference data; the database
/// seed mirrors this table and assigns each entry its id.
pub const CATEGORIES: [Category; 10] = [
    Category {
        code: "DAMAGED_ITEM",
        description: "Item arrived damaged or defective",
        rule: WindowRule {
            basis: TimeBasis::DeliveredAt,
            check: WindowCheck::WithinDays(7),
        },
    },
    Category {
        code: "MISSING_ITEM",
        description: "Item missing from the delivered package",
        rule: WindowRule {
            basis: TimeBasis::DeliveredAt,
            check: WindowCheck::WithinHours(48),
        },
    },
    Category {
        code: "LATE_DELIVERY",
        description: "Order delivered well past the promised date",
        rule: WindowRule {
            basis: TimeBasis::DeliveryDelay,
            check: WindowCheck::ExceedsDays(2),
        },
    },
    Category {
        code: "DUPLICATE_CHARGE",
        description: "Charged more than once for the same order",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinDays(30),
        },
    },
    Category {
        code: "CANCELLATION",
        description: "Order cancelled shortly after it was placed",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinHours(24),
        },
    },
    Category {
        code: "RETURN_PICKUP_FAILED",
        description: "Scheduled return pickup did not happen",
        rule: WindowRule {
            basis: TimeBasis::DeliveredAt,
            check: WindowCheck::WithinDays(14),
        },
    },
    Category {
        code: "RETURN_TO_ORIGIN",
        description: "Shipment returned to the seller undelivered",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinDays(30),
        },
    },
    Category {
        code: "PAYMENT_DEBITED_BUT_FAILED",
        description: "Payment debited but the order failed to place",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinDays(14),
        },
    },
    Category {
        code: "SERVICE_NOT_DELIVERED",
        description: "Paid service or add-on was never provided",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinDays(30),
        },
    },
    Category {
        code: "PRICE_ADJUSTMENT",
        description: "Price dropped immediately after purchase",
        rule: WindowRule {
            basis: TimeBasis::CreatedAt,
            check: WindowCheck::WithinDays(7),
        },
    },
];

/// Looks up a canonical category by its code.
pub fn category(code: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.code == code)
}

/// A taxonomy row as persisted: the seeded id plus the canonical code and
/// description.
#[derive(Debug, Clone)]
pub struct TaxonomyEntry {
    pub id: Uuid,
    pub code: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn taxonomy_has_ten_fixed_entries() {
        assert_eq!(CATEGORIES.len(), 10);
        assert!(category("DAMAGED_ITEM").is_some());
        assert!(category("SOMETHING_ELSE").is_none());
    }

    #[test]
    fn damaged_item_within_seven_days_of_delivery() {
        let rule = category("DAMAGED_ITEM").unwrap().rule;
        let ts = OrderTimestamps {
            created_at: at(2025, 6, 1, 12),
            delivered_at: Some(at(2025, 6, 5, 12)),
        };
        assert!(rule.evaluate("DAMAGED_ITEM", &ts, at(2025, 6, 10, 12)).is_ok());
        // 10 days after delivery: outside the window
        let err = rule
            .evaluate("DAMAGED_ITEM", &ts, at(2025, 6, 15, 12))
            .unwrap_err();
        assert!(err.contains("7 days"));
    }

    #[test]
    fn missing_item_uses_hours() {
        let rule = category("MISSING_ITEM").unwrap().rule;
        let ts = OrderTimestamps {
            created_at: at(2025, 6, 1, 12),
            delivered_at: Some(at(2025, 6, 5, 12)),
        };
        assert!(rule.evaluate("MISSING_ITEM", &ts, at(2025, 6, 7, 11)).is_ok());
        assert!(rule.evaluate("MISSING_ITEM", &ts, at(2025, 6, 7, 13)).is_err());
    }

    #[test]
    fn late_delivery_requires_delay_past_sla() {
        let rule = category("LATE_DELIVERY").unwrap().rule;
        // Promised by created + 5d; delivered 8 days after creation = 3 days late.
        let late = OrderTimestamps {
            created_at: at(2025, 6, 1, 12),
            delivered_at: Some(at(2025, 6, 9, 12)),
        };
        assert!(rule.evaluate("LATE_DELIVERY", &late, at(2025, 6, 10, 0)).is_ok());
        // Delivered only 1 day past the promised date.
        let on_time = OrderTimestamps {
            created_at: at(2025, 6, 1, 12),
            delivered_at: Some(at(2025, 6, 7, 12)),
        };
        assert!(rule.evaluate("LATE_DELIVERY", &on_time, at(2025, 6, 10, 0)).is_err());
    }

    #[test]
    fn delivery_basis_fails_before_delivery() {
        let rule = category("DAMAGED_ITEM").unwrap().rule;
        let ts = OrderTimestamps {
            created_at: at(2025, 6, 1, 12),
            delivered_at: None,
        };
        let err = rule.evaluate("DAMAGED_ITEM", &ts, at(2025, 6, 2, 12)).unwrap_err();
        assert!(err.contains("not been delivered"));
    }
}
