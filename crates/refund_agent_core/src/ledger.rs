//! crates/refund_agent_core/src/ledger.rs
//!
//! Derived monetary figures for order items. All functions are pure and use
//! the price/tax snapshot captured on the order item, never the product's
//! current catalog values.

use crate::domain::{DiscountKind, OrderItem};
use crate::money::{apply_tax, percent_of, Money};

/// `quantity × unit_price`, tax-exclusive.
pub fn line_total(item: &OrderItem) -> Money {
    item.unit_price * item.quantity as i64
}

/// `line_total × (1 + tax_percent)`, truncated to whole minor units.
pub fn line_total_with_tax(item: &OrderItem) -> Money {
    apply_tax(line_total(item), item.tax_percent)
}

/// The combined discount share attributable to this item.
///
/// Percent discounts are computed against the tax-exclusive line total;
/// fixed-amount discounts attach to a single order item and apply in full.
pub fn discount_share(item: &OrderItem) -> Money {
    let base = line_total(item);
    item.discounts
        .iter()
        .map(|d| match d.kind {
            DiscountKind::Percent(p) => percent_of(base, p),
            DiscountKind::Fixed(amount) => amount,
        })
        .fold(Money::zero(), |acc, m| acc + m)
}

/// The maximum amount a refund for this item may reach:
/// tax-inclusive line total minus the item's discount share, floored at
/// zero. Shipping and platform fees are out-of-scope entities and never
/// participate.
pub fn refundable_base(item: &OrderItem) -> Money {
    (line_total_with_tax(item) - discount_share(item)).max_zero()
}

/// Human-readable derivation of `refundable_base`, surfaced to the shopper
/// by the eligibility tool.
pub fn refund_breakdown(item: &OrderItem) -> String {
    let base = line_total(item);
    let tax = line_total_with_tax(item) - base;
    let discount = discount_share(item);
    let total = refundable_base(item);

    let mut breakdown = format!("Item: {} + Tax: {}", base, tax);
    if !discount.is_zero() {
        let labels: Vec<String> = item
            .discounts
            .iter()
            .map(|d| match d.kind {
                DiscountKind::Percent(p) => format!("{} ({} off)", d.code, p),
                DiscountKind::Fixed(amount) => format!("{} ({} off)", d.code, amount),
            })
            .collect();
        breakdown.push_str(&format!(" - Discounts: {} ({})", discount, labels.join(", ")));
    }
    breakdown.push_str(&format!(" = {}", total));
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Discount, DiscountKind, Product};
    use crate::money::Percent;
    use uuid::Uuid;

    fn item(quantity: u32, unit_price: i64, tax_bps: u32, discounts: Vec<Discount>) -> OrderItem {
        let unit_price = Money::from_minor(unit_price);
        let tax_percent = Percent::from_bps(tax_bps);
        OrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product: Product {
                id: Uuid::new_v4(),
                title: "Smart Watch".to_string(),
                description: None,
                // Catalog values deliberately differ from the captured
                // snapshot; the ledger must never read them.
                unit_price: Money::from_minor(999_999),
                tax_percent: Percent::from_bps(2800),
                stock_quantity: 3,
            },
            quantity,
            unit_price,
            tax_percent,
            discounts,
        }
    }

    fn discount(kind: DiscountKind) -> Discount {
        Discount {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            kind,
        }
    }

    #[test]
    fn line_total_uses_captured_snapshot() {
        let it = item(2, 299_900, 1800, vec![]);
        assert_eq!(line_total(&it).minor(), 599_800);
    }

    #[test]
    fn line_total_with_tax_matches_fixture() {
        // 299900 × 1.18 = 353882, truncated
        let it = item(1, 299_900, 1800, vec![]);
        assert_eq!(line_total_with_tax(&it).minor(), 353_882);
    }

    #[test]
    fn refundable_base_without_discounts_is_taxed_total() {
        let it = item(1, 799_900, 1800, vec![]);
        assert_eq!(refundable_base(&it).minor(), 943_882);
    }

    #[test]
    fn percent_discount_is_computed_on_tax_exclusive_total() {
        // line = 100000, tax 18% → 118000; 10% of 100000 = 10000
        let it = item(
            1,
            100_000,
            1800,
            vec![discount(DiscountKind::Percent(Percent::from_bps(1000)))],
        );
        assert_eq!(refundable_base(&it).minor(), 108_000);
    }

    #[test]
    fn fixed_discount_applies_in_full() {
        let it = item(
            2,
            50_000,
            0,
            vec![discount(DiscountKind::Fixed(Money::from_minor(7_500)))],
        );
        // 2 × 50000 = 100000, no tax, minus 7500
        assert_eq!(refundable_base(&it).minor(), 92_500);
    }

    #[test]
    fn oversized_fixed_discount_floors_at_zero() {
        let it = item(
            1,
            1_000,
            0,
            vec![discount(DiscountKind::Fixed(Money::from_minor(5_000)))],
        );
        assert_eq!(refundable_base(&it), Money::zero());
    }

    #[test]
    fn breakdown_mentions_each_discount() {
        let it = item(
            1,
            100_000,
            1800,
            vec![discount(DiscountKind::Percent(Percent::from_bps(1000)))],
        );
        let text = refund_breakdown(&it);
        assert!(text.contains("Item: ₹1000.00"));
        assert!(text.contains("SAVE10"));
        assert!(text.ends_with("= ₹1080.00"));
    }
}
