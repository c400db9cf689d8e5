use serde::{Deserialize, Serialize};
use storefront_core::{CoreError, CoreResult, Money, OrderItem, ShippingAddress};

/// Checkout pricing rules. Totals are computed once at creation and never
/// recomputed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRules {
    /// Flat fee for destinations in a low-cost zone
    pub low_tier_fee: Money,
    /// Flat fee everywhere else
    pub high_tier_fee: Money,
    /// Cities (case-insensitive) served at the low tier
    pub low_cost_cities: Vec<String>,
    /// Zero today; kept explicit so the tax line exists on every order.
    pub tax_rate: f64,
    pub currency: String,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            low_tier_fee: 80,
            high_tier_fee: 130,
            low_cost_cities: vec!["dhaka".to_string()],
            tax_rate: 0.0,
            currency: "BDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub total: Money,
}

impl PricingRules {
    pub fn shipping_fee(&self, address: &ShippingAddress) -> Money {
        let city = address.city.trim().to_lowercase();
        let low_cost = self
            .low_cost_cities
            .iter()
            .any(|candidate| candidate.trim().to_lowercase() == city);
        if low_cost {
            self.low_tier_fee
        } else {
            self.high_tier_fee
        }
    }

    pub fn tax(&self, subtotal: Money) -> Money {
        if self.tax_rate <= 0.0 {
            return 0;
        }
        (subtotal as f64 * self.tax_rate).round() as Money
    }

    /// Fails when any line, the subtotal or the grand total overflows.
    pub fn totals(&self, items: &[OrderItem], address: &ShippingAddress) -> CoreResult<OrderTotals> {
        let subtotal = items
            .iter()
            .try_fold(0 as Money, |sum, item| sum.checked_add(item.line_total()?))
            .ok_or_else(out_of_range)?;
        let shipping_fee = self.shipping_fee(address);
        let tax = self.tax(subtotal);
        let total = subtotal
            .checked_add(shipping_fee)
            .and_then(|sum| sum.checked_add(tax))
            .ok_or_else(out_of_range)?;
        Ok(OrderTotals {
            subtotal,
            shipping_fee,
            tax,
            total,
        })
    }
}

fn out_of_range() -> CoreError {
    CoreError::ValidationError("order total out of range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_shared::Masked;

    fn address(city: &str) -> ShippingAddress {
        ShippingAddress {
            first_name: "Karim".to_string(),
            last_name: "Ahmed".to_string(),
            email: Masked("karim@example.com".to_string()),
            phone: Masked("01811222333".to_string()),
            street: "12 Station Road".to_string(),
            city: city.to_string(),
            postal_code: "4000".to_string(),
            country: "BD".to_string(),
        }
    }

    fn item(price: Money, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: "prod-1".to_string(),
            name: "Panjabi".to_string(),
            sku: None,
            slug: None,
            image: None,
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn test_shipping_tiers() {
        let rules = PricingRules::default();
        assert_eq!(rules.shipping_fee(&address("Dhaka")), 80);
        assert_eq!(rules.shipping_fee(&address("  dhaka ")), 80);
        assert_eq!(rules.shipping_fee(&address("Chittagong")), 130);
    }

    #[test]
    fn test_totals() {
        let rules = PricingRules::default();
        let totals = rules.totals(&[item(1200, 2), item(350, 1)], &address("Sylhet")).unwrap();
        assert_eq!(totals.subtotal, 2750);
        assert_eq!(totals.shipping_fee, 130);
        assert_eq!(totals.tax, 0);
        assert_eq!(totals.total, 2880);
    }

    #[test]
    fn test_tax_rate_applies_to_subtotal() {
        let rules = PricingRules { tax_rate: 0.05, ..Default::default() };
        let totals = rules.totals(&[item(1000, 1)], &address("Dhaka")).unwrap();
        assert_eq!(totals.tax, 50);
        assert_eq!(totals.total, 1130);
    }

    #[test]
    fn test_overflowing_totals_rejected() {
        let rules = PricingRules::default();
        let err = rules.totals(&[item(Money::MAX / 2, 3)], &address("Dhaka")).unwrap_err();
        assert_eq!(err, CoreError::ValidationError("order total out of range".to_string()));

        let err = rules
            .totals(&[item(Money::MAX / 2, 1), item(Money::MAX / 2, 1), item(10, 1)], &address("Dhaka"))
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));

        // Subtotal fits, shipping pushes it over.
        assert!(rules.totals(&[item(Money::MAX - 10, 1)], &address("Dhaka")).is_err());
    }
}
