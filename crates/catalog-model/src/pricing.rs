//! Price reconciliation
//!
//! A variant either defers to its product's base price (`override_price`
//! null) or overrides it unconditionally.

/// Compute the `override_price` a migrated variant carries
///
/// - an existing override is kept as-is
/// - otherwise the variant's own price becomes the override only when it
///   differs from the base price
/// - otherwise null (defer to the product)
#[inline]
#[must_use]
pub fn reconcile_override_price(
    existing_override: Option<i64>,
    variant_price: Option<i64>,
    base_price: i64,
) -> Option<i64> {
    existing_override.or_else(|| variant_price.filter(|&price| price != base_price))
}

/// Price a shopper pays
#[inline]
#[must_use]
pub fn effective_price(override_price: Option<i64>, base_price: i64) -> i64 {
    override_price.unwrap_or(base_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn equal_price_defers_to_product() {
        assert_eq!(reconcile_override_price(None, Some(1000), 1000), None);
    }

    #[test]
    fn different_price_becomes_override() {
        assert_eq!(reconcile_override_price(None, Some(1200), 1000), Some(1200));
    }

    #[test]
    fn existing_override_is_kept() {
        assert_eq!(reconcile_override_price(Some(900), Some(1200), 1000), Some(900));
    }

    #[test]
    fn missing_variant_price_defers() {
        assert_eq!(reconcile_override_price(None, None, 1000), None);
    }

    proptest! {
        #[test]
        fn effective_price_never_changes(
            base in 0i64..1_000_000,
            raw in proptest::option::of(0i64..1_000_000),
        ) {
            let reconciled = reconcile_override_price(None, raw, base);
            let expected = raw.unwrap_or(base);
            prop_assert_eq!(effective_price(reconciled, base), expected);
        }

        #[test]
        fn reconciliation_is_stable(
            base in 0i64..1_000_000,
            existing in proptest::option::of(0i64..1_000_000),
            raw in proptest::option::of(0i64..1_000_000),
        ) {
            let once = reconcile_override_price(existing, raw, base);
            prop_assert_eq!(reconcile_override_price(once, raw, base), once);
        }
    }
}
