//! Property tests for option payloads
//!
//! - legacy-extracted entries always win on key collision
//! - untouched existing keys survive a merge
//! - attribute name normalization is idempotent and snake-cased

use catalog_model::{
    normalize_attribute_name, LegacyOptionRow, OptionValue, ScalarValue, VariantOptions,
};
use proptest::prelude::*;

fn existing_options(pairs: &[(String, String)]) -> VariantOptions {
    let mut options = VariantOptions::new();
    for (key, value) in pairs {
        options.insert(key.clone(), OptionValue::Scalar(ScalarValue::Text(value.clone())));
    }
    options
}

#[test]
fn documented_precedence_example() {
    let existing = VariantOptions::parse(r#"{"color":"blue"}"#).unwrap();
    let legacy = VariantOptions::from_legacy(&[LegacyOptionRow::variant(1, "Color", "color", "red")]);

    let merged = existing.merge_legacy(legacy);

    assert_eq!(merged.get("color").and_then(OptionValue::value_text), Some("red"));
    assert_eq!(merged.len(), 1);
}

proptest! {
    #[test]
    fn legacy_wins_on_every_collision(
        names in proptest::collection::vec("[a-z]{1,8}", 1..6),
        existing_value in "[a-z]{1,6}",
        legacy_value in "[A-Z]{1,6}",
    ) {
        let pairs: Vec<_> = names.iter().map(|n| (n.clone(), existing_value.clone())).collect();
        let rows: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| LegacyOptionRow::variant(i as i64 + 1, n.clone(), "select", legacy_value.clone()))
            .collect();

        let merged = existing_options(&pairs).merge_legacy(VariantOptions::from_legacy(&rows));

        for name in &names {
            prop_assert_eq!(merged.get(name).and_then(OptionValue::value_text), Some(legacy_value.as_str()));
        }
    }

    #[test]
    fn untouched_keys_survive(
        existing_key in "x[a-z]{1,6}",
        legacy_key in "y[a-z]{1,6}",
        value in "[a-z]{1,6}",
    ) {
        let existing = existing_options(&[(existing_key.clone(), value.clone())]);
        let legacy = VariantOptions::from_legacy(&[LegacyOptionRow::variant(1, legacy_key.clone(), "select", "v")]);

        let merged = existing.merge_legacy(legacy);

        prop_assert_eq!(merged.len(), 2);
        prop_assert_eq!(merged.get(&existing_key).and_then(OptionValue::value_text), Some(value.as_str()));
    }

    #[test]
    fn normalization_is_idempotent(name in "[A-Za-z0-9 _()-]{0,24}") {
        let once = normalize_attribute_name(&name);
        prop_assert_eq!(normalize_attribute_name(&once), once.clone());
        prop_assert!(!once.starts_with('_') && !once.ends_with('_'));
        prop_assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }
}
