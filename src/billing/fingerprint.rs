use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::models::{BillingPeriod, PriceComposition, Selection, SelectionFingerprint};

/// Truncation keeps hashes readable in provider metadata while leaving ample
/// collision margin for a per-customer, per-period namespace.
const DIGEST_LEN: usize = 32;

/// key: billing-fingerprint -> deterministic identity of a logical selection
pub fn build_fingerprint(
    company_id: Uuid,
    selection: &Selection,
    composition: &PriceComposition,
    period: BillingPeriod,
) -> SelectionFingerprint {
    let addon_price_ids: Vec<&str> = selection
        .enabled_addons
        .iter()
        .map(|addon| addon.external_price_id.as_str())
        .collect();
    let selection_hash = selection_hash(
        composition.plan_price_id,
        period,
        composition.total,
        selection.extra_seats,
        &addon_price_ids,
    );
    let idempotency_key = idempotency_key(company_id, composition.plan_price_id, period, &selection_hash);
    SelectionFingerprint {
        selection_hash,
        idempotency_key,
    }
}

/// Content hash over the normalized selection. Add-on ordering and call time
/// never influence the result.
pub fn selection_hash(
    plan_price_id: Uuid,
    period: BillingPeriod,
    total: i64,
    extra_seats: u32,
    addon_price_ids: &[&str],
) -> String {
    let mut sorted: Vec<&str> = addon_price_ids.to_vec();
    sorted.sort_unstable();
    let canonical = format!(
        "{plan_price_id}|{}|{total}|{extra_seats}|{}",
        period.as_str(),
        sorted.join(",")
    );
    truncated_digest(&canonical)
}

/// Opaque deterministic key the provider uses to collapse duplicate creates.
pub fn idempotency_key(
    company_id: Uuid,
    plan_price_id: Uuid,
    period: BillingPeriod,
    selection_hash: &str,
) -> String {
    let canonical = format!(
        "{company_id}|{plan_price_id}|{}|{selection_hash}",
        period.as_str()
    );
    format!("provision-{}", truncated_digest(&canonical))
}

fn truncated_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..DIGEST_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addon_order_does_not_change_the_hash() {
        let plan_price_id = Uuid::new_v4();
        let forward = selection_hash(
            plan_price_id,
            BillingPeriod::Monthly,
            7000,
            1,
            &["price_a", "price_b", "price_c"],
        );
        let shuffled = selection_hash(
            plan_price_id,
            BillingPeriod::Monthly,
            7000,
            1,
            &["price_c", "price_a", "price_b"],
        );
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn hash_is_stable_across_repeated_computation() {
        let plan_price_id = Uuid::new_v4();
        let first = selection_hash(plan_price_id, BillingPeriod::Yearly, 60000, 0, &[]);
        let second = selection_hash(plan_price_id, BillingPeriod::Yearly, 60000, 0, &[]);
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn distinct_selections_hash_differently() {
        let plan_price_id = Uuid::new_v4();
        let base = selection_hash(plan_price_id, BillingPeriod::Monthly, 5000, 0, &[]);
        let seats = selection_hash(plan_price_id, BillingPeriod::Monthly, 5000, 2, &[]);
        let period = selection_hash(plan_price_id, BillingPeriod::Yearly, 5000, 0, &[]);
        assert_ne!(base, seats);
        assert_ne!(base, period);
    }

    #[test]
    fn idempotency_key_is_deterministic_and_prefixed() {
        let company_id = Uuid::new_v4();
        let plan_price_id = Uuid::new_v4();
        let first = idempotency_key(company_id, plan_price_id, BillingPeriod::Monthly, "abc");
        let second = idempotency_key(company_id, plan_price_id, BillingPeriod::Monthly, "abc");
        assert_eq!(first, second);
        assert!(first.starts_with("provision-"));

        let other_hash = idempotency_key(company_id, plan_price_id, BillingPeriod::Monthly, "def");
        assert_ne!(first, other_hash);
    }
}
