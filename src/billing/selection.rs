use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{PlanAddOn, PlanSnapshot, RawSelection, Selection};

/// Add-on code the onboarding wizard treats as the hosted-website feature.
pub const WEBSITE_ADDON_CODE: &str = "website";

/// key: billing-selection -> validate and normalize a raw selection
///
/// Pure; never contacts the provider or the database. The catalog snapshot
/// is the single source of truth for what the plan offers.
pub fn resolve_selection(raw: &RawSelection, snapshot: &PlanSnapshot) -> AppResult<Selection> {
    let plan = &snapshot.plan;

    if let Some(tier_id) = raw.tier_id {
        if plan.tier_id != tier_id {
            return Err(AppError::Validation(format!(
                "invalid_selection: plan {} does not belong to tier {tier_id}",
                plan.code
            )));
        }
    }

    if raw.extra_seats > 0 && plan.extra_seat_unit_amount.is_none() {
        return Err(AppError::Validation(format!(
            "unsupported_feature: plan {} does not sell extra seats",
            plan.code
        )));
    }

    // Explicit choices union plan-included add-ons; BTreeMap keeps the
    // enabled set deduplicated and in deterministic order.
    let mut enabled: BTreeMap<Uuid, PlanAddOn> = BTreeMap::new();
    for addon in &snapshot.addons {
        if addon.included {
            enabled.insert(addon.addon_id, addon.clone());
        }
    }
    for addon_id in &raw.addon_ids {
        let addon = snapshot
            .addons
            .iter()
            .find(|candidate| candidate.addon_id == *addon_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "add-on {addon_id} is not available on plan {}",
                    plan.code
                ))
            })?;
        enabled.insert(addon.addon_id, addon.clone());
    }

    if raw.website {
        let website = snapshot
            .addons
            .iter()
            .find(|candidate| candidate.code == WEBSITE_ADDON_CODE)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "plan {} has no {WEBSITE_ADDON_CODE} add-on",
                    plan.code
                ))
            })?;
        enabled.insert(website.addon_id, website.clone());
    }

    Ok(Selection {
        plan: plan.clone(),
        prices: snapshot.prices.clone(),
        enabled_addons: enabled.into_values().collect(),
        extra_seats: raw.extra_seats,
        website_requested: raw.website,
    })
}
