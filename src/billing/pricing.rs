use crate::error::{AppError, AppResult};

use super::models::{
    AddOnCharge, BillingPeriod, LineItemKind, PlanAddOn, PriceComposition, PricedLineItem,
    Selection,
};

/// Provider invoice-addition batches are limited; reject pathological carts
/// before any remote call.
pub const ONE_TIME_ITEM_CAP: usize = 20;

/// key: billing-pricing -> compose a selection into priced items and totals
///
/// Interval policy: a native price for the requested period is used
/// unmodified; a yearly request against a monthly-only price is annualized
/// (x12); a monthly price is never derived from a yearly one. One-time
/// amounts are scaled by the period multiplier and kept out of the
/// recurring stream.
pub fn compose_prices(selection: &Selection, period: BillingPeriod) -> AppResult<PriceComposition> {
    let plan = &selection.plan;

    let (plan_price, plan_item) = match selection.prices.iter().find(|p| p.interval == period) {
        Some(native) => {
            let item = PricedLineItem {
                kind: LineItemKind::Plan,
                recurring: true,
                unit_amount: native.unit_amount,
                quantity: 1,
                currency: native.currency.clone(),
                addon_id: None,
                external_price_id: Some(native.external_price_id.clone()),
                external_product_id: None,
                interval: Some(period),
                synthesized: false,
            };
            (native, item)
        }
        None => {
            if period != BillingPeriod::Yearly {
                return Err(AppError::Validation(format!(
                    "unsupported_feature: plan {} has no monthly price and monthly is never derived from yearly",
                    plan.code
                )));
            }
            let monthly = selection
                .prices
                .iter()
                .find(|p| p.interval == BillingPeriod::Monthly)
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "unsupported_feature: plan {} has no price usable for yearly billing",
                        plan.code
                    ))
                })?;
            let item = PricedLineItem {
                kind: LineItemKind::Plan,
                recurring: true,
                unit_amount: monthly.unit_amount * BillingPeriod::Yearly.multiplier(),
                quantity: 1,
                currency: monthly.currency.clone(),
                addon_id: None,
                external_price_id: None,
                external_product_id: Some(plan.external_product_id.clone()),
                interval: Some(BillingPeriod::Yearly),
                synthesized: true,
            };
            (monthly, item)
        }
    };

    let currency = plan_price.currency.clone();
    let mut items = vec![plan_item];
    let mut one_time_count = 0usize;

    for addon in &selection.enabled_addons {
        if addon.currency != currency {
            return Err(AppError::Validation(format!(
                "currency_mismatch: add-on {} is priced in {} but plan {} bills in {}",
                addon.code, addon.currency, plan.code, currency
            )));
        }
        match addon.charge {
            AddOnCharge::Recurring(interval) => {
                items.push(recurring_addon_item(addon, interval, period)?);
            }
            AddOnCharge::OneTime => {
                one_time_count += 1;
                if one_time_count > ONE_TIME_ITEM_CAP {
                    return Err(AppError::Validation(format!(
                        "too_many_items: selection carries more than {ONE_TIME_ITEM_CAP} one-time items"
                    )));
                }
                // Charged at quantity = period multiplier; yearly billing
                // prepays twelve monthly-equivalent one-time units.
                items.push(PricedLineItem {
                    kind: LineItemKind::Addon,
                    recurring: false,
                    unit_amount: addon.unit_amount,
                    quantity: period.multiplier() as u64,
                    currency: addon.currency.clone(),
                    addon_id: Some(addon.addon_id),
                    external_price_id: Some(addon.external_price_id.clone()),
                    external_product_id: None,
                    interval: None,
                    synthesized: false,
                });
            }
        }
    }

    if selection.extra_seats > 0 {
        let unit = plan.extra_seat_unit_amount.ok_or_else(|| {
            AppError::Validation(format!(
                "unsupported_feature: plan {} does not sell extra seats",
                plan.code
            ))
        })?;
        items.push(PricedLineItem {
            kind: LineItemKind::ExtraSeats,
            recurring: true,
            unit_amount: unit * period.multiplier(),
            quantity: u64::from(selection.extra_seats),
            currency: currency.clone(),
            addon_id: None,
            external_price_id: None,
            external_product_id: Some(plan.external_product_id.clone()),
            interval: Some(period),
            synthesized: true,
        });
    }

    let recurring_total: i64 = items.iter().filter(|i| i.recurring).map(|i| i.amount()).sum();
    let one_time_total: i64 = items.iter().filter(|i| !i.recurring).map(|i| i.amount()).sum();

    Ok(PriceComposition {
        plan_price_id: plan_price.id,
        items,
        recurring_total,
        one_time_total,
        total: recurring_total + one_time_total,
        currency,
    })
}

fn recurring_addon_item(
    addon: &PlanAddOn,
    native_interval: BillingPeriod,
    period: BillingPeriod,
) -> AppResult<PricedLineItem> {
    if native_interval == period {
        return Ok(PricedLineItem {
            kind: LineItemKind::Addon,
            recurring: true,
            unit_amount: addon.unit_amount,
            quantity: 1,
            currency: addon.currency.clone(),
            addon_id: Some(addon.addon_id),
            external_price_id: Some(addon.external_price_id.clone()),
            external_product_id: None,
            interval: Some(period),
            synthesized: false,
        });
    }
    if native_interval == BillingPeriod::Monthly && period == BillingPeriod::Yearly {
        return Ok(PricedLineItem {
            kind: LineItemKind::Addon,
            recurring: true,
            unit_amount: addon.unit_amount * BillingPeriod::Yearly.multiplier(),
            quantity: 1,
            currency: addon.currency.clone(),
            addon_id: Some(addon.addon_id),
            external_price_id: None,
            external_product_id: Some(addon.external_product_id.clone()),
            interval: Some(BillingPeriod::Yearly),
            synthesized: true,
        });
    }
    Err(AppError::Validation(format!(
        "unsupported_feature: add-on {} bills yearly and cannot be charged monthly",
        addon.code
    )))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::billing::models::{PlanOption, PlanPrice};

    fn plan(extra_seat_unit_amount: Option<i64>) -> PlanOption {
        PlanOption {
            id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            code: "core".to_string(),
            name: "Core".to_string(),
            external_product_id: "prod_core".to_string(),
            extra_seat_unit_amount,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn price(plan_id: Uuid, interval: BillingPeriod, unit_amount: i64) -> PlanPrice {
        PlanPrice {
            id: Uuid::new_v4(),
            plan_id,
            interval,
            unit_amount,
            currency: "eur".to_string(),
            external_price_id: format!("price_{}", interval.as_str()),
        }
    }

    fn selection(plan: PlanOption, prices: Vec<PlanPrice>, addons: Vec<PlanAddOn>) -> Selection {
        Selection {
            plan,
            prices,
            enabled_addons: addons,
            extra_seats: 0,
            website_requested: false,
        }
    }

    fn one_time_addon(plan_id: Uuid, unit_amount: i64, currency: &str) -> PlanAddOn {
        PlanAddOn {
            plan_id,
            addon_id: Uuid::new_v4(),
            code: "setup".to_string(),
            included: false,
            charge: AddOnCharge::OneTime,
            unit_amount,
            currency: currency.to_string(),
            external_price_id: "price_setup".to_string(),
            external_product_id: "prod_setup".to_string(),
        }
    }

    #[test]
    fn plan_only_monthly_total() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let selection = selection(plan, vec![monthly], vec![]);

        let composition = compose_prices(&selection, BillingPeriod::Monthly).unwrap();
        assert_eq!(composition.total, 5000);
        assert_eq!(composition.recurring_total, 5000);
        assert_eq!(composition.one_time_total, 0);
        assert!(!composition.plan_item().unwrap().synthesized);
        assert_eq!(
            composition.plan_item().unwrap().external_price_id.as_deref(),
            Some("price_monthly")
        );
    }

    #[test]
    fn yearly_request_annualizes_a_monthly_only_price() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let monthly_id = monthly.id;
        let selection = selection(plan, vec![monthly], vec![]);

        let composition = compose_prices(&selection, BillingPeriod::Yearly).unwrap();
        let item = composition.plan_item().unwrap();
        assert_eq!(item.unit_amount, 60000);
        assert!(item.synthesized);
        assert!(item.external_price_id.is_none());
        assert_eq!(composition.plan_price_id, monthly_id);
    }

    #[test]
    fn native_yearly_price_wins_over_annualization() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let yearly = price(plan.id, BillingPeriod::Yearly, 54000);
        let yearly_id = yearly.id;
        let selection = selection(plan, vec![monthly, yearly], vec![]);

        let composition = compose_prices(&selection, BillingPeriod::Yearly).unwrap();
        assert_eq!(composition.recurring_total, 54000);
        assert_eq!(composition.plan_price_id, yearly_id);
        assert!(!composition.plan_item().unwrap().synthesized);
    }

    #[test]
    fn monthly_is_never_derived_from_yearly() {
        let plan = plan(None);
        let yearly = price(plan.id, BillingPeriod::Yearly, 54000);
        let selection = selection(plan, vec![yearly], vec![]);

        let err = compose_prices(&selection, BillingPeriod::Monthly).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("unsupported_feature"));
    }

    #[test]
    fn one_time_addon_scales_by_the_period_multiplier() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let addon = one_time_addon(plan.id, 1000, "eur");
        let selection = selection(plan, vec![monthly], vec![addon]);

        let composition = compose_prices(&selection, BillingPeriod::Yearly).unwrap();
        assert_eq!(composition.one_time_total, 12000);
        assert_eq!(composition.recurring_total, 60000);
        assert_eq!(composition.total, 72000);
    }

    #[test]
    fn extra_seats_contribute_to_the_recurring_stream() {
        let plan = plan(Some(500));
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let mut selection = selection(plan, vec![monthly], vec![]);
        selection.extra_seats = 2;

        let composition = compose_prices(&selection, BillingPeriod::Monthly).unwrap();
        assert_eq!(composition.recurring_total, 6000);
        assert_eq!(composition.one_time_total, 0);
        let seats = composition
            .items
            .iter()
            .find(|i| i.kind == LineItemKind::ExtraSeats)
            .unwrap();
        assert_eq!(seats.amount(), 1000);
        assert_eq!(seats.quantity, 2);
    }

    #[test]
    fn currency_mismatch_fails_before_any_provider_call() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let addon = one_time_addon(plan.id, 1000, "usd");
        let selection = selection(plan, vec![monthly], vec![addon]);

        let err = compose_prices(&selection, BillingPeriod::Monthly).unwrap_err();
        assert!(err.to_string().contains("currency_mismatch"));
    }

    #[test]
    fn more_than_twenty_one_time_items_is_rejected() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let addons: Vec<_> = (0..=ONE_TIME_ITEM_CAP)
            .map(|_| one_time_addon(plan.id, 100, "eur"))
            .collect();
        let selection = selection(plan, vec![monthly], addons);

        let err = compose_prices(&selection, BillingPeriod::Monthly).unwrap_err();
        assert!(err.to_string().contains("too_many_items"));
    }

    #[test]
    fn yearly_addon_cannot_be_charged_monthly() {
        let plan = plan(None);
        let monthly = price(plan.id, BillingPeriod::Monthly, 5000);
        let addon = PlanAddOn {
            charge: AddOnCharge::Recurring(BillingPeriod::Yearly),
            ..one_time_addon(plan.id, 1000, "eur")
        };
        let selection = selection(plan, vec![monthly], vec![addon]);

        let err = compose_prices(&selection, BillingPeriod::Monthly).unwrap_err();
        assert!(err.to_string().contains("unsupported_feature"));
    }
}
