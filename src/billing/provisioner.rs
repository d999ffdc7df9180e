use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{AppError, AppResult};

use super::confirmation::{extract_confirmation, Confirmation, RetryPolicy};
use super::fingerprint::build_fingerprint;
use super::models::{
    BillingPeriod, CustomerContext, PriceComposition, ProvisioningOutcome, ProvisioningRecord,
    Selection, SelectionFingerprint,
};
use super::pricing::compose_prices;
use super::provider::{
    CreateSubscriptionRequest, ExternalSubscription, PaymentProvider, ProviderError,
};
use super::records::ProvisioningRecordStore;

/// Provider-side subscription status the search step reconciles against.
const RECONCILABLE_STATUS: &str = "incomplete";

/// States of one provisioning pass. Transitions are strictly forward except
/// for the single conflict-recovery hop from `Creating` back to `Searching`.
enum ProvisionState {
    Cached,
    Searching { after_conflict: bool },
    Creating,
    Persisted { subscription: ExternalSubscription },
}

/// key: billing-provisioner -> cache-check, search, create-or-adopt, persist
///
/// At most one live subscription per logical selection: duplicates are
/// prevented remotely by the deterministic idempotency key and locally by
/// converging racing calls onto whatever incomplete subscription the search
/// step finds. No lock is held anywhere.
pub struct SubscriptionProvisioner<P, R> {
    provider: P,
    records: R,
    retry: RetryPolicy,
}

impl<P: PaymentProvider, R: ProvisioningRecordStore> SubscriptionProvisioner<P, R> {
    pub fn new(provider: P, records: R, retry: RetryPolicy) -> Self {
        Self {
            provider,
            records,
            retry,
        }
    }

    pub async fn provision(
        &self,
        ctx: &CustomerContext,
        selection: &Selection,
        period: BillingPeriod,
    ) -> AppResult<ProvisioningOutcome> {
        let composition = compose_prices(selection, period)?;
        let fingerprint = build_fingerprint(ctx.company_id, selection, &composition, period);

        let mut state = ProvisionState::Cached;
        loop {
            state = match state {
                ProvisionState::Cached => {
                    match self.cached_subscription(ctx, period, &fingerprint).await? {
                        Some((subscription, confirmation)) => {
                            return self
                                .save_outcome(
                                    ctx,
                                    period,
                                    &composition,
                                    &fingerprint,
                                    &subscription,
                                    confirmation,
                                )
                                .await;
                        }
                        None => ProvisionState::Searching {
                            after_conflict: false,
                        },
                    }
                }
                ProvisionState::Searching { after_conflict } => {
                    let found = self
                        .find_reusable(ctx, selection, &composition, &fingerprint, period)
                        .await?;
                    match found {
                        Some(subscription) => {
                            info!(
                                company = %ctx.company_id,
                                subscription = %subscription.id,
                                after_conflict,
                                "adopting existing incomplete subscription"
                            );
                            ProvisionState::Persisted { subscription }
                        }
                        None if after_conflict => {
                            return Err(AppError::PaymentProvider(
                                "idempotency conflict could not be reconciled against any existing subscription".to_string(),
                            ));
                        }
                        None => ProvisionState::Creating,
                    }
                }
                ProvisionState::Creating => {
                    let request =
                        build_create_request(ctx, selection, &composition, &fingerprint, period);
                    match self.provider.create_subscription(&request).await {
                        Ok(subscription) => {
                            info!(
                                company = %ctx.company_id,
                                subscription = %subscription.id,
                                "created subscription"
                            );
                            ProvisionState::Persisted { subscription }
                        }
                        Err(ProviderError::IdempotencyConflict) => {
                            // A prior attempt with the same key exists (or is
                            // still processing); converge on it via search.
                            info!(
                                company = %ctx.company_id,
                                "create collided on the idempotency key, re-running search"
                            );
                            ProvisionState::Searching {
                                after_conflict: true,
                            }
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                ProvisionState::Persisted { subscription } => {
                    return self
                        .persist(ctx, period, &composition, &fingerprint, &subscription)
                        .await;
                }
            };
        }
    }

    /// Cached-hit check: a record whose hash matches the fresh fingerprint
    /// is re-validated against the provider without any create call. The hit
    /// only counts once a confirmation is in hand; any failure here,
    /// retrieval or extraction, falls through to the search step. The record
    /// is a cache of remote truth, not the truth itself.
    async fn cached_subscription(
        &self,
        ctx: &CustomerContext,
        period: BillingPeriod,
        fingerprint: &SelectionFingerprint,
    ) -> AppResult<Option<(ExternalSubscription, Confirmation)>> {
        let Some(record) = self.records.load(ctx.company_id, period).await? else {
            return Ok(None);
        };
        if record.selection_hash != fingerprint.selection_hash {
            info!(
                company = %ctx.company_id,
                period = period.as_str(),
                "selection changed since last provisioning, record will be overwritten"
            );
            return Ok(None);
        }
        let subscription = match self
            .provider
            .retrieve_subscription(&record.external_subscription_id)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(
                    company = %ctx.company_id,
                    subscription = %record.external_subscription_id,
                    ?err,
                    "recorded subscription could not be retrieved, falling back to search"
                );
                return Ok(None);
            }
        };
        match extract_confirmation(&self.provider, &subscription, &self.retry).await {
            Ok(confirmation) => Ok(Some((subscription, confirmation))),
            Err(err) => {
                warn!(
                    company = %ctx.company_id,
                    subscription = %subscription.id,
                    ?err,
                    "recorded subscription yields no confirmation, falling back to search"
                );
                Ok(None)
            }
        }
    }

    /// Provider-side search: a prior attempt may have created a remote
    /// object whose local write-back never completed. Prefer an exact hash
    /// match; otherwise adopt a plan/period match that carries the plan
    /// price, backfilling its metadata with the current hash.
    async fn find_reusable(
        &self,
        ctx: &CustomerContext,
        selection: &Selection,
        composition: &PriceComposition,
        fingerprint: &SelectionFingerprint,
        period: BillingPeriod,
    ) -> AppResult<Option<ExternalSubscription>> {
        let candidates = self
            .provider
            .search_subscriptions(&ctx.provider_customer_id, RECONCILABLE_STATUS)
            .await?;

        if let Some(exact) = candidates
            .iter()
            .find(|sub| sub.metadata.get("selection_hash") == Some(&fingerprint.selection_hash))
        {
            return Ok(Some(exact.clone()));
        }

        let plan_id = selection.plan.id.to_string();
        let plan_price_id = composition.plan_price_id.to_string();
        let plan_external_price = composition
            .plan_item()
            .and_then(|item| item.external_price_id.clone());

        for candidate in candidates {
            let plan_matches = candidate.metadata.get("plan_id") == Some(&plan_id)
                && candidate.metadata.get("period").map(String::as_str) == Some(period.as_str());
            if !plan_matches {
                continue;
            }
            let carries_plan_price = match &plan_external_price {
                Some(price_id) => candidate.items.iter().any(|item| item.price_id == *price_id),
                None => candidate.metadata.get("plan_price_id") == Some(&plan_price_id),
            };
            if !carries_plan_price {
                continue;
            }
            let mut metadata = candidate.metadata.clone();
            metadata.insert("selection_hash".to_string(), fingerprint.selection_hash.clone());
            let updated = self
                .provider
                .update_subscription_metadata(&candidate.id, &metadata)
                .await?;
            return Ok(Some(updated));
        }

        Ok(None)
    }

    async fn persist(
        &self,
        ctx: &CustomerContext,
        period: BillingPeriod,
        composition: &PriceComposition,
        fingerprint: &SelectionFingerprint,
        subscription: &ExternalSubscription,
    ) -> AppResult<ProvisioningOutcome> {
        let confirmation = extract_confirmation(&self.provider, subscription, &self.retry).await?;
        self.save_outcome(ctx, period, composition, fingerprint, subscription, confirmation)
            .await
    }

    async fn save_outcome(
        &self,
        ctx: &CustomerContext,
        period: BillingPeriod,
        composition: &PriceComposition,
        fingerprint: &SelectionFingerprint,
        subscription: &ExternalSubscription,
        confirmation: Confirmation,
    ) -> AppResult<ProvisioningOutcome> {
        let record = ProvisioningRecord {
            intent_id: confirmation.intent_id.clone(),
            intent_type: confirmation.intent_type,
            client_secret: confirmation.client_secret.clone(),
            external_subscription_id: subscription.id.clone(),
            amount: composition.total,
            currency: composition.currency.clone(),
            period,
            selection_hash: fingerprint.selection_hash.clone(),
        };
        self.records.save(ctx.company_id, period, &record).await?;
        Ok(ProvisioningOutcome {
            intent_id: confirmation.intent_id,
            intent_type: confirmation.intent_type,
            client_secret: confirmation.client_secret,
        })
    }
}

fn build_create_request(
    ctx: &CustomerContext,
    selection: &Selection,
    composition: &PriceComposition,
    fingerprint: &SelectionFingerprint,
    period: BillingPeriod,
) -> CreateSubscriptionRequest {
    let (recurring_items, one_time_items): (Vec<_>, Vec<_>) = composition
        .items
        .iter()
        .cloned()
        .partition(|item| item.recurring);

    let mut metadata = BTreeMap::new();
    metadata.insert("selection_hash".to_string(), fingerprint.selection_hash.clone());
    metadata.insert("company_id".to_string(), ctx.company_id.to_string());
    metadata.insert("plan_id".to_string(), selection.plan.id.to_string());
    metadata.insert("plan_price_id".to_string(), composition.plan_price_id.to_string());
    metadata.insert("period".to_string(), period.as_str().to_string());

    CreateSubscriptionRequest {
        customer_id: ctx.provider_customer_id.clone(),
        recurring_items,
        one_time_items,
        metadata,
        idempotency_key: fingerprint.idempotency_key.clone(),
    }
}
