use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;

use super::catalog::PlanCatalog;
use super::confirmation::RetryPolicy;
use super::models::{
    BillingPeriod, PlanOption, PriceComposition, ProvisioningOutcome, RawSelection,
};
use super::pricing::compose_prices;
use super::provider::StripeGateway;
use super::provisioner::SubscriptionProvisioner;
use super::records::PgRecordStore;
use super::selection::resolve_selection;

/// key: billing-api -> rest endpoints
pub async fn list_plans(Extension(pool): Extension<PgPool>) -> AppResult<Json<Vec<PlanOption>>> {
    let catalog = PlanCatalog::new(pool);
    let plans = catalog.list_plans().await?;
    Ok(Json(plans))
}

/// Resolve and price a selection without touching the provider; the wizard
/// uses this to show totals before the customer commits.
pub async fn quote_selection(
    Extension(pool): Extension<PgPool>,
    Path(company_id): Path<Uuid>,
    Json(payload): Json<QuoteRequest>,
) -> AppResult<Json<QuoteResponse>> {
    let catalog = PlanCatalog::new(pool.clone());
    let records = PgRecordStore::new(pool);
    // 404 before any pricing work if the company is unknown.
    records.customer_context(company_id).await?;

    let snapshot = catalog.load_plan(payload.selection.plan_id).await?;
    let selection = resolve_selection(&payload.selection, &snapshot)?;
    let composition = compose_prices(&selection, payload.period)?;
    Ok(Json(QuoteResponse { composition }))
}

pub async fn provision_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<StripeGateway>>,
    Path(company_id): Path<Uuid>,
    Json(payload): Json<ProvisionRequest>,
) -> AppResult<Json<ProvisioningOutcome>> {
    let catalog = PlanCatalog::new(pool.clone());
    let records = PgRecordStore::new(pool);
    let ctx = records.customer_context(company_id).await?;

    let snapshot = catalog.load_plan(payload.selection.plan_id).await?;
    let selection = resolve_selection(&payload.selection, &snapshot)?;

    let provisioner =
        SubscriptionProvisioner::new(gateway, records, RetryPolicy::from_config());
    let outcome = provisioner.provision(&ctx, &selection, payload.period).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub selection: RawSelection,
    pub period: BillingPeriod,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub composition: PriceComposition,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub selection: RawSelection,
    pub period: BillingPeriod,
}
